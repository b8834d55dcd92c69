use super::command_reader::{CommandOp, CommandRecord};
use crate::application::engine::{CreatePaymentRequest, PaymentEngine, PaymentOutcome};
use crate::domain::transaction::{Details, Transaction};
use crate::error::{PaymentError, Result};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Drives a [`PaymentEngine`] from command rows and remembers which merchants
/// it touched.
pub struct CommandRunner<'a> {
    engine: &'a PaymentEngine,
    merchants: BTreeSet<String>,
}

impl<'a> CommandRunner<'a> {
    pub fn new(engine: &'a PaymentEngine) -> Self {
        Self {
            engine,
            merchants: BTreeSet::new(),
        }
    }

    /// Runs one command and returns the transaction it left behind.
    ///
    /// A provider-side failure is not an error here: the transaction is
    /// returned in whatever state the failure put it in.
    #[instrument(
        skip(self, command),
        fields(op = ?command.op, merchant = %command.merchant, key = %command.key)
    )]
    pub async fn execute(&mut self, command: CommandRecord) -> Result<Transaction> {
        if command.key.is_empty() {
            return Err(PaymentError::Validation(
                "Command without a key cannot address a payment".to_string(),
            ));
        }
        self.merchants.insert(command.merchant.clone());

        let transaction = match command.op {
            CommandOp::Create => {
                let amount = command.amount.ok_or_else(|| missing("amount"))?;
                let currency = command.currency.clone().ok_or_else(|| missing("currency"))?;
                let mut request =
                    CreatePaymentRequest::new(command.merchant.clone(), amount, currency)
                        .idempotency_key(command.key.clone());
                if let Some(provider) = &command.provider {
                    request = request.provider(provider.clone());
                }
                report(self.engine.create_payment_intent(request).await?)
            }
            CommandOp::Confirm => {
                let id = self.resolve(&command).await?.id;
                let mut method_data = Details::new();
                if let Some(payer) = &command.payer {
                    method_data.insert("payer_id".to_string(), payer.clone());
                }
                report(self.engine.confirm_payment(id, method_data).await?)
            }
            CommandOp::Refund => {
                let id = self.resolve(&command).await?.id;
                report(
                    self.engine
                        .refund_payment(id, command.amount, command.reason.clone())
                        .await?,
                )
            }
            CommandOp::Cancel => {
                let id = self.resolve(&command).await?.id;
                self.engine.cancel_payment(id).await?
            }
            CommandOp::Status => {
                let id = self.resolve(&command).await?.id;
                let outcome = self.engine.get_payment_status(id).await?;
                info!(
                    transaction_id = %id,
                    local = %outcome.transaction.status,
                    provider = %outcome.result.status(),
                    "Payment status"
                );
                outcome.transaction
            }
        };

        Ok(transaction)
    }

    /// Merchants named by any command so far, sorted.
    pub fn merchants(&self) -> impl Iterator<Item = &str> {
        self.merchants.iter().map(String::as_str)
    }

    async fn resolve(&self, command: &CommandRecord) -> Result<Transaction> {
        self.engine
            .find_by_idempotency_key(&command.merchant, &command.key)
            .await?
            .ok_or_else(|| {
                PaymentError::Validation(format!(
                    "No payment with key '{}' for merchant '{}'",
                    command.key, command.merchant
                ))
            })
    }
}

fn missing(column: &str) -> PaymentError {
    PaymentError::Validation(format!("Column '{}' is required for create", column))
}

fn report(outcome: PaymentOutcome) -> Transaction {
    if !outcome.result.success() {
        warn!(
            transaction_id = %outcome.transaction.id,
            status = %outcome.transaction.status,
            error = outcome.result.error_message().unwrap_or_default(),
            "Provider rejected the operation"
        );
    }
    outcome.transaction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::EngineConfig;
    use crate::application::registry::ProviderRegistry;
    use crate::domain::transaction::PaymentStatus;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::infrastructure::providers::MockProvider;
    use crate::interfaces::csv::command_reader::CommandReader;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn engine() -> PaymentEngine {
        PaymentEngine::new(
            Arc::new(InMemoryStore::new()),
            ProviderRegistry::new().with(Arc::new(MockProvider::new().with_fee_rate(dec!(3)))),
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_runner_drives_full_lifecycle() {
        let engine = engine();
        let mut runner = CommandRunner::new(&engine);
        let data = "op,merchant,key,amount,currency,payer,reason,provider\n\
                    create,m1,order-1,50.00,USD,,,\n\
                    confirm,m1,order-1,,,PAYER-1,,\n\
                    refund,m1,order-1,20.00,,,damaged,\n\
                    status,m1,order-1";

        let mut last = None;
        for command in CommandReader::new(data.as_bytes()).commands() {
            last = Some(runner.execute(command.unwrap()).await.unwrap());
        }

        assert_eq!(last.unwrap().status, PaymentStatus::PartiallyRefunded);
        assert_eq!(runner.merchants().collect::<Vec<_>>(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_runner_rejects_unknown_key_and_missing_columns() {
        let engine = engine();
        let mut runner = CommandRunner::new(&engine);
        let data = "op,merchant,key,amount,currency\n\
                    confirm,m1,nope\n\
                    create,m1,order-2,10.00";

        let results: Vec<Result<Transaction>> = {
            let mut results = Vec::new();
            for command in CommandReader::new(data.as_bytes()).commands() {
                results.push(runner.execute(command.unwrap()).await);
            }
            results
        };

        assert!(matches!(results[0], Err(PaymentError::Validation(_))));
        assert!(matches!(results[1], Err(PaymentError::Validation(_))));
    }
}
