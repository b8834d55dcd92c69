use super::coordinator::IdempotencyCoordinator;
use super::ledger::{Ledger, Transition};
use super::registry::ProviderRegistry;
use super::retry::RetryPolicy;
use crate::domain::balance::MerchantBalance;
use crate::domain::money::{Amount, Currency, Money, compute_commission};
use crate::domain::payment_result::PaymentResult;
use crate::domain::ports::{
    Commit, IdempotencyRecord, PaymentStoreRef, ProviderRef, REQUEST_ID,
};
use crate::domain::state_machine::{
    Event, EventKind, ensure_accepts, ensure_cancellable, next_state,
};
use crate::domain::transaction::{
    Details, PaymentMethod, Refund, RefundStatus, Transaction, TransactionId,
};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Tunables of a [`PaymentEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Platform commission in percent, charged when a provider reports no
    /// fee of its own.
    pub commission_rate: Option<Decimal>,
    /// Provider used by create requests that do not name one.
    pub default_provider: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            commission_rate: None,
            default_provider: "mock".to_string(),
        }
    }
}

/// Input of [`PaymentEngine::create_payment_intent`].
///
/// Without an `idempotency_key` the request is **not idempotent**: sending it
/// twice creates two transactions and two provider-side payments.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePaymentRequest {
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    /// Registry name; `None` selects the configured default.
    pub provider: Option<String>,
    pub idempotency_key: Option<String>,
    pub method_data: Details,
    pub metadata: Details,
}

impl CreatePaymentRequest {
    pub fn new(
        merchant_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            amount,
            currency: currency.into(),
            payment_method: PaymentMethod::Mock,
            provider: None,
            idempotency_key: None,
            method_data: Details::new(),
            metadata: Details::new(),
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    pub fn method_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.method_data.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The transaction as committed by a use case, and the provider result that
/// drove it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub transaction: Transaction,
    pub result: PaymentResult,
}

/// Entry point of every payment use case.
///
/// Each call is an independent unit of work. Calls touching the same
/// transaction (or the same merchant idempotency key) are serialized; all
/// other calls run concurrently. Each mutating use case ends in exactly one
/// atomic store commit, or none.
pub struct PaymentEngine {
    store: PaymentStoreRef,
    providers: ProviderRegistry,
    ledger: Ledger,
    coordinator: IdempotencyCoordinator,
    config: EngineConfig,
}

impl PaymentEngine {
    /// Fails when the default provider is not registered or the commission
    /// rate is negative.
    pub fn new(
        store: PaymentStoreRef,
        providers: ProviderRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        if !providers.contains(&config.default_provider) {
            return Err(PaymentError::ProviderNotSupported(
                config.default_provider.clone(),
            ));
        }
        if let Some(rate) = config.commission_rate
            && rate.is_sign_negative()
        {
            return Err(PaymentError::Validation(format!(
                "Commission rate must not be negative, got {}",
                rate
            )));
        }

        Ok(Self {
            ledger: Ledger::new(store.clone()),
            store,
            providers,
            coordinator: IdempotencyCoordinator::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a payment with the selected provider.
    ///
    /// The resulting transaction is `PROCESSING` when the provider accepted
    /// the intent and `FAILED` otherwise. A repeated request with the same
    /// (merchant, idempotency key) returns the stored outcome without calling
    /// the provider again.
    #[instrument(skip(self, request), fields(merchant_id = %request.merchant_id))]
    pub async fn create_payment_intent(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentOutcome> {
        if request.merchant_id.trim().is_empty() {
            return Err(PaymentError::Validation(
                "Merchant id must not be empty".to_string(),
            ));
        }
        if let Some(key) = &request.idempotency_key
            && key.trim().is_empty()
        {
            return Err(PaymentError::Validation(
                "Idempotency key must not be blank".to_string(),
            ));
        }
        let money = Money::new(request.amount, &request.currency)?;
        let provider_name = request
            .provider
            .as_deref()
            .unwrap_or(self.config.default_provider.as_str());
        let provider = self.providers.get(provider_name)?;

        let key = request.idempotency_key.as_deref();
        let _create_guard = self.coordinator.lock_create(&request.merchant_id, key).await;

        match key {
            Some(key) => {
                if let Some(record) = self
                    .store
                    .find_idempotency_record(&request.merchant_id, key)
                    .await?
                {
                    let transaction = self.load(record.transaction_id).await?;
                    if transaction.money != money {
                        warn!(
                            idempotency_key = key,
                            stored = %transaction.money,
                            requested = %money,
                            "Idempotency key reused with different amount"
                        );
                    }
                    info!(
                        idempotency_key = key,
                        transaction_id = %transaction.id,
                        "Replaying stored create result"
                    );
                    return Ok(PaymentOutcome {
                        transaction,
                        result: record.result,
                    });
                }
            }
            None => debug!("Create request without idempotency key; no deduplication"),
        }

        let mut transaction = Transaction::new(
            request.merchant_id.clone(),
            money,
            request.payment_method,
            provider.name(),
            request.idempotency_key.clone(),
            request.metadata.clone(),
        );

        // Every attempt carries the same request id, so a create the provider
        // accepted but answered too late is not opened twice.
        let mut provider_metadata = request.metadata.clone();
        if let Some(key) = key {
            provider_metadata.insert(
                REQUEST_ID.to_string(),
                format!("{}:{}", request.merchant_id, key),
            );
        }
        let result = self
            .config
            .retry
            .run("create_payment_intent", || {
                provider.create_payment_intent(
                    &transaction.money,
                    &request.method_data,
                    &provider_metadata,
                )
            })
            .await;

        let old = transaction.status;
        let new = next_state(old, &Event::Created(&result))?;
        if let Some(reference) = result.provider_reference() {
            transaction.assign_provider_reference(reference)?;
        }
        transaction.status = new;
        transaction.touch();

        let mut commit = Commit::transaction(transaction.clone());
        if let Some(key) = key {
            commit = commit.with_idempotency(IdempotencyRecord {
                merchant_id: transaction.merchant_id.clone(),
                key: key.to_string(),
                transaction_id: transaction.id,
                result: result.clone(),
            });
        }
        self.ledger
            .commit_transition(
                commit,
                Transition {
                    old,
                    new,
                    amount: transaction.money.amount.value(),
                    fee: Decimal::ZERO,
                },
            )
            .await?;

        info!(
            transaction_id = %transaction.id,
            status = %new,
            provider = provider.name(),
            "Payment intent created"
        );
        Ok(PaymentOutcome {
            transaction,
            result,
        })
    }

    /// Confirms a `PROCESSING` payment with the payer authorization found in
    /// `method_data` (`payer_id`). Ends in `COMPLETED` or `FAILED`.
    #[instrument(skip(self, method_data))]
    pub async fn confirm_payment(
        &self,
        transaction_id: TransactionId,
        method_data: Details,
    ) -> Result<PaymentOutcome> {
        let _tx_guard = self.coordinator.lock_transaction(transaction_id).await;
        let mut transaction = self.load(transaction_id).await?;
        ensure_accepts(transaction.status, EventKind::Confirm)?;
        let (provider, reference) = self.bound_provider(&transaction)?;

        if !transaction.confirm_issued() {
            transaction.confirm_issued_at = Some(Utc::now());
            transaction.touch();
            self.store
                .commit(Commit::transaction(transaction.clone()))
                .await?;
        }

        let result = self
            .config
            .retry
            .run("confirm_payment", || {
                provider.confirm_payment(&reference, &method_data)
            })
            .await;

        let old = transaction.status;
        let new = next_state(old, &Event::Confirmed(&result))?;
        let mut fee = Decimal::ZERO;
        if result.success() {
            fee = self.fee_for(&transaction, &result)?;
            transaction.fee_amount = Some(fee);
            transaction.amount_processed = result.amount_processed();
            if let Some(processed) = result.amount_processed()
                && processed != transaction.money.amount
            {
                warn!(
                    transaction_id = %transaction.id,
                    %processed,
                    expected = %transaction.money.amount,
                    "Provider processed a different amount"
                );
            }
        }
        transaction.status = new;
        transaction.touch();

        self.ledger
            .commit_transition(
                Commit::transaction(transaction.clone()),
                Transition {
                    old,
                    new,
                    amount: transaction.money.amount.value(),
                    fee,
                },
            )
            .await?;

        info!(transaction_id = %transaction.id, status = %new, "Payment confirmed");
        Ok(PaymentOutcome {
            transaction,
            result,
        })
    }

    /// Refunds `amount`, or everything still refundable when `None`.
    ///
    /// A refund declined by the provider is recorded as a failed [`Refund`]
    /// and leaves the transaction and balances untouched.
    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        transaction_id: TransactionId,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<PaymentOutcome> {
        if let Some(amount) = amount {
            Amount::new(amount)?;
        }

        let _tx_guard = self.coordinator.lock_transaction(transaction_id).await;
        let mut transaction = self.load(transaction_id).await?;
        ensure_accepts(transaction.status, EventKind::Refund)?;

        let remaining = transaction.refundable_remaining();
        let requested = amount.unwrap_or(remaining);
        if requested > remaining {
            return Err(PaymentError::Validation(format!(
                "Refund of {} exceeds refundable remaining {} on transaction {}",
                requested, remaining, transaction.id
            )));
        }
        let money = Money {
            amount: Amount::new(requested)?,
            currency: transaction.money.currency.clone(),
        };
        let (provider, reference) = self.bound_provider(&transaction)?;

        // Always an explicit amount: the provider's notion of "the rest"
        // includes the fee, ours does not.
        let result = self
            .config
            .retry
            .run("refund_payment", || {
                provider.refund_payment(&reference, Some(&money), reason.as_deref())
            })
            .await;

        let refund = Refund {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            amount: money.amount,
            reason: reason.clone(),
            status: if result.success() {
                RefundStatus::Succeeded
            } else {
                RefundStatus::Failed
            },
            provider_reference: result.provider_reference().map(str::to_string),
            error_message: result.error_message().map(str::to_string),
            created_at: Utc::now(),
        };

        let old = transaction.status;
        let cumulative = if result.success() {
            transaction.refunded_amount + requested
        } else {
            transaction.refunded_amount
        };
        let new = next_state(
            old,
            &Event::Refunded {
                result: &result,
                cumulative,
                refundable: transaction.settled_amount(),
            },
        )?;

        if result.success() {
            transaction.refunded_amount = cumulative;
            transaction.status = new;
            transaction.touch();
            self.ledger
                .commit_transition(
                    Commit::transaction(transaction.clone()).with_refund(refund),
                    Transition {
                        old,
                        new,
                        amount: requested,
                        fee: Decimal::ZERO,
                    },
                )
                .await?;
            info!(transaction_id = %transaction.id, %requested, status = %new, "Refund succeeded");
        } else {
            self.store
                .commit(Commit::transaction(transaction.clone()).with_refund(refund))
                .await?;
            warn!(
                transaction_id = %transaction.id,
                %requested,
                error = result.error_message().unwrap_or_default(),
                "Refund failed"
            );
        }

        Ok(PaymentOutcome {
            transaction,
            result,
        })
    }

    /// Cancels a payment no confirm has been issued for. Local only: the
    /// provider is not called and pending funds are released.
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let _tx_guard = self.coordinator.lock_transaction(transaction_id).await;
        let mut transaction = self.load(transaction_id).await?;
        ensure_cancellable(&transaction)?;

        let old = transaction.status;
        let new = next_state(old, &Event::Cancelled)?;
        transaction.status = new;
        transaction.touch();

        self.ledger
            .commit_transition(
                Commit::transaction(transaction.clone()),
                Transition {
                    old,
                    new,
                    amount: transaction.money.amount.value(),
                    fee: Decimal::ZERO,
                },
            )
            .await?;

        info!(transaction_id = %transaction.id, "Payment cancelled");
        Ok(transaction)
    }

    /// Asks the provider for its view of the payment. Never changes state.
    #[instrument(skip(self))]
    pub async fn get_payment_status(
        &self,
        transaction_id: TransactionId,
    ) -> Result<PaymentOutcome> {
        let _tx_guard = self.coordinator.lock_transaction(transaction_id).await;
        let transaction = self.load(transaction_id).await?;
        let (provider, reference) = self.bound_provider(&transaction)?;

        let result = self
            .config
            .retry
            .run("get_payment_status", || provider.get_payment_status(&reference))
            .await;

        if result.success() && result.status() != transaction.status {
            debug!(
                transaction_id = %transaction.id,
                local = %transaction.status,
                provider = %result.status(),
                "Provider status differs from local status"
            );
        }
        Ok(PaymentOutcome {
            transaction,
            result,
        })
    }

    pub async fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.load(transaction_id).await
    }

    pub async fn find_by_idempotency_key(
        &self,
        merchant_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>> {
        match self.store.find_idempotency_record(merchant_id, key).await? {
            Some(record) => Ok(Some(self.load(record.transaction_id).await?)),
            None => Ok(None),
        }
    }

    /// Oldest first.
    pub async fn list_transactions(&self, merchant_id: &str) -> Result<Vec<Transaction>> {
        self.store.transactions_for_merchant(merchant_id).await
    }

    pub async fn refunds(&self, transaction_id: TransactionId) -> Result<Vec<Refund>> {
        self.store.refunds_for(transaction_id).await
    }

    pub async fn merchant_balance(
        &self,
        merchant_id: &str,
        currency: &str,
    ) -> Result<MerchantBalance> {
        self.ledger
            .balance(merchant_id, &Currency::new(currency)?)
            .await
    }

    pub async fn merchant_balances(&self, merchant_id: &str) -> Result<Vec<MerchantBalance>> {
        self.ledger.balances(merchant_id).await
    }

    async fn load(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.store
            .find_transaction(transaction_id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(transaction_id))
    }

    fn bound_provider(&self, transaction: &Transaction) -> Result<(ProviderRef, String)> {
        let provider = self.providers.get(&transaction.provider)?;
        let reference = transaction.provider_reference.clone().ok_or_else(|| {
            PaymentError::Validation(format!(
                "Transaction {} has no provider reference",
                transaction.id
            ))
        })?;
        Ok((provider, reference))
    }

    /// Provider fee, else platform commission, else zero.
    fn fee_for(&self, transaction: &Transaction, result: &PaymentResult) -> Result<Decimal> {
        match (result.fee_amount(), self.config.commission_rate) {
            (Some(fee), _) => Ok(fee),
            (None, Some(rate)) => compute_commission(transaction.money.amount.value(), rate),
            (None, None) => Ok(Decimal::ZERO),
        }
    }
}
