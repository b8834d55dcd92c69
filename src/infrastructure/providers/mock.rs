use crate::domain::money::{Money, compute_commission};
use crate::domain::payment_result::{FailureKind, PaymentResult};
use crate::domain::ports::{PaymentProvider, REQUEST_ID};
use crate::domain::transaction::{Details, PaymentStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const MOCK_PROVIDER: &str = "mock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateIntent,
    Confirm,
    Refund,
    Status,
}

#[derive(Debug, Clone)]
struct MockPayment {
    money: Money,
    status: PaymentStatus,
    fee: Decimal,
    refunded: Decimal,
}

impl MockPayment {
    /// What the merchant received and can still give back.
    fn refundable(&self) -> Decimal {
        self.money.amount.value() - self.fee - self.refunded
    }
}

#[derive(Default)]
struct State {
    payments: HashMap<String, MockPayment>,
    /// Request id of every accepted create, mapped to its payment reference.
    requests: HashMap<String, String>,
    scripted: HashMap<Operation, VecDeque<PaymentResult>>,
    calls: HashMap<Operation, usize>,
}

/// In-process provider keeping its own payment book.
///
/// Behaves like a real processor from the engine's point of view: it assigns
/// references, requires a `payer_id` to confirm, charges a percentage fee on
/// capture and tracks refunds against what was settled. A create carrying a
/// request id it has already accepted returns the existing payment. Failures
/// can be scripted per operation with [`MockProvider::fail_next`], and every
/// call is counted.
///
/// The configured latency is spent after the operation took effect, so a
/// caller that gives up early still leaves the payment booked.
pub struct MockProvider {
    name: String,
    fee_rate: Decimal,
    latency: Option<Duration>,
    decline_above: Option<Decimal>,
    state: Mutex<State>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: MOCK_PROVIDER.to_string(),
            fee_rate: Decimal::ZERO,
            latency: None,
            decline_above: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fee charged on capture, in percent of the payment amount.
    pub fn with_fee_rate(mut self, rate_percent: Decimal) -> Self {
        self.fee_rate = rate_percent;
        self
    }

    /// Delay applied to every call before it is answered.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Declines create requests above `limit`.
    pub fn decline_above(mut self, limit: Decimal) -> Self {
        self.decline_above = Some(limit);
        self
    }

    /// Makes the next call of `operation` fail with `kind`. Queues up when
    /// called repeatedly.
    pub fn fail_next(&self, operation: Operation, kind: FailureKind, message: &str) {
        self.state()
            .scripted
            .entry(operation)
            .or_default()
            .push_back(PaymentResult::failed(kind, message));
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of payments in the book.
    pub fn payments(&self) -> usize {
        self.state().payments.len()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the book is
        // still consistent because every mutation is a single insert.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Counts the call and returns a scripted failure if one is queued.
    fn enter(&self, operation: Operation) -> Option<PaymentResult> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        let scripted = state
            .scripted
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        if scripted.is_some() {
            debug!(provider = %self.name, ?operation, "Returning scripted failure");
        }
        scripted
    }

    async fn respond(&self, result: PaymentResult) -> PaymentResult {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        result
    }

    fn create_now(&self, money: &Money, metadata: &Details) -> PaymentResult {
        if let Some(limit) = self.decline_above
            && money.amount.value() > limit
        {
            return PaymentResult::declined(format!("Amount {} exceeds limit {}", money, limit));
        }

        let mut state = self.state();
        let request_id = metadata.get(REQUEST_ID).cloned();
        let known = request_id
            .as_ref()
            .and_then(|id| state.requests.get(id))
            .cloned();
        let reference = match known {
            Some(reference) => {
                debug!(provider = %self.name, %reference, "Create replayed by request id");
                reference
            }
            None => {
                let reference = format!("MOCK-{}", Uuid::new_v4().simple());
                state.payments.insert(
                    reference.clone(),
                    MockPayment {
                        money: money.clone(),
                        status: PaymentStatus::Pending,
                        fee: Decimal::ZERO,
                        refunded: Decimal::ZERO,
                    },
                );
                if let Some(id) = request_id {
                    state.requests.insert(id, reference.clone());
                }
                reference
            }
        };

        or_declined(
            PaymentResult::succeeded(&reference, PaymentStatus::Pending)
                .detail(
                    "approval_url",
                    format!("https://mock.payflow.invalid/approve/{}", reference),
                )
                .build(),
        )
    }

    fn confirm_now(&self, provider_reference: &str, method_data: &Details) -> PaymentResult {
        let mut state = self.state();
        let Some(payment) = state.payments.get_mut(provider_reference) else {
            return PaymentResult::declined(format!("Unknown payment {}", provider_reference));
        };
        let Some(payer_id) = method_data.get("payer_id").filter(|p| !p.is_empty()) else {
            return PaymentResult::declined("Missing payer_id")
                .with_provider_reference(provider_reference);
        };
        if payment.status != PaymentStatus::Pending {
            return PaymentResult::declined(format!("Payment is already {}", payment.status))
                .with_provider_reference(provider_reference);
        }

        let fee = if self.fee_rate.is_zero() {
            Decimal::ZERO
        } else {
            match compute_commission(payment.money.amount.value(), self.fee_rate) {
                Ok(fee) => fee,
                Err(e) => return PaymentResult::declined(e.to_string()),
            }
        };
        payment.status = PaymentStatus::Completed;
        payment.fee = fee;

        or_declined(
            PaymentResult::succeeded(provider_reference, PaymentStatus::Completed)
                .amount_processed(payment.money.amount.value())
                .fee_amount(fee)
                .detail("payer_id", payer_id.as_str())
                .build(),
        )
    }

    fn refund_now(
        &self,
        provider_reference: &str,
        amount: Option<&Money>,
        reason: Option<&str>,
    ) -> PaymentResult {
        let mut state = self.state();
        let Some(payment) = state.payments.get_mut(provider_reference) else {
            return PaymentResult::declined(format!("Unknown payment {}", provider_reference));
        };
        if !matches!(
            payment.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        ) {
            return PaymentResult::declined(format!(
                "Cannot refund a payment that is {}",
                payment.status
            ));
        }

        let remaining = payment.refundable();
        let requested = amount.map(|m| m.amount.value()).unwrap_or(remaining);
        if requested > remaining {
            return PaymentResult::declined(format!(
                "Refund of {} exceeds remaining {}",
                requested, remaining
            ));
        }

        payment.refunded += requested;
        payment.status = if payment.refundable().is_zero() {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        let mut builder = PaymentResult::succeeded(
            format!("MOCK-REF-{}", Uuid::new_v4().simple()),
            payment.status,
        )
        .amount_processed(requested)
        .detail("sale_id", provider_reference);
        if let Some(reason) = reason {
            builder = builder.detail("reason", reason);
        }
        or_declined(builder.build())
    }

    fn status_now(&self, provider_reference: &str) -> PaymentResult {
        let state = self.state();
        match state.payments.get(provider_reference) {
            Some(payment) => or_declined(
                PaymentResult::succeeded(provider_reference, payment.status)
                    .amount_processed(payment.money.amount.value())
                    .detail("currency", payment.money.currency.as_str())
                    .build(),
            ),
            None => PaymentResult::declined(format!("Unknown payment {}", provider_reference)),
        }
    }
}

fn or_declined(result: crate::error::Result<PaymentResult>) -> PaymentResult {
    result.unwrap_or_else(|e| PaymentResult::declined(e.to_string()))
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_payment_intent(
        &self,
        money: &Money,
        _method_data: &Details,
        metadata: &Details,
    ) -> PaymentResult {
        let result = match self.enter(Operation::CreateIntent) {
            Some(scripted) => scripted,
            None => self.create_now(money, metadata),
        };
        self.respond(result).await
    }

    async fn confirm_payment(
        &self,
        provider_reference: &str,
        method_data: &Details,
    ) -> PaymentResult {
        let result = match self.enter(Operation::Confirm) {
            Some(scripted) => scripted.with_provider_reference(provider_reference),
            None => self.confirm_now(provider_reference, method_data),
        };
        self.respond(result).await
    }

    async fn refund_payment(
        &self,
        provider_reference: &str,
        amount: Option<&Money>,
        reason: Option<&str>,
    ) -> PaymentResult {
        let result = match self.enter(Operation::Refund) {
            Some(scripted) => scripted,
            None => self.refund_now(provider_reference, amount, reason),
        };
        self.respond(result).await
    }

    async fn get_payment_status(&self, provider_reference: &str) -> PaymentResult {
        let result = match self.enter(Operation::Status) {
            Some(scripted) => scripted,
            None => self.status_now(provider_reference),
        };
        self.respond(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, "USD").unwrap()
    }

    fn payer() -> Details {
        Details::from([("payer_id".to_string(), "PAYER-1".to_string())])
    }

    #[tokio::test]
    async fn test_mock_full_lifecycle() {
        let provider = MockProvider::new().with_fee_rate(dec!(3));

        let created = provider
            .create_payment_intent(&usd(dec!(50.00)), &Details::new(), &Details::new())
            .await;
        assert!(created.success());
        assert_eq!(created.status(), PaymentStatus::Pending);
        assert!(created.details().contains_key("approval_url"));
        let reference = created.provider_reference().unwrap().to_string();

        let confirmed = provider.confirm_payment(&reference, &payer()).await;
        assert!(confirmed.success());
        assert_eq!(confirmed.status(), PaymentStatus::Completed);
        assert_eq!(confirmed.fee_amount(), Some(dec!(1.50)));
        assert_eq!(confirmed.amount_processed().unwrap().value(), dec!(50.00));

        let refund = provider
            .refund_payment(&reference, Some(&usd(dec!(20.00))), Some("damaged"))
            .await;
        assert!(refund.success());
        assert_eq!(refund.status(), PaymentStatus::PartiallyRefunded);

        let status = provider.get_payment_status(&reference).await;
        assert_eq!(status.status(), PaymentStatus::PartiallyRefunded);

        assert_eq!(provider.calls(Operation::CreateIntent), 1);
        assert_eq!(provider.calls(Operation::Confirm), 1);
        assert_eq!(provider.calls(Operation::Refund), 1);
        assert_eq!(provider.calls(Operation::Status), 1);
    }

    #[tokio::test]
    async fn test_mock_confirm_without_payer_is_a_normal_failure() {
        let provider = MockProvider::new();
        let created = provider
            .create_payment_intent(&usd(dec!(10)), &Details::new(), &Details::new())
            .await;
        let reference = created.provider_reference().unwrap();

        let result = provider.confirm_payment(reference, &Details::new()).await;
        assert!(!result.success());
        assert_eq!(result.error_message(), Some("Missing payer_id"));
        assert_eq!(result.failure(), Some(FailureKind::Definitive));
        assert_eq!(result.provider_reference(), Some(reference));
    }

    #[tokio::test]
    async fn test_mock_declines_above_limit() {
        let provider = MockProvider::new().decline_above(dec!(100));
        let result = provider
            .create_payment_intent(&usd(dec!(100.01)), &Details::new(), &Details::new())
            .await;
        assert!(!result.success());
        assert_eq!(result.status(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_mock_scripted_failures_are_consumed_in_order() {
        let provider = MockProvider::new();
        provider.fail_next(Operation::CreateIntent, FailureKind::Transient, "timeout");

        let first = provider
            .create_payment_intent(&usd(dec!(10)), &Details::new(), &Details::new())
            .await;
        assert!(first.is_transient_failure());

        let second = provider
            .create_payment_intent(&usd(dec!(10)), &Details::new(), &Details::new())
            .await;
        assert!(second.success());
        assert_eq!(provider.calls(Operation::CreateIntent), 2);
    }

    #[tokio::test]
    async fn test_mock_full_refund_when_amount_omitted() {
        let provider = MockProvider::new();
        let created = provider
            .create_payment_intent(&usd(dec!(30)), &Details::new(), &Details::new())
            .await;
        let reference = created.provider_reference().unwrap().to_string();
        provider.confirm_payment(&reference, &payer()).await;

        let refund = provider.refund_payment(&reference, None, None).await;
        assert!(refund.success());
        assert_eq!(refund.status(), PaymentStatus::Refunded);
        assert_eq!(refund.amount_processed().unwrap().value(), dec!(30));

        let again = provider.refund_payment(&reference, None, None).await;
        assert!(!again.success());
    }

    #[tokio::test]
    async fn test_mock_refunds_are_capped_at_the_settled_amount() {
        let provider = MockProvider::new().with_fee_rate(dec!(3));
        let created = provider
            .create_payment_intent(&usd(dec!(100)), &Details::new(), &Details::new())
            .await;
        let reference = created.provider_reference().unwrap().to_string();
        provider.confirm_payment(&reference, &payer()).await;

        let too_much = provider
            .refund_payment(&reference, Some(&usd(dec!(97.01))), None)
            .await;
        assert!(!too_much.success());

        let rest = provider.refund_payment(&reference, None, None).await;
        assert!(rest.success());
        assert_eq!(rest.status(), PaymentStatus::Refunded);
        assert_eq!(rest.amount_processed().unwrap().value(), dec!(97));
    }

    #[tokio::test]
    async fn test_mock_create_with_known_request_id_returns_existing_payment() {
        let provider = MockProvider::new();
        let metadata = Details::from([(REQUEST_ID.to_string(), "m1:order-1".to_string())]);

        let first = provider
            .create_payment_intent(&usd(dec!(10)), &Details::new(), &metadata)
            .await;
        let second = provider
            .create_payment_intent(&usd(dec!(10)), &Details::new(), &metadata)
            .await;
        let other = provider
            .create_payment_intent(&usd(dec!(10)), &Details::new(), &Details::new())
            .await;

        assert_eq!(first.provider_reference(), second.provider_reference());
        assert_ne!(first.provider_reference(), other.provider_reference());
        assert_eq!(provider.calls(Operation::CreateIntent), 3);
        assert_eq!(provider.payments(), 2);
    }
}
