use super::money::{Amount, validate_amount};
use super::transaction::{Details, PaymentStatus};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a failed provider operation should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts and connection failures. Worth another attempt.
    Transient,
    /// Declines, validation rejections, unknown references, auth failures.
    Definitive,
}

/// Normalized outcome of a single provider operation.
///
/// Every provider converts its own responses and faults into this shape, so
/// the engine and ledger never see provider-specific data other than the
/// opaque [`details`](PaymentResult::details) map. Values are immutable once
/// built; success results are only obtainable through
/// [`PaymentResultBuilder::build`], which enforces the money invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredResult")]
pub struct PaymentResult {
    success: bool,
    provider_reference: Option<String>,
    status: PaymentStatus,
    error_message: Option<String>,
    fee_amount: Option<Decimal>,
    amount_processed: Option<Amount>,
    risk_score: Option<u32>,
    details: Details,
    failure: Option<FailureKind>,
    created_at: DateTime<Utc>,
}

impl PaymentResult {
    /// Starts a successful result for the given provider reference.
    pub fn succeeded(
        provider_reference: impl Into<String>,
        status: PaymentStatus,
    ) -> PaymentResultBuilder {
        PaymentResultBuilder {
            provider_reference: provider_reference.into(),
            status,
            fee_amount: None,
            amount_processed: None,
            risk_score: None,
            details: Details::new(),
        }
    }

    pub fn failed(kind: FailureKind, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_reference: None,
            status: PaymentStatus::Failed,
            error_message: Some(error_message.into()),
            fee_amount: None,
            amount_processed: None,
            risk_score: None,
            details: Details::new(),
            failure: Some(kind),
            created_at: Utc::now(),
        }
    }

    /// A definitive business outcome such as a decline.
    pub fn declined(error_message: impl Into<String>) -> Self {
        Self::failed(FailureKind::Definitive, error_message)
    }

    pub fn transient(error_message: impl Into<String>) -> Self {
        Self::failed(FailureKind::Transient, error_message)
    }

    /// Attaches the provider reference to a failed result, e.g. when a confirm
    /// is rejected for a payment the provider does know about.
    pub fn with_provider_reference(mut self, reference: impl Into<String>) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn provider_reference(&self) -> Option<&str> {
        self.provider_reference.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn fee_amount(&self) -> Option<Decimal> {
        self.fee_amount
    }

    pub fn amount_processed(&self) -> Option<Amount> {
        self.amount_processed
    }

    pub fn risk_score(&self) -> Option<u32> {
        self.risk_score
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_transient_failure(&self) -> bool {
        !self.success && self.failure == Some(FailureKind::Transient)
    }
}

pub struct PaymentResultBuilder {
    provider_reference: String,
    status: PaymentStatus,
    fee_amount: Option<Decimal>,
    amount_processed: Option<Decimal>,
    risk_score: Option<u32>,
    details: Details,
}

impl PaymentResultBuilder {
    pub fn fee_amount(mut self, fee: Decimal) -> Self {
        self.fee_amount = Some(fee);
        self
    }

    pub fn amount_processed(mut self, amount: Decimal) -> Self {
        self.amount_processed = Some(amount);
        self
    }

    pub fn risk_score(mut self, score: u32) -> Self {
        self.risk_score = Some(score);
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<PaymentResult> {
        if self.provider_reference.is_empty() {
            return Err(PaymentError::InvalidPaymentResult(
                "Successful result without a provider reference".to_string(),
            ));
        }
        let amount_processed = match self.amount_processed {
            Some(amount) if !validate_amount(amount) => {
                return Err(PaymentError::InvalidPaymentResult(format!(
                    "Invalid amount processed: {}",
                    amount
                )));
            }
            Some(amount) => Some(Amount::new(amount)?),
            None => None,
        };
        if let Some(fee) = self.fee_amount
            && fee.is_sign_negative()
        {
            return Err(PaymentError::InvalidPaymentResult(format!(
                "Negative fee amount: {}",
                fee
            )));
        }

        Ok(PaymentResult {
            success: true,
            provider_reference: Some(self.provider_reference),
            status: self.status,
            error_message: None,
            fee_amount: self.fee_amount,
            amount_processed,
            risk_score: self.risk_score,
            details: self.details,
            failure: None,
            created_at: Utc::now(),
        })
    }
}

/// Wire shape of a [`PaymentResult`]; read back through the same checks as
/// freshly built results.
#[derive(Deserialize)]
struct StoredResult {
    success: bool,
    provider_reference: Option<String>,
    status: PaymentStatus,
    error_message: Option<String>,
    fee_amount: Option<Decimal>,
    amount_processed: Option<Decimal>,
    risk_score: Option<u32>,
    #[serde(default)]
    details: Details,
    failure: Option<FailureKind>,
    created_at: DateTime<Utc>,
}

impl TryFrom<StoredResult> for PaymentResult {
    type Error = PaymentError;

    fn try_from(stored: StoredResult) -> Result<Self> {
        if stored.success {
            let mut builder = PaymentResult::succeeded(
                stored.provider_reference.unwrap_or_default(),
                stored.status,
            );
            builder.fee_amount = stored.fee_amount;
            builder.amount_processed = stored.amount_processed;
            builder.risk_score = stored.risk_score;
            builder.details = stored.details;
            let mut result = builder.build()?;
            result.created_at = stored.created_at;
            return Ok(result);
        }

        let (Some(kind), Some(message)) = (stored.failure, stored.error_message) else {
            return Err(PaymentError::InvalidPaymentResult(
                "Failed result without failure kind and error message".to_string(),
            ));
        };
        let mut result = PaymentResult::failed(kind, message);
        result.provider_reference = stored.provider_reference;
        result.created_at = stored.created_at;
        Ok(result)
    }
}
