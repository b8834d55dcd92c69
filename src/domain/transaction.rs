use super::money::{Amount, Money};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque string key/value pairs: payment method data, metadata and
/// provider-specific details all use this shape.
pub type Details = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransactionId {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| PaymentError::Validation(format!("Invalid transaction id '{}': {}", s, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
    Cancelled,
}

impl PaymentStatus {
    /// States no event can leave. `Completed` and `PartiallyRefunded` only
    /// accept refunds, which the state machine handles separately.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Paypal,
    Stripe,
    CreditCard,
    Mock,
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "paypal" => Ok(PaymentMethod::Paypal),
            "stripe" => Ok(PaymentMethod::Stripe),
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "mock" => Ok(PaymentMethod::Mock),
            other => Err(PaymentError::Validation(format!(
                "Unknown payment method '{}'",
                other
            ))),
        }
    }
}

/// One logical payment attempt of a merchant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub merchant_id: String,
    pub money: Money,
    pub payment_method: PaymentMethod,
    /// Registry name of the provider bound at creation.
    pub provider: String,
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    pub idempotency_key: Option<String>,
    /// Set before the provider is first asked to confirm. From then on the
    /// payment may have been captured and can no longer be cancelled.
    #[serde(default)]
    pub confirm_issued_at: Option<DateTime<Utc>>,
    pub amount_processed: Option<Amount>,
    pub fee_amount: Option<Decimal>,
    /// Sum of successful refunds.
    pub refunded_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Details,
}

impl Transaction {
    pub fn new(
        merchant_id: impl Into<String>,
        money: Money,
        payment_method: PaymentMethod,
        provider: impl Into<String>,
        idempotency_key: Option<String>,
        metadata: Details,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            merchant_id: merchant_id.into(),
            money,
            payment_method,
            provider: provider.into(),
            provider_reference: None,
            status: PaymentStatus::Pending,
            idempotency_key,
            confirm_issued_at: None,
            amount_processed: None,
            fee_amount: None,
            refunded_amount: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Binds the provider reference. Once set it can never change.
    pub fn assign_provider_reference(&mut self, reference: &str) -> Result<()> {
        match &self.provider_reference {
            None => {
                self.provider_reference = Some(reference.to_string());
                Ok(())
            }
            Some(existing) if existing == reference => Ok(()),
            Some(existing) => Err(PaymentError::Validation(format!(
                "Transaction {} is bound to provider reference '{}', got '{}'",
                self.id, existing, reference
            ))),
        }
    }

    pub fn confirm_issued(&self) -> bool {
        self.confirm_issued_at.is_some()
    }

    pub fn fee(&self) -> Decimal {
        self.fee_amount.unwrap_or(Decimal::ZERO)
    }

    /// Amount credited to the merchant on completion: `amount - fee`.
    pub fn settled_amount(&self) -> Decimal {
        self.money.amount.value() - self.fee()
    }

    /// What can still be refunded.
    pub fn refundable_remaining(&self) -> Decimal {
        self.settled_amount() - self.refunded_amount
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Succeeded,
    Failed,
}

/// A refund attempt against a transaction. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub provider_reference: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
