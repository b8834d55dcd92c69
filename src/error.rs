use crate::domain::money::Currency;
use crate::domain::transaction::{PaymentStatus, TransactionId};
use miette::Diagnostic;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Diagnostic, Debug)]
pub enum PaymentError {
    #[error("Invalid amount: {0} (must be > 0 and <= 999999.99)")]
    #[diagnostic(code(payflow::validation::amount))]
    InvalidAmount(Decimal),

    #[error("Invalid currency code: '{0}' (expected 3 uppercase letters)")]
    #[diagnostic(code(payflow::validation::currency))]
    InvalidCurrency(String),

    #[error("Validation error: {0}")]
    #[diagnostic(code(payflow::validation))]
    Validation(String),

    #[error("Provider '{0}' is not supported")]
    #[diagnostic(
        code(payflow::config::provider_not_supported),
        help("register the provider in the ProviderRegistry before building the engine")
    )]
    ProviderNotSupported(String),

    #[error("Invalid configuration for provider '{provider}': missing keys {}", .missing.join(", "))]
    #[diagnostic(code(payflow::config::invalid_provider_config))]
    InvalidProviderConfig {
        provider: String,
        missing: Vec<String>,
    },

    #[error("Illegal transition from {from} on {event}")]
    #[diagnostic(code(payflow::state::illegal_transition))]
    IllegalTransition {
        from: PaymentStatus,
        event: &'static str,
    },

    #[error("Transaction {0} not found")]
    #[diagnostic(code(payflow::not_found))]
    TransactionNotFound(TransactionId),

    #[error("Ledger invariant violated for merchant {merchant_id} ({currency}): {reason}")]
    #[diagnostic(
        code(payflow::ledger::invariant),
        help("the use case was rolled back; no balance or transaction change was written")
    )]
    LedgerInvariantViolation {
        merchant_id: String,
        currency: Currency,
        reason: String,
    },

    #[error("Invalid payment result: {0}")]
    #[diagnostic(code(payflow::provider::invalid_result))]
    InvalidPaymentResult(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(payflow::internal))]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse classification a transport layer can map onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Conflict,
    NotFound,
    Ledger,
    Internal,
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::InvalidAmount(_)
            | PaymentError::InvalidCurrency(_)
            | PaymentError::Validation(_) => ErrorKind::Validation,
            PaymentError::ProviderNotSupported(_) | PaymentError::InvalidProviderConfig { .. } => {
                ErrorKind::Configuration
            }
            PaymentError::IllegalTransition { .. } => ErrorKind::Conflict,
            PaymentError::TransactionNotFound(_) => ErrorKind::NotFound,
            PaymentError::LedgerInvariantViolation { .. } => ErrorKind::Ledger,
            PaymentError::InvalidPaymentResult(_) | PaymentError::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

impl From<csv::Error> for PaymentError {
    fn from(e: csv::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(e: std::io::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            PaymentError::InvalidAmount(dec!(0)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PaymentError::ProviderNotSupported("stripe".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            PaymentError::IllegalTransition {
                from: PaymentStatus::Failed,
                event: "confirm"
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(PaymentError::internal("boom").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_invalid_provider_config_lists_missing_keys() {
        let err = PaymentError::InvalidProviderConfig {
            provider: "paypal".into(),
            missing: vec!["client_id".into(), "client_secret".into()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for provider 'paypal': missing keys client_id, client_secret"
        );
    }
}
