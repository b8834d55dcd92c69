use super::money::{Balance, Currency};
use super::transaction::PaymentStatus;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-merchant, per-currency balance row.
///
/// Only [`MerchantBalance::apply_transition`] changes the figures, and it
/// either returns a fully updated non-negative row or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantBalance {
    pub merchant_id: String,
    pub currency: Currency,
    /// Funds settled to the merchant.
    pub available: Balance,
    /// Funds of payments created but not yet confirmed.
    pub pending: Balance,
    pub updated_at: DateTime<Utc>,
}

impl MerchantBalance {
    pub fn new(merchant_id: impl Into<String>, currency: Currency) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            currency,
            available: Balance::ZERO,
            pending: Balance::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Returns the row as it looks after `old -> new`.
    ///
    /// `amount` is the transaction amount for create/confirm/cancel/fail
    /// transitions and the refunded amount for refund transitions. `fee` is
    /// only used when entering `Completed`.
    pub fn apply_transition(
        &self,
        old: PaymentStatus,
        new: PaymentStatus,
        amount: Decimal,
        fee: Decimal,
    ) -> Result<Self> {
        let mut next = self.clone();
        let amount = Balance::new(amount);

        if old != new {
            match new {
                PaymentStatus::Processing => next.pending += amount,
                PaymentStatus::Completed => {
                    let settled = amount - Balance::new(fee);
                    if settled.is_negative() {
                        return Err(self.violation(format!(
                            "fee {} exceeds payment amount {}",
                            fee, amount
                        )));
                    }
                    next.pending -= amount;
                    next.available += settled;
                }
                PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded => {
                    next.available -= amount;
                }
                PaymentStatus::Failed | PaymentStatus::Cancelled
                    if old == PaymentStatus::Processing =>
                {
                    next.pending -= amount;
                }
                _ => {}
            }
        } else if matches!(new, PaymentStatus::PartiallyRefunded) {
            // A second partial refund keeps the status but still debits.
            next.available -= amount;
        }

        if next.available.is_negative() {
            return Err(self.violation(format!(
                "available would become {} on {} -> {}",
                next.available, old, new
            )));
        }
        if next.pending.is_negative() {
            return Err(self.violation(format!(
                "pending would become {} on {} -> {}",
                next.pending, old, new
            )));
        }

        next.updated_at = Utc::now();
        Ok(next)
    }

    fn violation(&self, reason: String) -> PaymentError {
        PaymentError::LedgerInvariantViolation {
            merchant_id: self.merchant_id.clone(),
            currency: self.currency.clone(),
            reason,
        }
    }
}
