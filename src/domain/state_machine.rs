//! Legal states and transitions of a single transaction.
//!
//! ```text
//! PENDING ──create ok──▶ PROCESSING ──confirm ok──▶ COMPLETED ──refund──▶ PARTIALLY_REFUNDED
//!    │                      │                           │                      │
//!    └─create failed─▶ FAILED ◀──confirm failed─────────┘                      └─refund──▶ REFUNDED
//!
//! PENDING | PROCESSING ──cancel──▶ CANCELLED   (only while no confirm was issued)
//! ```
//!
//! [`next_state`] is pure: it never touches providers, storage or balances.

use super::payment_result::PaymentResult;
use super::transaction::{PaymentStatus, Transaction};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;

/// An outcome fed into the state machine.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Created(&'a PaymentResult),
    Confirmed(&'a PaymentResult),
    Refunded {
        result: &'a PaymentResult,
        /// Successful refunds so far, including this one if it succeeded.
        cumulative: Decimal,
        /// Total amount that can ever be refunded.
        refundable: Decimal,
    },
    Cancelled,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Created(_) => EventKind::Create,
            Event::Confirmed(_) => EventKind::Confirm,
            Event::Refunded { .. } => EventKind::Refund,
            Event::Cancelled => EventKind::Cancel,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// An event stripped of its outcome, for checks made before a provider is
/// called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Confirm,
    Refund,
    Cancel,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Confirm => "confirm",
            EventKind::Refund => "refund",
            EventKind::Cancel => "cancel",
        }
    }
}

/// Fails with `IllegalTransition` unless `current` accepts events of `kind`,
/// whatever their outcome.
pub fn ensure_accepts(current: PaymentStatus, kind: EventKind) -> Result<()> {
    use PaymentStatus::*;

    let accepted = match kind {
        EventKind::Create => current == Pending,
        EventKind::Confirm => current == Processing,
        EventKind::Refund => matches!(current, Completed | PartiallyRefunded),
        EventKind::Cancel => matches!(current, Pending | Processing),
    };
    if accepted {
        Ok(())
    } else {
        Err(PaymentError::IllegalTransition {
            from: current,
            event: kind.name(),
        })
    }
}

/// Cancellation is local, so it is refused once a confirm has reached the
/// provider, even if that confirm never got recorded as an outcome.
pub fn ensure_cancellable(transaction: &Transaction) -> Result<()> {
    ensure_accepts(transaction.status, EventKind::Cancel)?;
    if transaction.confirm_issued() {
        return Err(PaymentError::IllegalTransition {
            from: transaction.status,
            event: EventKind::Cancel.name(),
        });
    }
    Ok(())
}

pub fn next_state(current: PaymentStatus, event: &Event<'_>) -> Result<PaymentStatus> {
    use PaymentStatus::*;

    match (current, event) {
        (Pending, Event::Created(result)) => Ok(if result.success() {
            Processing
        } else {
            Failed
        }),
        (Processing, Event::Confirmed(result)) => Ok(if result.success() {
            Completed
        } else {
            Failed
        }),
        (
            Completed | PartiallyRefunded,
            Event::Refunded {
                result,
                cumulative,
                refundable,
            },
        ) => {
            // A failed refund never disturbs the completed payment.
            if !result.success() {
                Ok(current)
            } else if cumulative >= refundable {
                Ok(Refunded)
            } else {
                Ok(PartiallyRefunded)
            }
        }
        (Pending | Processing, Event::Cancelled) => Ok(Cancelled),
        (from, event) => Err(PaymentError::IllegalTransition {
            from,
            event: event.name(),
        }),
    }
}
