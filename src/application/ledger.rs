use super::coordinator::KeyedLocks;
use crate::domain::balance::MerchantBalance;
use crate::domain::money::Currency;
use crate::domain::ports::{Commit, PaymentStoreRef};
use crate::domain::transaction::PaymentStatus;
use crate::error::Result;
use rust_decimal::Decimal;
use tracing::{error, instrument};

/// A status change together with the money it moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub old: PaymentStatus,
    pub new: PaymentStatus,
    /// Transaction amount, or the refunded amount for refund transitions.
    pub amount: Decimal,
    pub fee: Decimal,
}

/// Per-merchant, per-currency balance bookkeeping.
///
/// Balance rows are only ever written here, and always in the same store
/// commit as the transaction record whose transition moved them.
pub struct Ledger {
    store: PaymentStoreRef,
    rows: KeyedLocks<(String, Currency)>,
}

impl Ledger {
    pub fn new(store: PaymentStoreRef) -> Self {
        Self {
            store,
            rows: KeyedLocks::new(),
        }
    }

    /// Applies `transition` to the balance row of the committed transaction
    /// and writes the row together with `commit`.
    ///
    /// The row lock is held from read to write. On a
    /// [`LedgerInvariantViolation`](crate::error::PaymentError::LedgerInvariantViolation)
    /// nothing is written, neither the row nor `commit`.
    #[instrument(skip(self, commit), fields(transaction_id = %commit.transaction.id))]
    pub async fn commit_transition(&self, commit: Commit, transition: Transition) -> Result<()> {
        let merchant_id = commit.transaction.merchant_id.clone();
        let currency = commit.transaction.money.currency.clone();

        let _row = self.rows.lock((merchant_id.clone(), currency.clone())).await;

        let current = self
            .store
            .get_balance(&merchant_id, &currency)
            .await?
            .unwrap_or_else(|| MerchantBalance::new(merchant_id.clone(), currency.clone()));

        let next = current
            .apply_transition(
                transition.old,
                transition.new,
                transition.amount,
                transition.fee,
            )
            .inspect_err(|e| {
                error!(%merchant_id, %currency, error = %e, "Rejected balance update")
            })?;

        let commit = if next.available != current.available || next.pending != current.pending {
            commit.with_balance(next)
        } else {
            commit
        };
        self.store.commit(commit).await
    }

    /// The row for (merchant, currency), or an all-zero row if none exists.
    pub async fn balance(&self, merchant_id: &str, currency: &Currency) -> Result<MerchantBalance> {
        Ok(self
            .store
            .get_balance(merchant_id, currency)
            .await?
            .unwrap_or_else(|| MerchantBalance::new(merchant_id, currency.clone())))
    }

    pub async fn balances(&self, merchant_id: &str) -> Result<Vec<MerchantBalance>> {
        self.store.balances_for_merchant(merchant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Balance, Money};
    use crate::domain::ports::PaymentStore;
    use crate::domain::transaction::{Details, PaymentMethod, Transaction};
    use crate::error::PaymentError;
    use crate::infrastructure::in_memory::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use PaymentStatus::*;

    fn transaction(amount: Decimal) -> Transaction {
        Transaction::new(
            "merchant-1",
            Money::new(amount, "USD").unwrap(),
            PaymentMethod::Mock,
            "mock",
            None,
            Details::new(),
        )
    }

    fn transition(
        old: PaymentStatus,
        new: PaymentStatus,
        amount: Decimal,
        fee: Decimal,
    ) -> Transition {
        Transition {
            old,
            new,
            amount,
            fee,
        }
    }

    #[tokio::test]
    async fn test_balance_follows_transitions() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let usd = Currency::new("USD").unwrap();
        let mut tx = transaction(dec!(100));

        tx.status = Processing;
        ledger
            .commit_transition(
                Commit::transaction(tx.clone()),
                transition(Pending, Processing, dec!(100), dec!(0)),
            )
            .await
            .unwrap();
        let row = ledger.balance("merchant-1", &usd).await.unwrap();
        assert_eq!(row.pending, Balance(dec!(100)));

        tx.status = Completed;
        ledger
            .commit_transition(
                Commit::transaction(tx.clone()),
                transition(Processing, Completed, dec!(100), dec!(3)),
            )
            .await
            .unwrap();
        let row = ledger.balance("merchant-1", &usd).await.unwrap();
        assert_eq!(row.pending, Balance::ZERO);
        assert_eq!(row.available, Balance(dec!(97)));

        // The stored transaction moved along with the row
        assert_eq!(
            store.find_transaction(tx.id).await.unwrap().unwrap().status,
            Completed
        );
    }

    #[tokio::test]
    async fn test_violation_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let mut tx = transaction(dec!(10));
        tx.status = Refunded;

        let err = ledger
            .commit_transition(
                Commit::transaction(tx.clone()),
                transition(Completed, Refunded, dec!(10), dec!(0)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::LedgerInvariantViolation { .. }));
        assert!(store.find_transaction(tx.id).await.unwrap().is_none());
        assert!(ledger.balances("merchant-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_on_one_row_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(Ledger::new(store));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let mut tx = transaction(dec!(5));
                    tx.status = Processing;
                    ledger
                        .commit_transition(
                            Commit::transaction(tx),
                            transition(Pending, Processing, dec!(5), dec!(0)),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let row = ledger
            .balance("merchant-1", &Currency::new("USD").unwrap())
            .await
            .unwrap();
        assert_eq!(row.pending, Balance(dec!(100)));
    }
}
