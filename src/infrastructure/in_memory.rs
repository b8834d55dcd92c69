use crate::domain::balance::MerchantBalance;
use crate::domain::money::Currency;
use crate::domain::ports::{Commit, IdempotencyRecord, PaymentStore};
use crate::domain::transaction::{Refund, Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    transactions: HashMap<TransactionId, Transaction>,
    refunds: HashMap<TransactionId, Vec<Refund>>,
    balances: HashMap<(String, Currency), MerchantBalance>,
    idempotency: HashMap<(String, String), IdempotencyRecord>,
}

/// A thread-safe in-memory store.
///
/// All tables sit behind a single `RwLock`, so a [`Commit`] is applied under
/// one write guard and readers never observe half of it. Cloning shares the
/// underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn find_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.get(&id).cloned())
    }

    async fn find_idempotency_record(
        &self,
        merchant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .idempotency
            .get(&(merchant_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn transactions_for_merchant(&self, merchant_id: &str) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut transactions: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.merchant_id == merchant_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|tx| tx.created_at);
        Ok(transactions)
    }

    async fn refunds_for(&self, id: TransactionId) -> Result<Vec<Refund>> {
        let tables = self.tables.read().await;
        Ok(tables.refunds.get(&id).cloned().unwrap_or_default())
    }

    async fn get_balance(
        &self,
        merchant_id: &str,
        currency: &Currency,
    ) -> Result<Option<MerchantBalance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .balances
            .get(&(merchant_id.to_string(), currency.clone()))
            .cloned())
    }

    async fn balances_for_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantBalance>> {
        let tables = self.tables.read().await;
        let mut balances: Vec<MerchantBalance> = tables
            .balances
            .values()
            .filter(|b| b.merchant_id == merchant_id)
            .cloned()
            .collect();
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(balances)
    }

    async fn commit(&self, commit: Commit) -> Result<()> {
        let mut tables = self.tables.write().await;

        if let Some(refund) = commit.refund {
            tables
                .refunds
                .entry(refund.transaction_id)
                .or_default()
                .push(refund);
        }
        if let Some(balance) = commit.balance {
            tables
                .balances
                .insert((balance.merchant_id.clone(), balance.currency.clone()), balance);
        }
        if let Some(record) = commit.idempotency {
            tables
                .idempotency
                .insert((record.merchant_id.clone(), record.key.clone()), record);
        }
        tables
            .transactions
            .insert(commit.transaction.id, commit.transaction);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Balance, Money};
    use crate::domain::payment_result::PaymentResult;
    use crate::domain::transaction::{Details, PaymentMethod, PaymentStatus, RefundStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transaction(merchant: &str) -> Transaction {
        Transaction::new(
            merchant,
            Money::new(dec!(100.0), "USD").unwrap(),
            PaymentMethod::Mock,
            "mock",
            Some("key-1".to_string()),
            Details::new(),
        )
    }

    #[tokio::test]
    async fn test_in_memory_commit_and_lookup() {
        let store = InMemoryStore::new();
        let tx = transaction("m1");
        let mut balance = MerchantBalance::new("m1", Currency::new("USD").unwrap());
        balance.pending = Balance::new(dec!(100.0));
        let record = IdempotencyRecord {
            merchant_id: "m1".to_string(),
            key: "key-1".to_string(),
            transaction_id: tx.id,
            result: PaymentResult::succeeded("PAY-1", PaymentStatus::Pending)
                .build()
                .unwrap(),
        };

        store
            .commit(
                Commit::transaction(tx.clone())
                    .with_balance(balance.clone())
                    .with_idempotency(record.clone()),
            )
            .await
            .unwrap();

        assert_eq!(store.find_transaction(tx.id).await.unwrap(), Some(tx.clone()));
        assert_eq!(
            store
                .get_balance("m1", &Currency::new("USD").unwrap())
                .await
                .unwrap(),
            Some(balance)
        );
        assert_eq!(
            store.find_idempotency_record("m1", "key-1").await.unwrap(),
            Some(record)
        );
        // Idempotency keys are scoped per merchant
        assert!(
            store
                .find_idempotency_record("m2", "key-1")
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.find_transaction(TransactionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_refunds_accumulate() {
        let store = InMemoryStore::new();
        let tx = transaction("m1");
        for amount in [dec!(10), dec!(5)] {
            let refund = Refund {
                id: Uuid::new_v4(),
                transaction_id: tx.id,
                amount: Amount::new(amount).unwrap(),
                reason: None,
                status: RefundStatus::Succeeded,
                provider_reference: Some("REF".to_string()),
                error_message: None,
                created_at: Utc::now(),
            };
            store
                .commit(Commit::transaction(tx.clone()).with_refund(refund))
                .await
                .unwrap();
        }

        let refunds = store.refunds_for(tx.id).await.unwrap();
        assert_eq!(refunds.len(), 2);
        assert!(store.refunds_for(TransactionId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_merchant_queries() {
        let store = InMemoryStore::new();
        store.commit(Commit::transaction(transaction("m1"))).await.unwrap();
        store.commit(Commit::transaction(transaction("m1"))).await.unwrap();
        store.commit(Commit::transaction(transaction("m2"))).await.unwrap();

        assert_eq!(store.transactions_for_merchant("m1").await.unwrap().len(), 2);
        assert_eq!(store.transactions_for_merchant("m2").await.unwrap().len(), 1);
        assert!(store.balances_for_merchant("m1").await.unwrap().is_empty());
    }
}
