use crate::domain::balance::MerchantBalance;
use crate::domain::money::Currency;
use crate::domain::ports::{Commit, IdempotencyRecord, PaymentStore};
use crate::domain::transaction::{Refund, Transaction, TransactionId};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Column Family for transaction records, keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for refunds, keyed by `<transaction id>/<refund id>`.
pub const CF_REFUNDS: &str = "refunds";
/// Column Family for merchant balances, keyed by `pair_key` of merchant and
/// currency.
pub const CF_BALANCES: &str = "balances";
/// Column Family for idempotency records, keyed by `pair_key` of merchant
/// and idempotency key.
pub const CF_IDEMPOTENCY: &str = "idempotency";

const COLUMN_FAMILIES: [&str; 4] = [CF_TRANSACTIONS, CF_REFUNDS, CF_BALANCES, CF_IDEMPOTENCY];

/// A persistent store implementation using RocksDB.
///
/// Each record type lives in its own Column Family. A [`Commit`] is written
/// as a single `WriteBatch`, which RocksDB applies atomically.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{} column family not found", name)))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decodes every value whose key starts with `prefix`.
    fn scan<T: DeserializeOwned>(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }
}

/// `<len(left) as u32 BE><left><right>`. The length prefix keeps pairs apart
/// whatever bytes the ids contain, and `pair_key(left, "")` is a scan prefix
/// matching exactly the pairs of `left`.
fn pair_key(left: &str, right: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + left.len() + right.len());
    key.extend_from_slice(&(left.len() as u32).to_be_bytes());
    key.extend_from_slice(left.as_bytes());
    key.extend_from_slice(right.as_bytes());
    key
}

fn refund_prefix(id: TransactionId) -> Vec<u8> {
    format!("{}/", id).into_bytes()
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn find_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.get(CF_TRANSACTIONS, id.to_string().as_bytes())
    }

    async fn find_idempotency_record(
        &self,
        merchant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        self.get(CF_IDEMPOTENCY, &pair_key(merchant_id, key))
    }

    async fn transactions_for_merchant(&self, merchant_id: &str) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS, &[])?
            .into_iter()
            .filter(|tx| tx.merchant_id == merchant_id)
            .collect();
        transactions.sort_by_key(|tx| tx.created_at);
        Ok(transactions)
    }

    async fn refunds_for(&self, id: TransactionId) -> Result<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self.scan(CF_REFUNDS, &refund_prefix(id))?;
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn get_balance(
        &self,
        merchant_id: &str,
        currency: &Currency,
    ) -> Result<Option<MerchantBalance>> {
        self.get(CF_BALANCES, &pair_key(merchant_id, currency.as_str()))
    }

    async fn balances_for_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantBalance>> {
        self.scan(CF_BALANCES, &pair_key(merchant_id, ""))
    }

    async fn commit(&self, commit: Commit) -> Result<()> {
        let mut batch = WriteBatch::default();

        if let Some(refund) = &commit.refund {
            let mut key = refund_prefix(refund.transaction_id);
            key.extend_from_slice(refund.id.to_string().as_bytes());
            self.put(&mut batch, CF_REFUNDS, &key, refund)?;
        }
        if let Some(balance) = &commit.balance {
            let key = pair_key(&balance.merchant_id, balance.currency.as_str());
            self.put(&mut batch, CF_BALANCES, &key, balance)?;
        }
        if let Some(record) = &commit.idempotency {
            let key = pair_key(&record.merchant_id, &record.key);
            self.put(&mut batch, CF_IDEMPOTENCY, &key, record)?;
        }
        self.put(
            &mut batch,
            CF_TRANSACTIONS,
            commit.transaction.id.to_string().as_bytes(),
            &commit.transaction,
        )?;

        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Balance, Money};
    use crate::domain::transaction::{Details, PaymentMethod};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn transaction(merchant: &str) -> Transaction {
        Transaction::new(
            merchant,
            Money::new(dec!(100.0), "USD").unwrap(),
            PaymentMethod::Mock,
            "mock",
            None,
            Details::new(),
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let tx = transaction("m1");
        let mut balance = MerchantBalance::new("m1", Currency::new("USD").unwrap());
        balance.pending = Balance::new(dec!(100.0));

        store
            .commit(Commit::transaction(tx.clone()).with_balance(balance.clone()))
            .await
            .unwrap();

        assert_eq!(store.find_transaction(tx.id).await.unwrap(), Some(tx));
        assert_eq!(
            store
                .get_balance("m1", &Currency::new("USD").unwrap())
                .await
                .unwrap(),
            Some(balance)
        );
        assert_eq!(store.balances_for_merchant("m1").await.unwrap().len(), 1);
        // "m1" must not match "m10"
        assert!(store.balances_for_merchant("m").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rocksdb_pair_keys_never_collide() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_ne!(pair_key("a\0b", "c"), pair_key("a", "b\0c"));
        assert_ne!(pair_key("ab", "c"), pair_key("a", "bc"));

        let first = transaction("a\0b");
        let second = transaction("a");
        for (tx, key) in [(&first, "c"), (&second, "b\0c")] {
            let record = IdempotencyRecord {
                merchant_id: tx.merchant_id.clone(),
                key: key.to_string(),
                transaction_id: tx.id,
                result: crate::domain::payment_result::PaymentResult::declined("declined"),
            };
            store
                .commit(Commit::transaction(tx.clone()).with_idempotency(record))
                .await
                .unwrap();
        }

        let found = store.find_idempotency_record("a\0b", "c").await.unwrap();
        assert_eq!(found.unwrap().transaction_id, first.id);
        let found = store.find_idempotency_record("a", "b\0c").await.unwrap();
        assert_eq!(found.unwrap().transaction_id, second.id);
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        let tx = transaction("m1");
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.commit(Commit::transaction(tx.clone())).await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let all = store.transactions_for_merchant("m1").await.unwrap();
        assert_eq!(all, vec![tx]);
    }
}
