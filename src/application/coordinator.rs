//! Per-key mutual exclusion for create requests and per-transaction work.

use crate::domain::transaction::TransactionId;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

type LockTable<K> = Arc<Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>>;

/// A table of async mutexes created on demand, one per key.
///
/// An entry lives as long as someone holds or waits for it and is removed
/// when the last [`KeyGuard`] for the key is dropped.
pub struct KeyedLocks<K> {
    table: LockTable<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = {
            let mut table = lock_table(&self.table);
            Arc::clone(table.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active(&self) -> usize {
        lock_table(&self.table).len()
    }
}

fn lock_table<K>(
    table: &Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
) -> MutexGuard<'_, HashMap<K, Arc<tokio::sync::Mutex<()>>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        // Waiters clone the Arc under the table lock, so a count of one here
        // means nobody else is holding or queued on this key.
        self.guard.take();
        if let Some(mutex) = table.get(&self.key)
            && Arc::strong_count(mutex) == 1
        {
            table.remove(&self.key);
        }
    }
}

/// The serialization points of the engine.
///
/// Create requests sharing a (merchant, idempotency key) pair run one at a
/// time, and so do all mutations of a single transaction. Different keys and
/// different transactions never wait on each other.
#[derive(Default)]
pub struct IdempotencyCoordinator {
    create_keys: KeyedLocks<(String, String)>,
    transactions: KeyedLocks<TransactionId>,
}

impl IdempotencyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the request carries no idempotency key: such requests are
    /// not deduplicated and need no lock.
    pub async fn lock_create(
        &self,
        merchant_id: &str,
        key: Option<&str>,
    ) -> Option<KeyGuard<(String, String)>> {
        match key {
            Some(key) => Some(
                self.create_keys
                    .lock((merchant_id.to_string(), key.to_string()))
                    .await,
            ),
            None => None,
        }
    }

    pub async fn lock_transaction(&self, id: TransactionId) -> KeyGuard<TransactionId> {
        self.transactions.lock(id).await
    }

    pub fn active_locks(&self) -> usize {
        self.create_keys.active() + self.transactions.active()
    }
}
