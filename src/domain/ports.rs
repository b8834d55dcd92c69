use super::balance::MerchantBalance;
use super::money::{Currency, Money};
use super::payment_result::PaymentResult;
use super::transaction::{Details, Refund, Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored answer to a create-intent request carrying an idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub merchant_id: String,
    pub key: String,
    pub transaction_id: TransactionId,
    pub result: PaymentResult,
}

/// Everything one use case writes. Applied all-or-nothing by
/// [`PaymentStore::commit`].
#[derive(Debug, Clone)]
pub struct Commit {
    pub transaction: Transaction,
    pub refund: Option<Refund>,
    pub balance: Option<MerchantBalance>,
    pub idempotency: Option<IdempotencyRecord>,
}

impl Commit {
    pub fn transaction(transaction: Transaction) -> Self {
        Self {
            transaction,
            refund: None,
            balance: None,
            idempotency: None,
        }
    }

    pub fn with_refund(mut self, refund: Refund) -> Self {
        self.refund = Some(refund);
        self
    }

    pub fn with_balance(mut self, balance: MerchantBalance) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_idempotency(mut self, record: IdempotencyRecord) -> Self {
        self.idempotency = Some(record);
        self
    }
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;
    async fn find_idempotency_record(
        &self,
        merchant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;
    async fn transactions_for_merchant(&self, merchant_id: &str) -> Result<Vec<Transaction>>;
    async fn refunds_for(&self, id: TransactionId) -> Result<Vec<Refund>>;
    async fn get_balance(
        &self,
        merchant_id: &str,
        currency: &Currency,
    ) -> Result<Option<MerchantBalance>>;
    async fn balances_for_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantBalance>>;
    /// Writes every part of `commit` atomically: either all of it becomes
    /// visible to subsequent reads or none of it does.
    async fn commit(&self, commit: Commit) -> Result<()>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;

/// Metadata entry carrying the caller's idempotency scope on create.
///
/// Set by the engine when a create request has an idempotency key. A
/// provider that accepted a create with this id must answer a repeat with the
/// same payment instead of opening a new one.
pub const REQUEST_ID: &str = "payflow_request_id";

/// Capability set of an external payment processor.
///
/// Implementations must never return a fault for these operations: network
/// errors, timeouts, malformed responses and auth failures are converted into
/// a failed [`PaymentResult`] tagged with a
/// [`FailureKind`](super::payment_result::FailureKind) at the provider
/// boundary.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `money` has already been validated by the caller.
    async fn create_payment_intent(
        &self,
        money: &Money,
        method_data: &Details,
        metadata: &Details,
    ) -> PaymentResult;

    /// Expects the payer authorization token under `payer_id` in
    /// `method_data`.
    async fn confirm_payment(&self, provider_reference: &str, method_data: &Details)
    -> PaymentResult;

    /// `amount: None` refunds whatever is left on the payment.
    async fn refund_payment(
        &self,
        provider_reference: &str,
        amount: Option<&Money>,
        reason: Option<&str>,
    ) -> PaymentResult;

    /// Read-only.
    async fn get_payment_status(&self, provider_reference: &str) -> PaymentResult;
}

pub type ProviderRef = Arc<dyn PaymentProvider>;
