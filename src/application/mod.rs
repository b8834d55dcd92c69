//! Application layer: the payment use cases and the machinery they share.
//!
//! [`engine::PaymentEngine`] is the single entry point. It routes provider
//! calls through the [`retry::RetryPolicy`], serializes work per transaction
//! and per idempotency key with the [`coordinator::IdempotencyCoordinator`],
//! and moves merchant balances through the [`ledger::Ledger`].

pub mod coordinator;
pub mod engine;
pub mod ledger;
pub mod registry;
pub mod retry;
