//! Concrete [`PaymentProvider`](crate::domain::ports::PaymentProvider)
//! implementations.

pub mod factory;
pub mod mock;
pub mod paypal;

pub use mock::MockProvider;
pub use paypal::PayPalProvider;
