//! Domain layer: value objects, records, the transaction state machine and
//! the ports the application layer talks through.

pub mod balance;
pub mod money;
pub mod payment_result;
pub mod ports;
pub mod state_machine;
pub mod transaction;
