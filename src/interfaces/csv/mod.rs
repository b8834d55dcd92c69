//! CSV batch transport used by the `payflow` binary.

pub mod balance_writer;
pub mod command_reader;
pub mod command_runner;
