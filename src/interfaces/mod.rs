//! Driving adapters: ways of feeding commands into the engine.

pub mod csv;
