#![allow(dead_code)]

use payflow::application::engine::{EngineConfig, PaymentEngine};
use payflow::application::registry::ProviderRegistry;
use payflow::application::retry::RetryPolicy;
use payflow::infrastructure::in_memory::InMemoryStore;
use payflow::infrastructure::providers::MockProvider;
use std::io::{Error, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const HEADER: &str = "op,merchant,key,amount,currency,payer,reason,provider";

/// Writes a command file with the standard header followed by `rows`.
pub fn command_file(rows: &[&str]) -> Result<NamedTempFile, Error> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{}", HEADER)?;
    for row in rows {
        writeln!(file, "{}", row)?;
    }
    file.flush()?;
    Ok(file)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        multiplier: 2,
        call_timeout: Duration::from_millis(100),
    }
}

/// An in-memory engine routing everything to `provider`.
pub fn engine_with(provider: Arc<MockProvider>) -> PaymentEngine {
    PaymentEngine::new(
        Arc::new(InMemoryStore::new()),
        ProviderRegistry::new().with(provider),
        EngineConfig {
            retry: fast_retry(),
            ..EngineConfig::default()
        },
    )
    .expect("mock provider is registered")
}
