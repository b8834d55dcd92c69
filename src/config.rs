use crate::application::engine::EngineConfig;
use crate::application::retry::RetryPolicy;
use crate::domain::transaction::Details;
use crate::infrastructure::providers::mock::MOCK_PROVIDER;
use crate::infrastructure::providers::paypal::PAYPAL_PROVIDER;
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Test,
    Production,
}

/// Runtime settings, read from flags with environment fallbacks.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "PAYFLOW_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Provider used when a create command names none
    #[arg(long, env = "PAYFLOW_PROVIDER", default_value = MOCK_PROVIDER)]
    pub provider: String,

    /// `production` talks to live PayPal unless a mode is given explicitly
    #[arg(long, env = "PAYFLOW_ENVIRONMENT", value_enum, default_value_t = Environment::Test)]
    pub environment: Environment,

    /// Platform commission in percent, used when a provider reports no fee
    #[arg(long, env = "PAYFLOW_COMMISSION_RATE")]
    pub commission_rate: Option<Decimal>,

    /// Fee charged by the mock provider, in percent
    #[arg(long, env = "PAYFLOW_MOCK_FEE_RATE", default_value = "0")]
    pub mock_fee_rate: Decimal,

    /// Total attempts per provider call
    #[arg(long, env = "PAYFLOW_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "PAYFLOW_INITIAL_BACKOFF_MS", default_value_t = 100)]
    pub initial_backoff_ms: u64,

    #[arg(long, env = "PAYFLOW_MAX_BACKOFF_MS", default_value_t = 2_000)]
    pub max_backoff_ms: u64,

    #[arg(long, env = "PAYFLOW_BACKOFF_MULTIPLIER", default_value_t = 2)]
    pub backoff_multiplier: u32,

    /// Upper bound for a single provider call
    #[arg(long, env = "PAYFLOW_CALL_TIMEOUT_MS", default_value_t = 30_000)]
    pub call_timeout_ms: u64,

    #[arg(long, env = "PAYPAL_CLIENT_ID")]
    pub paypal_client_id: Option<String>,

    #[arg(long, env = "PAYPAL_CLIENT_SECRET", hide_env_values = true)]
    pub paypal_client_secret: Option<String>,

    /// `sandbox` or `live`
    #[arg(long, env = "PAYPAL_MODE")]
    pub paypal_mode: Option<String>,

    #[arg(long, env = "PAYPAL_API_BASE_URL")]
    pub paypal_base_url: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.backoff_multiplier,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry: self.retry_policy(),
            commission_rate: self.commission_rate,
            default_provider: self.provider.clone(),
        }
    }

    /// Configuration of every provider to register, keyed by name.
    ///
    /// The mock provider is always present. PayPal is added when it is the
    /// default provider or any of its settings is given, so missing
    /// credentials surface at startup.
    pub fn provider_configs(&self) -> BTreeMap<String, Details> {
        let mut configs = BTreeMap::new();
        configs.insert(
            MOCK_PROVIDER.to_string(),
            Details::from([("fee_rate".to_string(), self.mock_fee_rate.to_string())]),
        );

        let paypal_requested = self.provider == PAYPAL_PROVIDER
            || self.paypal_client_id.is_some()
            || self.paypal_client_secret.is_some()
            || self.paypal_base_url.is_some();
        if paypal_requested {
            let mut paypal = Details::new();
            let mode = self.paypal_mode.clone().or_else(|| {
                (self.environment == Environment::Production).then(|| "live".to_string())
            });
            let entries = [
                ("client_id", self.paypal_client_id.clone()),
                ("client_secret", self.paypal_client_secret.clone()),
                ("mode", mode),
                ("base_url", self.paypal_base_url.clone()),
            ];
            for (key, value) in entries {
                if let Some(value) = value {
                    paypal.insert(key.to_string(), value);
                }
            }
            configs.insert(PAYPAL_PROVIDER.to_string(), paypal);
        }

        configs
    }
}
