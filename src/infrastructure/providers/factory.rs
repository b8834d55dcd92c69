//! Wiring of the shipped providers from configuration.

use super::mock::MOCK_PROVIDER;
use super::paypal::PAYPAL_PROVIDER;
use super::{MockProvider, PayPalProvider};
use crate::application::registry::ProviderRegistry;
use crate::config::Settings;
use crate::domain::ports::ProviderRef;
use crate::domain::transaction::Details;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Builds one of the shipped providers from its configuration map.
pub fn build_provider(name: &str, config: &Details) -> Result<ProviderRef> {
    match name {
        MOCK_PROVIDER => {
            let mut provider = MockProvider::new();
            if let Some(rate) = config.get("fee_rate") {
                let rate: Decimal = rate.parse().map_err(|_| {
                    PaymentError::Validation(format!("Invalid mock fee_rate '{}'", rate))
                })?;
                provider = provider.with_fee_rate(rate);
            }
            Ok(Arc::new(provider))
        }
        PAYPAL_PROVIDER => Ok(Arc::new(PayPalProvider::from_config(config)?)),
        other => Err(PaymentError::ProviderNotSupported(other.to_string())),
    }
}

pub fn registry_from_configs(configs: &BTreeMap<String, Details>) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for (name, config) in configs {
        registry.register(build_provider(name, config)?);
        info!(provider = %name, "Registered payment provider");
    }
    Ok(registry)
}

pub fn registry_from_settings(settings: &Settings) -> Result<ProviderRegistry> {
    registry_from_configs(&settings.provider_configs())
}
