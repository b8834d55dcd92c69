use crate::domain::ports::ProviderRef;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;

/// Providers the engine may route payments to, by name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderRef>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under its own name, replacing any previous
    /// provider of that name.
    pub fn register(&mut self, provider: ProviderRef) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: ProviderRef) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<ProviderRef> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| PaymentError::ProviderNotSupported(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::providers::MockProvider;
    use std::sync::Arc;

    #[test]
    fn test_unknown_provider_is_not_supported() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(MockProvider::new()))
            .with(Arc::new(MockProvider::new().named("backup")));
        assert!(registry.get("mock").is_ok());
        assert!(registry.contains("backup"));
        assert_eq!(registry.names(), vec!["backup", "mock"]);
        assert!(matches!(
            registry.get("stripe"),
            Err(PaymentError::ProviderNotSupported(name)) if name == "stripe"
        ));
    }
}
