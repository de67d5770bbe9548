use super::registry::{ProviderCatalog, ProviderSpec};

pub const DEFAULT_PROVIDER: &str = "Claude";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider: ProviderSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderSelector {
    pub catalog: ProviderCatalog,
}

impl ProviderSelector {
    pub fn new(catalog: Option<ProviderCatalog>) -> Self {
        Self {
            catalog: catalog.unwrap_or_default(),
        }
    }

    pub fn select(&self, requested: Option<&str>) -> ProviderSelection {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(name) = requested {
            if let Some(provider) = self.catalog.get(name) {
                return ProviderSelection {
                    provider: provider.clone(),
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                };
            }
            return ProviderSelection {
                provider: self.catalog.capabilities_of(name),
                requested: Some(name.to_string()),
                fallback_reason: Some(format!(
                    "Provider '{name}' is not registered; using text-only backend proxy."
                )),
            };
        }

        let provider = self
            .catalog
            .get(DEFAULT_PROVIDER)
            .or_else(|| self.catalog.list().next())
            .cloned()
            .unwrap_or_else(|| ProviderSpec::fallback(DEFAULT_PROVIDER));
        ProviderSelection {
            provider,
            requested: None,
            fallback_reason: Some("No provider specified; using default.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{ProviderSelector, DEFAULT_PROVIDER};
    use crate::models::{ProviderCatalog, ProviderSpec, Transport};

    #[test]
    fn selector_returns_registered_provider() {
        let selection = ProviderSelector::new(None).select(Some("GPT-4o"));
        assert_eq!(selection.provider.name, "GPT-4o");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn selector_falls_back_for_unknown_provider() {
        let selection = ProviderSelector::new(None).select(Some("PaLM"));
        assert_eq!(selection.provider.transport, Transport::BackendProxy);
        assert_eq!(selection.requested.as_deref(), Some("PaLM"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Provider 'PaLM' is not registered; using text-only backend proxy.")
        );
    }

    #[test]
    fn selector_without_request_uses_default() {
        let selection = ProviderSelector::new(None).select(None);
        assert_eq!(selection.provider.name, DEFAULT_PROVIDER);
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No provider specified; using default.")
        );
    }

    #[test]
    fn selector_without_default_entry_uses_first_registered() {
        let mut providers = IndexMap::new();
        providers.insert("Local".to_string(), ProviderSpec::fallback("Local"));
        let selector = ProviderSelector::new(Some(ProviderCatalog::new(Some(providers))));
        assert_eq!(selector.select(Some("  ")).provider.name, "Local");
    }
}
