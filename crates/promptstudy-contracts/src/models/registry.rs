use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const FALLBACK_PROXY_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// In-process AI client object.
    Bridge,
    /// The study backend, which forwards to a third-party model.
    BackendProxy,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Bridge => f.write_str("bridge"),
            Transport::BackendProxy => f.write_str("backend-proxy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub transport: Transport,
    pub capabilities: Vec<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_model: Option<String>,
}

impl ProviderSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn supports_images(&self) -> bool {
        self.supports("image")
    }

    pub fn supports_text(&self) -> bool {
        self.supports("text")
    }

    /// Model id handed to the image endpoint; providers without a dedicated
    /// image model use their chat model.
    pub fn image_model(&self) -> &str {
        self.image_model.as_deref().unwrap_or(self.model.as_str())
    }

    /// Text-only backend-proxy profile handed out for names nobody registered.
    pub fn fallback(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: Transport::BackendProxy,
            capabilities: vec!["text".to_string()],
            model: FALLBACK_PROXY_MODEL.to_string(),
            image_model: None,
        }
    }
}

/// Static provider table. Nothing outside this type decides what a provider
/// can do from its name.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: IndexMap<String, ProviderSpec>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProviderCatalog {
    pub fn new(providers: Option<IndexMap<String, ProviderSpec>>) -> Self {
        Self {
            providers: providers.unwrap_or_else(default_providers),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registration order, which is also the order offered to participants.
    pub fn list(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ProviderSpec> {
        self.providers
            .values()
            .filter(|provider| provider.supports(capability))
            .cloned()
            .collect()
    }

    /// Never fails: unknown names get the text-only backend-proxy profile.
    pub fn capabilities_of(&self, name: &str) -> ProviderSpec {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| ProviderSpec::fallback(name))
    }
}

fn default_providers() -> IndexMap<String, ProviderSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      transport: Transport,
                      capabilities: &[&str],
                      model: &str,
                      image_model: Option<&str>| {
        map.insert(
            name.to_string(),
            ProviderSpec {
                name: name.to_string(),
                transport,
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                model: model.to_string(),
                image_model: image_model.map(str::to_string),
            },
        );
    };

    insert("Claude", Transport::Bridge, &["text"], "claude-sonnet-4", None);
    insert(
        "GPT-4o",
        Transport::Bridge,
        &["text", "image"],
        "gpt-4o",
        Some("dall-e-3"),
    );
    insert(
        "Gemini",
        Transport::BackendProxy,
        &["text", "image"],
        "gemini-2.0-flash",
        Some("imagen-3.0-generate-002"),
    );
    insert(
        "DeepSeek",
        Transport::BackendProxy,
        &["text"],
        "deepseek-chat",
        None,
    );

    map
}
