mod registry;
mod selectors;

pub use registry::{ProviderCatalog, ProviderSpec, Transport, FALLBACK_PROXY_MODEL};
pub use selectors::{ProviderSelection, ProviderSelector, DEFAULT_PROVIDER};
