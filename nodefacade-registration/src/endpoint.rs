//! Registry endpoints.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Default Registration API version spoken to registries.
pub const DEFAULT_API_VERSION: &str = "v1.3";

/// A Registration API instance the node could register with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    /// Base URL, e.g. `http://192.0.2.10:8235`.
    pub href: String,
    /// Registration API version, e.g. `v1.3`.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Lower is more preferred.
    pub priority: u32,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl RegistryEndpoint {
    /// Creates an endpoint speaking the default API version.
    pub fn new(href: impl Into<String>, priority: u32) -> Self {
        Self {
            href: href.into().trim_end_matches('/').to_string(),
            api_version: default_api_version(),
            priority,
        }
    }

    /// Sets the API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Root of the Registration API on this endpoint.
    pub fn api_root(&self) -> String {
        format!(
            "{}/x-nmos/registration/{}",
            self.href.trim_end_matches('/'),
            self.api_version
        )
    }

    /// Preference order: priority first, then href so ties are stable.
    pub fn preference(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.href.cmp(&other.href))
    }
}

impl fmt::Display for RegistryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (priority {})", self.href, self.priority)
    }
}
