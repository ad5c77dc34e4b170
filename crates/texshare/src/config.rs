//! Runtime configuration: registry location and the interop allow-list.

use std::path::Path;

use gpu_interop::InteropPolicy;
use serde::Deserialize;
use texshare_registry::RegistryConfig;

use crate::error::{Error, Result};

/// Overrides [`RegistryConfig::segment_name`].
pub const ENV_SEGMENT: &str = "TEXSHARE_SEGMENT";
/// Overrides [`RegistryConfig::max_senders`].
pub const ENV_MAX_SENDERS: &str = "TEXSHARE_MAX_SENDERS";

/// Everything a [`Context`](crate::Context) needs.
///
/// ```json
/// {
///   "registry": { "segment_name": "studio-senders", "max_senders": 16 },
///   "interop_policy": [ { "format": "bgra8_unorm", "api": "open_gl" } ]
/// }
/// ```
///
/// Missing sections fall back to their defaults. A present `interop_policy`
/// replaces the default allow-list entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub interop_policy: InteropPolicy,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Apply `TEXSHARE_SEGMENT` and `TEXSHARE_MAX_SENDERS` from the process
    /// environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(segment) = var(ENV_SEGMENT) {
            self.registry.segment_name = segment;
        }
        if let Some(max) = var(ENV_MAX_SENDERS) {
            self.registry.max_senders = max
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{ENV_MAX_SENDERS}={max:?}: {e}")))?;
        }
        Ok(self)
    }
}
