//! Provider configuration loading and validation.

use crate::error::{ProviderError, ProviderResult};
use lib_tcti_ffi::UnloadPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Transport module used when none is configured.
pub const DEFAULT_TRANSPORT: &str = "tabrmd";

/// Parameter set handed to the GOST engine when none is configured.
pub const DEFAULT_GOST_CRYPT_PARAMS: &str = "id-Gost28147-89-CryptoPro-A-ParamSet";

/// Provider configuration. Every field has a default, so an empty file is
/// a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Transport module name or path.
    pub transport: String,

    /// What unloading does to the module mapping.
    pub unload_policy: UnloadPolicy,

    /// Try the hardware random engine before falling back to software.
    pub hardware_rng: bool,

    /// Treat failure of the alternate engine as fatal.
    pub require_alternate_engine: bool,

    /// `CRYPT_PARAMS` value for the GOST engine.
    pub gost_crypt_params: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            transport: DEFAULT_TRANSPORT.to_string(),
            unload_policy: UnloadPolicy::default(),
            hardware_rng: true,
            require_alternate_engine: false,
            gost_crypt_params: DEFAULT_GOST_CRYPT_PARAMS.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Load from a TOML file, or JSON when the extension is `.json`.
    pub fn load(path: &Path) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Config(format!("Failed to read config file {path:?}: {e}")))?;

        let config: ProviderConfig = if path.extension().map_or(false, |e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| ProviderError::Config(format!("Failed to parse config as JSON: {e}")))?
        } else {
            toml::from_str(&content)
                .map_err(|e| ProviderError::Config(format!("Failed to parse config as TOML: {e}")))?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.transport.trim().is_empty() {
            return Err(ProviderError::Config("transport name is empty".to_string()));
        }
        if self.transport.contains('\0') {
            return Err(ProviderError::Config(format!(
                "transport name {:?} contains a NUL byte",
                self.transport
            )));
        }
        if self.gost_crypt_params.is_empty() {
            return Err(ProviderError::Config("gost_crypt_params is empty".to_string()));
        }
        Ok(())
    }
}
