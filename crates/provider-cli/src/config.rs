//! Provider configuration for the CLI: optional file plus flag overrides.

use anyhow::{Context, Result};
use lib_crypto_provider::ProviderConfig;
use std::path::Path;

/// Values given on the command line that win over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub transport: Option<String>,
    pub no_hardware_rng: bool,
}

/// Load the configuration file if one was given, then apply `overrides`.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<ProviderConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading configuration from {:?}", path);
            ProviderConfig::load(path).with_context(|| format!("Invalid configuration {:?}", path))?
        }
        None => ProviderConfig::default(),
    };

    if let Some(transport) = &overrides.transport {
        config.transport = transport.clone();
    }
    if overrides.no_hardware_rng {
        config.hardware_rng = false;
    }

    config
        .validate()
        .context("Invalid configuration after command-line overrides")?;
    Ok(config)
}
