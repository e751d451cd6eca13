//! Lazily created, process-wide provider instance.

use crate::config::ProviderConfig;
use crate::provider::{Collaborators, CryptoProvider};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

type Factory = Box<dyn Fn() -> Collaborators + Send + Sync>;

/// Holds at most one provider and creates it on first access.
///
/// Concurrent first callers observe a single initialization.
pub struct ProviderCell {
    slot: Mutex<Option<Arc<CryptoProvider>>>,
    make: Factory,
}

impl ProviderCell {
    pub fn new(make: impl Fn() -> Collaborators + Send + Sync + 'static) -> Self {
        Self {
            slot: Mutex::new(None),
            make: Box::new(make),
        }
    }

    /// The current provider, initializing it if there is none.
    ///
    /// Initialization failures do not fail this call; inspect
    /// [`CryptoProvider::state`] instead.
    pub fn instance(&self) -> Arc<CryptoProvider> {
        let mut slot = self.slot.lock();
        if let Some(provider) = slot.as_ref() {
            return provider.clone();
        }
        let provider = Arc::new(CryptoProvider::initialize((self.make)()));
        *slot = Some(provider.clone());
        provider
    }

    /// The current provider without creating one.
    pub fn current(&self) -> Option<Arc<CryptoProvider>> {
        self.slot.lock().clone()
    }

    /// Tear down the current provider. The next [`instance`](Self::instance)
    /// runs initialization again.
    ///
    /// The slot stays locked until teardown finishes, so a concurrent
    /// [`instance`](Self::instance) never initializes against collaborators
    /// the old provider is still releasing.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        if let Some(provider) = slot.take() {
            provider.shutdown();
        }
    }
}

static CONFIG: Lazy<RwLock<ProviderConfig>> = Lazy::new(|| RwLock::new(ProviderConfig::default()));

static GLOBAL: Lazy<ProviderCell> =
    Lazy::new(|| ProviderCell::new(|| Collaborators::system(CONFIG.read().clone())));

/// Configuration used the next time the global provider is created.
pub fn set_config(config: ProviderConfig) {
    *CONFIG.write() = config;
}

/// The global provider.
pub fn instance() -> Arc<CryptoProvider> {
    GLOBAL.instance()
}

/// Tear down the global provider.
pub fn reset() {
    GLOBAL.reset();
}
