//! The process-wide random number generator.

use crate::backend::CryptoBackend;
use crate::error::ProviderResult;
use std::sync::Arc;

/// Random number generator handed out by the provider.
pub trait RandomGenerator: Send + Sync {
    /// Fill `dest` with random bytes.
    fn generate(&self, dest: &mut [u8]) -> ProviderResult<()>;

    /// Return `len` random bytes.
    fn generate_vec(&self, len: usize) -> ProviderResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.generate(&mut buf)?;
        Ok(buf)
    }
}

/// Draws from the backend's current default random method, which may be a
/// hardware engine.
pub struct BackendRng {
    backend: Arc<dyn CryptoBackend>,
}

impl BackendRng {
    pub fn new(backend: Arc<dyn CryptoBackend>) -> Self {
        Self { backend }
    }
}

impl RandomGenerator for BackendRng {
    fn generate(&self, dest: &mut [u8]) -> ProviderResult<()> {
        self.backend.random_bytes(dest)
    }
}
