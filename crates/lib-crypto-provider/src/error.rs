//! Error types for the crypto provider.

use lib_tcti_ffi::{ReturnCode, TctiError};
use lib_types::{AlgorithmType, Category, ProviderState};
use thiserror::Error;

/// Errors raised by the provider, its lock bridge and its factory.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A resource could not be acquired.
    #[error("Failed to allocate {what}")]
    AllocationFailure { what: String },

    /// Loading or negotiating the transport module failed.
    #[error("Transport error: {0}")]
    Transport(TctiError),

    /// The discriminator names no algorithm available in this build.
    #[error("Unsupported {category} algorithm {value}")]
    UnsupportedAlgorithm { category: Category, value: u32 },

    /// The session layer rejected the transport context.
    #[error("Device session initialization failed with code {code:#x}")]
    DeviceInitFailure { code: ReturnCode },

    /// A lock index outside the pool. Reported, never propagated by the
    /// locking callback itself.
    #[error("Lock index {index} out of range [0..{count})")]
    LockIndexOutOfRange { index: usize, count: usize },

    /// Restricted mode could not be entered.
    #[error("Self-test failed: {0}")]
    SelfTestFailed(String),

    /// An engine call reported failure.
    #[error("Engine '{id}' failed to {operation}")]
    EngineFailure { id: String, operation: &'static str },

    /// Unknown RNG implementation requested.
    #[error("Unknown RNG implementation {0}")]
    UnknownRng(u32),

    /// The provider is not in a usable state.
    #[error("Provider is {state}")]
    NotReady { state: ProviderState },

    /// Key material of the wrong length or shape.
    #[error("Invalid key for {algorithm}: {reason}")]
    InvalidKey {
        algorithm: &'static str,
        reason: String,
    },

    /// Input of the wrong length for a block operation.
    #[error("{algorithm} expects {expected}-byte blocks, got {actual}")]
    InvalidBlockLength {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The random source failed.
    #[error("Random generation failed: {0}")]
    Random(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<TctiError> for ProviderError {
    fn from(err: TctiError) -> Self {
        match err {
            TctiError::DeviceInitFailure { code } => Self::DeviceInitFailure { code },
            other => Self::Transport(other),
        }
    }
}

impl ProviderError {
    /// Create an unsupported algorithm error for a known discriminator.
    pub fn unsupported<A: AlgorithmType>(algo: A) -> Self {
        Self::UnsupportedAlgorithm {
            category: A::CATEGORY,
            value: algo.raw(),
        }
    }

    /// Create an unsupported algorithm error for a raw discriminator.
    pub fn unsupported_raw(category: Category, value: u32) -> Self {
        Self::UnsupportedAlgorithm { category, value }
    }

    /// Create an engine failure.
    pub fn engine(id: impl Into<String>, operation: &'static str) -> Self {
        Self::EngineFailure {
            id: id.into(),
            operation,
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(algorithm: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            algorithm,
            reason: reason.into(),
        }
    }

    /// Whether this failure leaves the provider unusable when hit during
    /// initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailure { .. }
                | Self::Transport(_)
                | Self::DeviceInitFailure { .. }
                | Self::SelfTestFailed(_)
        )
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
