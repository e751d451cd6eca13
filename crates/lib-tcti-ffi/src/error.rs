//! Error types for transport module operations.

use crate::abi::ReturnCode;
use crate::negotiate::InitPhase;
use thiserror::Error;

/// Errors that can occur while loading or negotiating a transport module.
#[derive(Debug, Error)]
pub enum TctiError {
    /// Neither the literal path nor the conventional file name could be opened.
    #[error("Transport module '{name}' not found (tried {tried:?}): {reason}")]
    NotFound {
        name: String,
        tried: Vec<String>,
        reason: String,
    },

    /// The name cannot be turned into a module file name.
    #[error("Invalid transport module name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Required symbol not found in the module.
    #[error("Symbol '{symbol}' not found in module '{path}'")]
    SymbolNotFound { symbol: String, path: String },

    /// The info entry point returned something unusable.
    #[error("Invalid info descriptor in module '{path}': {reason}")]
    InvalidInfo { path: String, reason: String },

    /// The module's init routine reported failure.
    #[error("Transport init {phase} failed{}", describe_code(.code))]
    ProtocolInitFailure {
        phase: InitPhase,
        code: Option<ReturnCode>,
    },

    /// Context buffer allocation failed.
    #[error("Failed to allocate {size} bytes for a context buffer")]
    AllocationFailure { size: usize },

    /// A transport module is already active.
    #[error("Transport module '{path}' is already loaded")]
    AlreadyLoaded { path: String },

    /// The session layer rejected the transport context.
    #[error("Device session initialization failed with code {code:#x}")]
    DeviceInitFailure { code: ReturnCode },
}

fn describe_code(code: &Option<ReturnCode>) -> String {
    match code {
        Some(code) => format!(" with code {code:#x}"),
        None => ": zero context size reported".to_string(),
    }
}

impl TctiError {
    /// Create a symbol not found error.
    pub fn symbol_not_found(symbol: impl Into<String>, path: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.into(),
            path: path.into(),
        }
    }

    /// Create an invalid info error.
    pub fn invalid_info(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInfo {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol failure carrying the module's return code.
    pub fn protocol(phase: InitPhase, code: ReturnCode) -> Self {
        Self::ProtocolInitFailure {
            phase,
            code: Some(code),
        }
    }
}

/// Result type for transport operations.
pub type TctiResult<T> = Result<T, TctiError>;
