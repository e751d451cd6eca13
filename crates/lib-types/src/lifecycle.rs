//! Provider lifecycle types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the process-wide provider.
///
/// ```text
/// Uninitialized -> Initializing -> Ready -> ShuttingDown -> Destroyed
///                              \-> Failed -> ShuttingDown -> Destroyed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProviderState {
    /// Constructed, initialization not started.
    Uninitialized = 0,
    /// Initialization sequence in progress.
    Initializing = 1,
    /// Every mandatory step succeeded.
    Ready = 2,
    /// A fatal step failed. Safe to destroy, never safe to use.
    Failed = 3,
    /// Teardown in progress.
    ShuttingDown = 4,
    /// Teardown complete.
    Destroyed = 5,
}

impl ProviderState {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Uninitialized),
            1 => Some(Self::Initializing),
            2 => Some(Self::Ready),
            3 => Some(Self::Failed),
            4 => Some(Self::ShuttingDown),
            5 => Some(Self::Destroyed),
            _ => None,
        }
    }

    /// Whether cryptographic services may be handed out.
    pub fn is_usable(self) -> bool {
        self == Self::Ready
    }

    /// Whether teardown may start from this state.
    pub fn can_shut_down(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::ShuttingDown => "shutting down",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Steps of the initialization sequence, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStep {
    MutexPool,
    LockCallback,
    SelfTest,
    Rng,
    DeviceSession,
    AlternateEngine,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MutexPool => "mutex pool",
            Self::LockCallback => "lock callback",
            Self::SelfTest => "self-test",
            Self::Rng => "rng",
            Self::DeviceSession => "device session",
            Self::AlternateEngine => "alternate engine",
        };
        f.write_str(s)
    }
}
