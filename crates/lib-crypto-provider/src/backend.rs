//! Process-wide cryptographic backend and its engines.
//!
//! The provider never talks to a concrete backend directly; it drives the
//! traits here so the initialization sequence can run against the built-in
//! [`SoftwareBackend`](crate::software::SoftwareBackend) or a test double.

use crate::error::{ProviderError, ProviderResult};
use crate::lock_bridge::LockingCallback;
use lib_types::HashAlgo;
use std::fmt;

/// Method families an engine can be made the default for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineMethod {
    Rand,
    Digests,
    Ciphers,
    PkeyAsn1,
}

impl fmt::Display for EngineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rand => "rand",
            Self::Digests => "digests",
            Self::Ciphers => "ciphers",
            Self::PkeyAsn1 => "pkey-asn1",
        };
        f.write_str(s)
    }
}

/// A structural reference to a backend engine.
///
/// `init` turns it into a functional reference which must be paired with
/// `finish`. Dropping the box frees the structural reference.
pub trait Engine: Send {
    fn id(&self) -> &str;

    fn init(&mut self) -> ProviderResult<()>;

    fn finish(&mut self);

    /// Make this engine the default implementation of `method`.
    fn set_default(&mut self, method: EngineMethod) -> ProviderResult<()>;

    /// Whether the engine supplies `algo`.
    fn digest(&self, algo: HashAlgo) -> bool;

    fn register_pkey_asn1_meths(&mut self) -> ProviderResult<()>;

    fn ctrl_cmd_string(&mut self, cmd: &str, arg: &str) -> ProviderResult<()>;
}

/// The process-wide backend library.
pub trait CryptoBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Number of numbered locks the backend needs.
    fn num_locks(&self) -> usize;

    fn locking_callback_installed(&self) -> bool;

    /// Install or clear the global locking callback.
    fn set_locking_callback(&self, callback: Option<LockingCallback>);

    /// Install `callback` unless one is already present, as a single step
    /// with respect to other installers. Returns whether it was installed.
    fn install_locking_callback_if_unset(&self, callback: LockingCallback) -> bool;

    /// Whether the restricted, self-tested mode exists in this backend.
    fn supports_fips(&self) -> bool {
        false
    }

    fn fips_mode(&self) -> bool {
        false
    }

    /// Enter restricted mode, running the power-on self-tests.
    fn enter_fips_mode(&self) -> ProviderResult<()> {
        Err(ProviderError::SelfTestFailed(format!(
            "{} has no restricted mode",
            self.name()
        )))
    }

    /// Restore restricted-mode random state after a previous teardown,
    /// without re-running the self-tests.
    fn restore_fips_rand(&self) {}

    /// Register every algorithm with the backend's lookup tables.
    fn load_algorithms(&self) {}

    /// Look up an engine by id.
    fn engine_by_id(&self, id: &str) -> Option<Box<dyn Engine>>;

    /// Fill `buf` from the backend's current default random method.
    fn random_bytes(&self, buf: &mut [u8]) -> ProviderResult<()>;
}
