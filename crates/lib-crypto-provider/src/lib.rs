//! # lib-crypto-provider
//!
//! A process-wide cryptographic provider for an HSM-style service.
//!
//! The provider owns:
//!
//! - A table of pool mutexes, bridged into the backend's numbered-lock callback
//! - The backend's random source, optionally switched to the CPU's hardware
//!   random instruction
//! - A device session over a dynamically loaded TPM transport module
//!   (`tpm` feature)
//! - The GOST engine (`gost` feature)
//!
//! and hands out algorithm instances through an [`AlgorithmFactory`].
//!
//! ## Example
//!
//! ```no_run
//! use lib_crypto_provider::{singleton, HashAlgo};
//!
//! let provider = singleton::instance();
//! if provider.is_ready() {
//!     let mut sha = provider.get_hash_algorithm(HashAlgo::Sha256).unwrap();
//!     sha.update(b"abc");
//!     let _digest = sha.finalize();
//! }
//! singleton::reset();
//! ```

pub mod algorithms;
pub mod backend;
pub mod config;
pub mod error;
pub mod factory;
pub mod lock_bridge;
pub mod mutex;
pub mod provider;
pub mod rng;
pub mod singleton;
pub mod software;

pub use algorithms::{AsymmetricAlgorithm, HashAlgorithm, MacAlgorithm, SymmetricAlgorithm};
pub use backend::{CryptoBackend, Engine, EngineMethod};
pub use config::ProviderConfig;
pub use error::{ProviderError, ProviderResult};
pub use factory::AlgorithmFactory;
pub use lock_bridge::{LockBridge, LockMode, LockTable, LockingCallback};
pub use mutex::{BinaryMutex, MutexPool, PoolMutex, SystemMutexPool};
pub use provider::{Collaborators, CryptoProvider, InitFailure};
pub use rng::{BackendRng, RandomGenerator};
pub use software::SoftwareBackend;

pub use lib_types::{
    AlgorithmType, AsymAlgo, Category, HashAlgo, InitStep, MacAlgo, ProviderState, RngImpl, SymAlgo,
};
