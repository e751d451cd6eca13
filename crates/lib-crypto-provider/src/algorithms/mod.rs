//! Capability interfaces for algorithm instances.
//!
//! One trait per category. The factory hands out boxed instances; the caller
//! owns them.

mod asymmetric;
mod hash;
mod mac;
mod symmetric;

pub use asymmetric::Mechanism;
pub use hash::DigestHash;
pub use mac::{CmacMac, HmacMac};
pub use symmetric::BlockCipher;

use crate::error::ProviderResult;
use lib_types::{AsymAlgo, HashAlgo, MacAlgo, SymAlgo};
use std::ops::RangeInclusive;

/// Single-block symmetric cipher.
pub trait SymmetricAlgorithm: Send {
    fn algorithm(&self) -> SymAlgo;

    /// Block length in bytes.
    fn block_size(&self) -> usize;

    /// Accepted key lengths in bytes.
    fn key_sizes(&self) -> &'static [usize];

    /// Encrypt one block in place.
    fn encrypt_block(&self, key: &[u8], block: &mut [u8]) -> ProviderResult<()>;

    /// Decrypt one block in place.
    fn decrypt_block(&self, key: &[u8], block: &mut [u8]) -> ProviderResult<()>;
}

/// Asymmetric mechanism descriptor.
pub trait AsymmetricAlgorithm: Send {
    fn algorithm(&self) -> AsymAlgo;

    /// Supported key sizes in bits.
    fn key_bits(&self) -> RangeInclusive<usize>;

    fn supports_key_bits(&self, bits: usize) -> bool {
        self.key_bits().contains(&bits)
    }
}

/// Incremental message digest.
pub trait HashAlgorithm: Send {
    fn algorithm(&self) -> HashAlgo;

    fn output_size(&self) -> usize {
        self.algorithm().output_size()
    }

    fn update(&mut self, data: &[u8]);

    /// Produce the digest and reset for a new message.
    fn finalize(&mut self) -> Vec<u8>;
}

/// Keyed message authentication code.
pub trait MacAlgorithm: Send {
    fn algorithm(&self) -> MacAlgo;

    fn output_size(&self) -> usize {
        self.algorithm().output_size()
    }

    /// Start a new message under `key`.
    fn set_key(&mut self, key: &[u8]) -> ProviderResult<()>;

    /// Absorb data. Fails if no key was set.
    fn update(&mut self, data: &[u8]) -> ProviderResult<()>;

    /// Produce the tag. The key must be set again before the next message.
    fn finalize(&mut self) -> ProviderResult<Vec<u8>>;
}
