//! Algorithm discriminators.
//!
//! Every category is a closed enumeration with stable raw values. Some members
//! are only backed by an implementation in particular builds (elliptic curves,
//! the GOST suite, EdDSA), but the enumeration itself keeps the same shape in
//! every build so a raw value always names the same algorithm.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Algorithm category served by the factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Symmetric,
    Asymmetric,
    Hash,
    Mac,
    Rng,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Symmetric => "symmetric",
            Self::Asymmetric => "asymmetric",
            Self::Hash => "hash",
            Self::Mac => "mac",
            Self::Rng => "rng",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface of the per-category discriminators.
pub trait AlgorithmType: Copy + fmt::Debug + fmt::Display + Eq + Send + Sync + 'static {
    /// Category this discriminator belongs to.
    const CATEGORY: Category;

    /// Every member of the enumeration, in raw-value order.
    const ALL: &'static [Self];

    /// Stable raw value.
    fn raw(self) -> u32;

    /// Human-readable mechanism name.
    fn name(self) -> &'static str;

    /// Map a raw value back onto the enumeration.
    fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|algo| algo.raw() == raw)
    }
}

macro_rules! algorithm_enum {
    (
        $(#[$meta:meta])*
        $ty:ident => $category:ident {
            $($(#[$vmeta:meta])* $variant:ident = $raw:literal => $name:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum $ty {
            $($(#[$vmeta])* $variant = $raw,)+
        }

        impl AlgorithmType for $ty {
            const CATEGORY: Category = Category::$category;
            const ALL: &'static [Self] = &[$(Self::$variant,)+];

            fn raw(self) -> u32 {
                self as u32
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

algorithm_enum! {
    /// Symmetric block ciphers.
    SymAlgo => Symmetric {
        Aes = 1 => "AES",
        Des = 2 => "DES",
        /// Two- or three-key triple DES.
        Des3 = 3 => "3DES",
    }
}

algorithm_enum! {
    /// Asymmetric mechanisms.
    AsymAlgo => Asymmetric {
        Rsa = 1 => "RSA",
        Dsa = 2 => "DSA",
        Dh = 3 => "DH",
        Ecdh = 4 => "ECDH",
        Ecdsa = 5 => "ECDSA",
        /// GOST R 34.10-2001.
        Gost = 6 => "GOST R 34.10",
        Eddsa = 7 => "EdDSA",
    }
}

algorithm_enum! {
    /// Message digests.
    HashAlgo => Hash {
        Md5 = 1 => "MD5",
        Sha1 = 2 => "SHA-1",
        Sha224 = 3 => "SHA-224",
        Sha256 = 4 => "SHA-256",
        Sha384 = 5 => "SHA-384",
        Sha512 = 6 => "SHA-512",
        /// GOST R 34.11-94.
        Gost = 7 => "GOST R 34.11-94",
    }
}

algorithm_enum! {
    /// Message authentication codes.
    MacAlgo => Mac {
        HmacMd5 = 1 => "HMAC-MD5",
        HmacSha1 = 2 => "HMAC-SHA-1",
        HmacSha224 = 3 => "HMAC-SHA-224",
        HmacSha256 = 4 => "HMAC-SHA-256",
        HmacSha384 = 5 => "HMAC-SHA-384",
        HmacSha512 = 6 => "HMAC-SHA-512",
        HmacGost = 7 => "HMAC-GOST R 34.11-94",
        CmacDes = 8 => "CMAC-DES",
        CmacAes = 9 => "CMAC-AES",
    }
}

algorithm_enum! {
    /// Random number generator implementations.
    RngImpl => Rng {
        Default = 1 => "default",
    }
}

impl HashAlgo {
    /// Digest length in bytes.
    pub const fn output_size(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 | Self::Gost => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl MacAlgo {
    /// Underlying digest for HMAC variants.
    pub const fn hmac_digest(self) -> Option<HashAlgo> {
        match self {
            Self::HmacMd5 => Some(HashAlgo::Md5),
            Self::HmacSha1 => Some(HashAlgo::Sha1),
            Self::HmacSha224 => Some(HashAlgo::Sha224),
            Self::HmacSha256 => Some(HashAlgo::Sha256),
            Self::HmacSha384 => Some(HashAlgo::Sha384),
            Self::HmacSha512 => Some(HashAlgo::Sha512),
            Self::HmacGost => Some(HashAlgo::Gost),
            Self::CmacDes | Self::CmacAes => None,
        }
    }

    /// Tag length in bytes.
    pub const fn output_size(self) -> usize {
        match self {
            Self::CmacDes => 8,
            Self::CmacAes => 16,
            Self::HmacMd5 => 16,
            Self::HmacSha1 => 20,
            Self::HmacSha224 => 28,
            Self::HmacSha256 | Self::HmacGost => 32,
            Self::HmacSha384 => 48,
            Self::HmacSha512 => 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_values_are_stable() {
        assert_eq!(HashAlgo::Sha256.raw(), 4);
        assert_eq!(HashAlgo::from_raw(4), Some(HashAlgo::Sha256));
        assert_eq!(MacAlgo::from_raw(9), Some(MacAlgo::CmacAes));
        assert_eq!(AsymAlgo::from_raw(7), Some(AsymAlgo::Eddsa));
    }

    #[test]
    fn test_unknown_raw_value() {
        assert_eq!(HashAlgo::from_raw(0), None);
        assert_eq!(HashAlgo::from_raw(9999), None);
        assert_eq!(RngImpl::from_raw(2), None);
    }

    #[test]
    fn test_hmac_digest_sizes_agree() {
        for mac in MacAlgo::ALL {
            if let Some(digest) = mac.hmac_digest() {
                assert_eq!(mac.output_size(), digest.output_size(), "{mac}");
            }
        }
    }

    fn describe<A: AlgorithmType>(algo: A) -> String {
        format!("{} {algo}", A::CATEGORY)
    }

    #[test]
    fn test_generic_display_uses_mechanism_name() {
        assert_eq!(describe(HashAlgo::Sha256), "hash SHA-256");
        assert_eq!(describe(SymAlgo::Des3), "symmetric 3DES");
        assert_eq!(describe(RngImpl::Default), format!("rng {}", RngImpl::Default.name()));
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&Category::Mac).unwrap();
        assert_eq!(json, "\"mac\"");
        assert_eq!(SymAlgo::CATEGORY, Category::Symmetric);
    }
}
