//! Algorithm factory.
//!
//! A stateless dispatcher from a category discriminator to a freshly boxed
//! instance. Dispatch is total over each enumeration; members this build
//! does not carry map to [`ProviderError::UnsupportedAlgorithm`].

use crate::algorithms::{
    AsymmetricAlgorithm, BlockCipher, CmacMac, DigestHash, HashAlgorithm, HmacMac, MacAlgorithm,
    Mechanism, SymmetricAlgorithm,
};
use crate::error::{ProviderError, ProviderResult};
use lib_types::{AlgorithmType, AsymAlgo, Category, HashAlgo, MacAlgo, RngImpl, SymAlgo};

#[derive(Clone, Copy, Debug, Default)]
pub struct AlgorithmFactory;

fn unsupported<A: AlgorithmType>(algo: A) -> ProviderError {
    tracing::error!(category = %A::CATEGORY, algorithm = %algo, "Algorithm not available in this build");
    ProviderError::unsupported(algo)
}

fn asymmetric_available(algo: AsymAlgo) -> bool {
    match algo {
        AsymAlgo::Rsa | AsymAlgo::Dsa | AsymAlgo::Dh => true,
        AsymAlgo::Ecdh | AsymAlgo::Ecdsa => cfg!(feature = "ecc"),
        AsymAlgo::Gost => cfg!(feature = "gost"),
        AsymAlgo::Eddsa => cfg!(feature = "eddsa"),
    }
}

fn lookup<A: AlgorithmType>(raw: u32) -> ProviderResult<A> {
    A::from_raw(raw).ok_or_else(|| {
        tracing::error!(category = %A::CATEGORY, value = raw, "Unknown algorithm type");
        ProviderError::unsupported_raw(A::CATEGORY, raw)
    })
}

impl AlgorithmFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn get_symmetric_algorithm(&self, algo: SymAlgo) -> ProviderResult<Box<dyn SymmetricAlgorithm>> {
        match algo {
            SymAlgo::Aes | SymAlgo::Des | SymAlgo::Des3 => Ok(Box::new(BlockCipher::new(algo))),
        }
    }

    pub fn get_asymmetric_algorithm(&self, algo: AsymAlgo) -> ProviderResult<Box<dyn AsymmetricAlgorithm>> {
        if !asymmetric_available(algo) {
            return Err(unsupported(algo));
        }
        Ok(Box::new(Mechanism::new(algo)))
    }

    pub fn get_hash_algorithm(&self, algo: HashAlgo) -> ProviderResult<Box<dyn HashAlgorithm>> {
        let hash: Box<dyn HashAlgorithm> = match algo {
            HashAlgo::Md5 => Box::new(DigestHash::<md5::Md5>::new(algo)),
            HashAlgo::Sha1 => Box::new(DigestHash::<sha1::Sha1>::new(algo)),
            HashAlgo::Sha224 => Box::new(DigestHash::<sha2::Sha224>::new(algo)),
            HashAlgo::Sha256 => Box::new(DigestHash::<sha2::Sha256>::new(algo)),
            HashAlgo::Sha384 => Box::new(DigestHash::<sha2::Sha384>::new(algo)),
            HashAlgo::Sha512 => Box::new(DigestHash::<sha2::Sha512>::new(algo)),
            #[cfg(feature = "gost")]
            HashAlgo::Gost => Box::new(DigestHash::<gost94::Gost94CryptoPro>::new(algo)),
            #[cfg(not(feature = "gost"))]
            HashAlgo::Gost => return Err(unsupported(algo)),
        };
        Ok(hash)
    }

    pub fn get_mac_algorithm(&self, algo: MacAlgo) -> ProviderResult<Box<dyn MacAlgorithm>> {
        let mac: Box<dyn MacAlgorithm> = match algo {
            MacAlgo::HmacMd5 => Box::new(HmacMac::<md5::Md5>::new(algo)),
            MacAlgo::HmacSha1 => Box::new(HmacMac::<sha1::Sha1>::new(algo)),
            MacAlgo::HmacSha224 => Box::new(HmacMac::<sha2::Sha224>::new(algo)),
            MacAlgo::HmacSha256 => Box::new(HmacMac::<sha2::Sha256>::new(algo)),
            MacAlgo::HmacSha384 => Box::new(HmacMac::<sha2::Sha384>::new(algo)),
            MacAlgo::HmacSha512 => Box::new(HmacMac::<sha2::Sha512>::new(algo)),
            #[cfg(feature = "gost")]
            MacAlgo::HmacGost => Box::new(HmacMac::<gost94::Gost94CryptoPro>::new(algo)),
            #[cfg(not(feature = "gost"))]
            MacAlgo::HmacGost => return Err(unsupported(algo)),
            MacAlgo::CmacDes | MacAlgo::CmacAes => Box::new(CmacMac::new(algo)),
        };
        Ok(mac)
    }

    pub fn get_symmetric_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn SymmetricAlgorithm>> {
        self.get_symmetric_algorithm(lookup(raw)?)
    }

    pub fn get_asymmetric_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn AsymmetricAlgorithm>> {
        self.get_asymmetric_algorithm(lookup(raw)?)
    }

    pub fn get_hash_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn HashAlgorithm>> {
        self.get_hash_algorithm(lookup(raw)?)
    }

    pub fn get_mac_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn MacAlgorithm>> {
        self.get_mac_algorithm(lookup(raw)?)
    }

    /// Whether `raw` names an algorithm of `category` that this build can
    /// construct.
    pub fn is_available(&self, category: Category, raw: u32) -> bool {
        match category {
            Category::Symmetric => SymAlgo::from_raw(raw).is_some(),
            Category::Asymmetric => AsymAlgo::from_raw(raw).map_or(false, asymmetric_available),
            Category::Hash => HashAlgo::from_raw(raw)
                .map_or(false, |algo| algo != HashAlgo::Gost || cfg!(feature = "gost")),
            Category::Mac => MacAlgo::from_raw(raw)
                .map_or(false, |algo| algo != MacAlgo::HmacGost || cfg!(feature = "gost")),
            Category::Rng => RngImpl::from_raw(raw).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_available_type_constructs() {
        let factory = AlgorithmFactory::new();
        for &algo in SymAlgo::ALL {
            assert!(factory.get_symmetric_algorithm(algo).is_ok());
        }
        for &algo in AsymAlgo::ALL {
            let available = factory.is_available(Category::Asymmetric, algo.raw());
            assert_eq!(factory.get_asymmetric_algorithm(algo).is_ok(), available, "{algo}");
        }
        for &algo in HashAlgo::ALL {
            let available = factory.is_available(Category::Hash, algo.raw());
            match factory.get_hash_algorithm(algo) {
                Ok(hash) => {
                    assert!(available);
                    assert_eq!(hash.algorithm(), algo);
                }
                Err(e) => {
                    assert!(!available);
                    assert!(matches!(e, ProviderError::UnsupportedAlgorithm { .. }));
                }
            }
        }
        for &algo in MacAlgo::ALL {
            let available = factory.is_available(Category::Mac, algo.raw());
            assert_eq!(factory.get_mac_algorithm(algo).is_ok(), available, "{algo}");
        }
    }

    #[test]
    fn test_unknown_raw_values() {
        let factory = AlgorithmFactory::new();
        assert!(matches!(
            factory.get_hash_algorithm_by_id(9999),
            Err(ProviderError::UnsupportedAlgorithm {
                category: Category::Hash,
                value: 9999
            })
        ));
        assert!(factory.get_symmetric_algorithm_by_id(0).is_err());
        assert!(factory.get_asymmetric_algorithm_by_id(42).is_err());
        assert!(factory.get_mac_algorithm_by_id(10).is_err());
        assert!(!factory.is_available(Category::Rng, 2));
    }

    #[test]
    fn test_hash_by_id_digests() {
        let factory = AlgorithmFactory::new();
        let mut hash = factory
            .get_hash_algorithm_by_id(HashAlgo::Sha1.raw())
            .unwrap();
        hash.update(b"abc");
        assert_eq!(
            hex::encode(hash.finalize()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_build_conditional_members() {
        let factory = AlgorithmFactory::new();
        assert_eq!(factory.get_asymmetric_algorithm(AsymAlgo::Ecdsa).is_ok(), cfg!(feature = "ecc"));
        assert_eq!(factory.get_hash_algorithm(HashAlgo::Gost).is_ok(), cfg!(feature = "gost"));
        assert_eq!(factory.get_asymmetric_algorithm(AsymAlgo::Eddsa).is_ok(), cfg!(feature = "eddsa"));
    }

    #[cfg(feature = "gost")]
    #[test]
    fn test_gost94_cryptopro_empty() {
        let mut hash = AlgorithmFactory::new().get_hash_algorithm(HashAlgo::Gost).unwrap();
        assert_eq!(
            hex::encode(hash.finalize()),
            "981e5f3ca30c841487830f84fb433e13ac1101569b9c13584ac483234cd656c0"
        );
    }
}
