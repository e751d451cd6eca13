use super::AsymmetricAlgorithm;
use lib_types::AsymAlgo;
use std::ops::RangeInclusive;

/// Descriptor of an asymmetric mechanism. Key generation and the
/// operations themselves belong to external collaborators.
#[derive(Clone, Debug)]
pub struct Mechanism {
    algo: AsymAlgo,
    key_bits: RangeInclusive<usize>,
}

impl Mechanism {
    pub fn new(algo: AsymAlgo) -> Self {
        let key_bits = match algo {
            AsymAlgo::Rsa => 512..=16384,
            AsymAlgo::Dsa => 512..=1024,
            AsymAlgo::Dh => 512..=10000,
            AsymAlgo::Ecdh | AsymAlgo::Ecdsa => 112..=521,
            AsymAlgo::Gost => 256..=256,
            AsymAlgo::Eddsa => 255..=448,
        };
        Self { algo, key_bits }
    }
}

impl AsymmetricAlgorithm for Mechanism {
    fn algorithm(&self) -> AsymAlgo {
        self.algo
    }

    fn key_bits(&self) -> RangeInclusive<usize> {
        self.key_bits.clone()
    }
}
