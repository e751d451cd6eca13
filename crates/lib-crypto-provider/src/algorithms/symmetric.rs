use super::SymmetricAlgorithm;
use crate::error::{ProviderError, ProviderResult};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use des::{Des, TdesEde2, TdesEde3};
use lib_types::{AlgorithmType, SymAlgo};

const AES_KEY_SIZES: &[usize] = &[16, 24, 32];
const DES_KEY_SIZES: &[usize] = &[8];
const DES3_KEY_SIZES: &[usize] = &[16, 24];

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn apply<C>(algo: SymAlgo, key: &[u8], block: &mut [u8], direction: Direction) -> ProviderResult<()>
where
    C: KeyInit + BlockEncrypt + BlockDecrypt,
{
    let cipher = C::new_from_slice(key)
        .map_err(|_| ProviderError::invalid_key(algo.name(), format!("{}-byte key", key.len())))?;
    let block = GenericArray::from_mut_slice(block);
    match direction {
        Direction::Encrypt => cipher.encrypt_block(block),
        Direction::Decrypt => cipher.decrypt_block(block),
    }
    Ok(())
}

/// AES, DES or 3DES in single-block mode; the variant follows the key length.
pub struct BlockCipher {
    algo: SymAlgo,
}

impl BlockCipher {
    pub fn new(algo: SymAlgo) -> Self {
        Self { algo }
    }

    fn run(&self, key: &[u8], block: &mut [u8], direction: Direction) -> ProviderResult<()> {
        if block.len() != self.block_size() {
            return Err(ProviderError::InvalidBlockLength {
                algorithm: self.algo.name(),
                expected: self.block_size(),
                actual: block.len(),
            });
        }
        let algo = self.algo;
        match (algo, key.len()) {
            (SymAlgo::Aes, 16) => apply::<Aes128>(algo, key, block, direction),
            (SymAlgo::Aes, 24) => apply::<Aes192>(algo, key, block, direction),
            (SymAlgo::Aes, 32) => apply::<Aes256>(algo, key, block, direction),
            (SymAlgo::Des, 8) => apply::<Des>(algo, key, block, direction),
            (SymAlgo::Des3, 16) => apply::<TdesEde2>(algo, key, block, direction),
            (SymAlgo::Des3, 24) => apply::<TdesEde3>(algo, key, block, direction),
            (_, len) => Err(ProviderError::invalid_key(algo.name(), format!("{len}-byte key"))),
        }
    }
}

impl SymmetricAlgorithm for BlockCipher {
    fn algorithm(&self) -> SymAlgo {
        self.algo
    }

    fn block_size(&self) -> usize {
        match self.algo {
            SymAlgo::Aes => 16,
            SymAlgo::Des | SymAlgo::Des3 => 8,
        }
    }

    fn key_sizes(&self) -> &'static [usize] {
        match self.algo {
            SymAlgo::Aes => AES_KEY_SIZES,
            SymAlgo::Des => DES_KEY_SIZES,
            SymAlgo::Des3 => DES3_KEY_SIZES,
        }
    }

    fn encrypt_block(&self, key: &[u8], block: &mut [u8]) -> ProviderResult<()> {
        self.run(key, block, Direction::Encrypt)
    }

    fn decrypt_block(&self, key: &[u8], block: &mut [u8]) -> ProviderResult<()> {
        self.run(key, block, Direction::Decrypt)
    }
}
