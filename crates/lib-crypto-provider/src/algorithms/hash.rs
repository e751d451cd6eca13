use super::HashAlgorithm;
use digest::{Digest, FixedOutputReset};
use lib_types::HashAlgo;

/// A [`HashAlgorithm`] over any RustCrypto digest.
pub struct DigestHash<D> {
    algo: HashAlgo,
    state: D,
}

impl<D: Digest> DigestHash<D> {
    pub fn new(algo: HashAlgo) -> Self {
        Self {
            algo,
            state: D::new(),
        }
    }
}

impl<D> HashAlgorithm for DigestHash<D>
where
    D: Digest + FixedOutputReset + Send,
{
    fn algorithm(&self) -> HashAlgo {
        self.algo
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.state, data);
    }

    fn finalize(&mut self) -> Vec<u8> {
        Digest::finalize_reset(&mut self.state).to_vec()
    }
}
