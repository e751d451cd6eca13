use super::MacAlgorithm;
use crate::error::{ProviderError, ProviderResult};
use aes::{Aes128, Aes192, Aes256};
use cmac::Cmac;
use des::{Des, TdesEde2, TdesEde3};
use digest::core_api::BlockSizeUser;
use digest::{Digest, KeyInit};
use hmac::Mac;
use hmac::SimpleHmac;
use lib_types::{AlgorithmType, MacAlgo};

fn keyed<M: KeyInit>(algo: MacAlgo, key: &[u8]) -> ProviderResult<M> {
    <M as KeyInit>::new_from_slice(key)
        .map_err(|_| ProviderError::invalid_key(algo.name(), format!("{}-byte key", key.len())))
}

fn key_not_set(algo: MacAlgo) -> ProviderError {
    ProviderError::invalid_key(algo.name(), "no key set")
}

/// HMAC over any RustCrypto digest.
pub struct HmacMac<D: Digest + BlockSizeUser> {
    algo: MacAlgo,
    state: Option<SimpleHmac<D>>,
}

impl<D: Digest + BlockSizeUser> HmacMac<D> {
    pub fn new(algo: MacAlgo) -> Self {
        Self { algo, state: None }
    }
}

impl<D> MacAlgorithm for HmacMac<D>
where
    D: Digest + BlockSizeUser + Send,
{
    fn algorithm(&self) -> MacAlgo {
        self.algo
    }

    fn set_key(&mut self, key: &[u8]) -> ProviderResult<()> {
        if key.is_empty() {
            return Err(ProviderError::invalid_key(self.algo.name(), "empty key"));
        }
        self.state = Some(keyed(self.algo, key)?);
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> ProviderResult<()> {
        let state = self.state.as_mut().ok_or_else(|| key_not_set(self.algo))?;
        Mac::update(state, data);
        Ok(())
    }

    fn finalize(&mut self) -> ProviderResult<Vec<u8>> {
        let state = self.state.take().ok_or_else(|| key_not_set(self.algo))?;
        Ok(Mac::finalize(state).into_bytes().to_vec())
    }
}

enum CmacState {
    Des(Cmac<Des>),
    Tdes2(Cmac<TdesEde2>),
    Tdes3(Cmac<TdesEde3>),
    Aes128(Cmac<Aes128>),
    Aes192(Cmac<Aes192>),
    Aes256(Cmac<Aes256>),
}

macro_rules! with_cmac {
    ($state:expr, $mac:ident => $body:expr) => {
        match $state {
            CmacState::Des($mac) => $body,
            CmacState::Tdes2($mac) => $body,
            CmacState::Tdes3($mac) => $body,
            CmacState::Aes128($mac) => $body,
            CmacState::Aes192($mac) => $body,
            CmacState::Aes256($mac) => $body,
        }
    };
}

/// CMAC over DES/3DES or AES, with the cipher variant picked by key length.
pub struct CmacMac {
    algo: MacAlgo,
    state: Option<CmacState>,
}

impl CmacMac {
    pub fn new(algo: MacAlgo) -> Self {
        Self { algo, state: None }
    }
}

impl MacAlgorithm for CmacMac {
    fn algorithm(&self) -> MacAlgo {
        self.algo
    }

    fn set_key(&mut self, key: &[u8]) -> ProviderResult<()> {
        let algo = self.algo;
        let state = match (algo, key.len()) {
            (MacAlgo::CmacDes, 8) => CmacState::Des(keyed(algo, key)?),
            (MacAlgo::CmacDes, 16) => CmacState::Tdes2(keyed(algo, key)?),
            (MacAlgo::CmacDes, 24) => CmacState::Tdes3(keyed(algo, key)?),
            (MacAlgo::CmacAes, 16) => CmacState::Aes128(keyed(algo, key)?),
            (MacAlgo::CmacAes, 24) => CmacState::Aes192(keyed(algo, key)?),
            (MacAlgo::CmacAes, 32) => CmacState::Aes256(keyed(algo, key)?),
            (_, len) => {
                return Err(ProviderError::invalid_key(algo.name(), format!("{len}-byte key")));
            }
        };
        self.state = Some(state);
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> ProviderResult<()> {
        let state = self.state.as_mut().ok_or_else(|| key_not_set(self.algo))?;
        with_cmac!(state, mac => Mac::update(mac, data));
        Ok(())
    }

    fn finalize(&mut self) -> ProviderResult<Vec<u8>> {
        let state = self.state.take().ok_or_else(|| key_not_set(self.algo))?;
        Ok(with_cmac!(state, mac => Mac::finalize(mac).into_bytes().to_vec()))
    }
}
