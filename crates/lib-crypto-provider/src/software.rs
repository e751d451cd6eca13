//! Built-in backend: RustCrypto primitives, OS entropy and the CPU's
//! hardware random instruction.

use crate::backend::{CryptoBackend, Engine, EngineMethod};
use crate::error::{ProviderError, ProviderResult};
use crate::lock_bridge::{LockMode, LockingCallback};
use lib_types::HashAlgo;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Numbered locks the backend protects its tables with.
pub const NUM_LOCKS: usize = 41;

/// Lock held around every random draw.
pub const LOCK_RAND: usize = 18;

/// Id of the hardware random engine.
pub const RDRAND_ENGINE_ID: &str = "rdrand";

/// Id of the GOST engine.
pub const GOST_ENGINE_ID: &str = "gost";

const RAND_SYSTEM: u8 = 0;
const RAND_HARDWARE: u8 = 1;

/// SHA-256("abc").
const SHA256_KAT_INPUT: &[u8] = b"abc";
const SHA256_KAT_DIGEST: [u8; 32] = [
    0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae, 0x22, 0x23,
    0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00, 0x15, 0xad,
];

pub struct SoftwareBackend {
    callback: RwLock<Option<LockingCallback>>,
    fips: AtomicBool,
    self_tests_run: AtomicUsize,
    rand_method: Arc<AtomicU8>,
    algorithms_loaded: AtomicBool,
}

static GLOBAL_BACKEND: Lazy<Arc<SoftwareBackend>> = Lazy::new(|| Arc::new(SoftwareBackend::new()));

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            callback: RwLock::new(None),
            fips: AtomicBool::new(false),
            self_tests_run: AtomicUsize::new(0),
            rand_method: Arc::new(AtomicU8::new(RAND_SYSTEM)),
            algorithms_loaded: AtomicBool::new(false),
        }
    }

    /// The process-wide backend instance.
    pub fn global() -> Arc<SoftwareBackend> {
        GLOBAL_BACKEND.clone()
    }

    /// Whether random draws currently go to the hardware instruction.
    pub fn uses_hardware_rng(&self) -> bool {
        self.rand_method.load(Ordering::Acquire) == RAND_HARDWARE
    }

    /// Number of times the power-on self-tests ran.
    pub fn self_tests_run(&self) -> usize {
        self.self_tests_run.load(Ordering::Acquire)
    }

    fn run_self_tests(&self) -> ProviderResult<()> {
        self.self_tests_run.fetch_add(1, Ordering::AcqRel);
        let digest = Sha256::digest(SHA256_KAT_INPUT);
        if digest.as_slice() != SHA256_KAT_DIGEST {
            return Err(ProviderError::SelfTestFailed(
                "SHA-256 known-answer test mismatch".to_string(),
            ));
        }
        Ok(())
    }

    fn fill(&self, buf: &mut [u8]) -> ProviderResult<()> {
        if self.uses_hardware_rng() && rdrand::fill(buf) {
            return Ok(());
        }
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| ProviderError::Random(e.to_string()))
    }
}

impl CryptoBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn num_locks(&self) -> usize {
        NUM_LOCKS
    }

    fn locking_callback_installed(&self) -> bool {
        self.callback.read().is_some()
    }

    fn set_locking_callback(&self, callback: Option<LockingCallback>) {
        *self.callback.write() = callback;
    }

    fn install_locking_callback_if_unset(&self, callback: LockingCallback) -> bool {
        let mut slot = self.callback.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(callback);
        true
    }

    fn supports_fips(&self) -> bool {
        true
    }

    fn fips_mode(&self) -> bool {
        self.fips.load(Ordering::Acquire)
    }

    fn enter_fips_mode(&self) -> ProviderResult<()> {
        self.run_self_tests()?;
        self.fips.store(true, Ordering::Release);
        tracing::info!("Entered restricted mode");
        Ok(())
    }

    fn restore_fips_rand(&self) {
        self.rand_method.store(RAND_SYSTEM, Ordering::Release);
        tracing::debug!("Restored restricted-mode random method");
    }

    fn load_algorithms(&self) {
        if !self.algorithms_loaded.swap(true, Ordering::AcqRel) {
            tracing::debug!("Registered software algorithms");
        }
    }

    fn engine_by_id(&self, id: &str) -> Option<Box<dyn Engine>> {
        match id {
            RDRAND_ENGINE_ID if rdrand::available() => Some(Box::new(RdrandEngine {
                rand_method: self.rand_method.clone(),
                initialized: false,
            })),
            #[cfg(feature = "gost")]
            GOST_ENGINE_ID => Some(Box::new(GostEngine::default())),
            _ => None,
        }
    }

    fn random_bytes(&self, buf: &mut [u8]) -> ProviderResult<()> {
        let callback = self.callback.read().clone();
        if let Some(callback) = &callback {
            callback(LockMode::Lock, LOCK_RAND);
        }
        let result = self.fill(buf);
        if let Some(callback) = &callback {
            callback(LockMode::Unlock, LOCK_RAND);
        }
        result
    }
}

/// Engine routing the backend's random method to the hardware instruction.
struct RdrandEngine {
    rand_method: Arc<AtomicU8>,
    initialized: bool,
}

impl Engine for RdrandEngine {
    fn id(&self) -> &str {
        RDRAND_ENGINE_ID
    }

    fn init(&mut self) -> ProviderResult<()> {
        if !rdrand::fill(&mut [0u8; 8]) {
            return Err(ProviderError::engine(RDRAND_ENGINE_ID, "initialize"));
        }
        self.initialized = true;
        Ok(())
    }

    fn finish(&mut self) {
        if self.initialized {
            let _ = self.rand_method.compare_exchange(
                RAND_HARDWARE,
                RAND_SYSTEM,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            self.initialized = false;
        }
    }

    fn set_default(&mut self, method: EngineMethod) -> ProviderResult<()> {
        if !self.initialized || method != EngineMethod::Rand {
            return Err(ProviderError::engine(RDRAND_ENGINE_ID, "set default method"));
        }
        self.rand_method.store(RAND_HARDWARE, Ordering::Release);
        Ok(())
    }

    fn digest(&self, _algo: HashAlgo) -> bool {
        false
    }

    fn register_pkey_asn1_meths(&mut self) -> ProviderResult<()> {
        Err(ProviderError::engine(RDRAND_ENGINE_ID, "register ASN.1 methods"))
    }

    fn ctrl_cmd_string(&mut self, _cmd: &str, _arg: &str) -> ProviderResult<()> {
        Err(ProviderError::engine(RDRAND_ENGINE_ID, "accept control commands"))
    }
}

/// Parameter sets accepted by the GOST engine's `CRYPT_PARAMS` command.
#[cfg(feature = "gost")]
const GOST_PARAM_SETS: &[&str] = &[
    "id-Gost28147-89-CryptoPro-A-ParamSet",
    "id-Gost28147-89-CryptoPro-B-ParamSet",
    "id-Gost28147-89-CryptoPro-C-ParamSet",
    "id-Gost28147-89-CryptoPro-D-ParamSet",
    "id-Gost28147-89-TestParamSet",
];

#[cfg(feature = "gost")]
#[derive(Default)]
struct GostEngine {
    initialized: bool,
    asn1_registered: bool,
    crypt_params: Option<String>,
}

#[cfg(feature = "gost")]
impl Engine for GostEngine {
    fn id(&self) -> &str {
        GOST_ENGINE_ID
    }

    fn init(&mut self) -> ProviderResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn finish(&mut self) {
        tracing::debug!(params = ?self.crypt_params, "Finished GOST engine");
        self.initialized = false;
        self.asn1_registered = false;
    }

    fn set_default(&mut self, method: EngineMethod) -> ProviderResult<()> {
        match method {
            EngineMethod::Digests | EngineMethod::PkeyAsn1 if self.initialized => Ok(()),
            _ => Err(ProviderError::engine(GOST_ENGINE_ID, "set default method")),
        }
    }

    fn digest(&self, algo: HashAlgo) -> bool {
        self.initialized && algo == HashAlgo::Gost
    }

    fn register_pkey_asn1_meths(&mut self) -> ProviderResult<()> {
        if !self.initialized {
            return Err(ProviderError::engine(GOST_ENGINE_ID, "register ASN.1 methods"));
        }
        self.asn1_registered = true;
        Ok(())
    }

    fn ctrl_cmd_string(&mut self, cmd: &str, arg: &str) -> ProviderResult<()> {
        if cmd != "CRYPT_PARAMS" || !GOST_PARAM_SETS.contains(&arg) {
            tracing::warn!(cmd, arg, "Rejected GOST engine control command");
            return Err(ProviderError::engine(GOST_ENGINE_ID, "set parameters"));
        }
        self.crypt_params = Some(arg.to_string());
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
mod rdrand {
    use std::arch::x86_64::_rdrand64_step;

    const RETRIES: usize = 10;

    pub fn available() -> bool {
        std::arch::is_x86_feature_detected!("rdrand")
    }

    #[target_feature(enable = "rdrand")]
    unsafe fn next_u64() -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..RETRIES {
            if _rdrand64_step(&mut value) == 1 {
                return Some(value);
            }
        }
        None
    }

    /// Fill `buf` from the instruction; false if unsupported or exhausted.
    pub fn fill(buf: &mut [u8]) -> bool {
        if !available() {
            return false;
        }
        for chunk in buf.chunks_mut(8) {
            // SAFETY: feature presence checked above.
            let Some(value) = (unsafe { next_u64() }) else {
                return false;
            };
            chunk.copy_from_slice(&value.to_le_bytes()[..chunk.len()]);
        }
        true
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod rdrand {
    pub fn available() -> bool {
        false
    }

    pub fn fill(_buf: &mut [u8]) -> bool {
        false
    }
}
