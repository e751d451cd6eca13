//! Provider lifecycle.
//!
//! [`CryptoProvider::initialize`] runs the initialization sequence once and
//! always yields a provider: either `Ready`, or `Failed` with every resource
//! acquired before the failing step still held so that
//! [`shutdown`](CryptoProvider::shutdown) can release it.
//!
//! ```text
//! init:     1 mutex pool   2 lock callback   3 restricted mode
//!           4 rng engine + rng   5 transport + device session   6 alternate engine
//! teardown: a session   b transport module   c alternate engine
//!           d rng + rng engine   e lock callback   f mutex pool
//! ```

use crate::algorithms::{AsymmetricAlgorithm, HashAlgorithm, MacAlgorithm, SymmetricAlgorithm};
use crate::backend::{CryptoBackend, Engine, EngineMethod};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::factory::AlgorithmFactory;
use crate::lock_bridge::LockBridge;
use crate::mutex::{MutexPool, SystemMutexPool};
use crate::rng::{BackendRng, RandomGenerator};
use crate::software::{SoftwareBackend, RDRAND_ENGINE_ID};
use lib_tcti_ffi::{DeviceSession, DeviceStack, SysContextStack, TctiInfoSummary, TctiLoader};
use lib_types::{AlgorithmType, AsymAlgo, HashAlgo, InitStep, MacAlgo, ProviderState, RngImpl, SymAlgo};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

#[cfg(feature = "gost")]
use crate::software::GOST_ENGINE_ID;

/// Everything the provider drives but does not own the implementation of.
pub struct Collaborators {
    pub backend: Arc<dyn CryptoBackend>,
    pub pool: Arc<dyn MutexPool>,
    pub loader: Arc<TctiLoader>,
    pub device: Arc<dyn DeviceStack>,
    pub config: ProviderConfig,
}

impl Collaborators {
    /// Process-wide software backend, mutex pool and transport loader, plus
    /// the built-in session layer.
    ///
    /// The global loader is switched to the configured unload policy.
    pub fn system(config: ProviderConfig) -> Self {
        let loader = TctiLoader::global();
        loader.set_policy(config.unload_policy);
        Self {
            backend: SoftwareBackend::global(),
            pool: SystemMutexPool::global(),
            loader,
            device: Arc::new(SysContextStack),
            config,
        }
    }
}

/// A step that failed during initialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InitFailure {
    pub step: InitStep,
    pub message: String,
    /// Whether the failure put the provider in `Failed`.
    pub fatal: bool,
}

#[derive(Default)]
struct Resources {
    bridge: Option<LockBridge>,
    rng_engine: Option<Box<dyn Engine>>,
    rng: Option<Arc<dyn RandomGenerator>>,
    transport_loaded: bool,
    session: Option<DeviceSession>,
    alt_engine: Option<Box<dyn Engine>>,
}

/// Engine with a functional reference that is finished on drop unless
/// handed over with [`into_inner`](Self::into_inner).
#[cfg_attr(not(feature = "gost"), allow(dead_code))]
struct InitializedEngine(Option<Box<dyn Engine>>);

#[cfg_attr(not(feature = "gost"), allow(dead_code))]
impl InitializedEngine {
    fn init(mut engine: Box<dyn Engine>) -> ProviderResult<Self> {
        engine.init()?;
        Ok(Self(Some(engine)))
    }

    fn get(&mut self) -> ProviderResult<&mut Box<dyn Engine>> {
        self.0
            .as_mut()
            .ok_or_else(|| ProviderError::engine("unknown", "stay initialized"))
    }

    fn into_inner(mut self) -> Option<Box<dyn Engine>> {
        self.0.take()
    }
}

impl Drop for InitializedEngine {
    fn drop(&mut self) {
        if let Some(mut engine) = self.0.take() {
            tracing::debug!(engine = engine.id(), "Rolling back engine initialization");
            engine.finish();
        }
    }
}

/// The process-wide crypto provider.
pub struct CryptoProvider {
    collab: Collaborators,
    factory: AlgorithmFactory,
    state: AtomicU8,
    self_test_passed: AtomicBool,
    failures: Mutex<Vec<InitFailure>>,
    resources: Mutex<Resources>,
}

impl CryptoProvider {
    /// Run the initialization sequence.
    pub fn initialize(collab: Collaborators) -> Self {
        let provider = Self {
            collab,
            factory: AlgorithmFactory::new(),
            state: AtomicU8::new(ProviderState::Uninitialized as u8),
            self_test_passed: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            resources: Mutex::new(Resources::default()),
        };

        provider.set_state(ProviderState::Initializing);
        let outcome = {
            let mut res = provider.resources.lock();
            provider.run_init(&mut res)
        };

        match outcome {
            Ok(()) => {
                provider.set_state(ProviderState::Ready);
                tracing::info!(backend = provider.collab.backend.name(), "Crypto provider ready");
            }
            Err((step, error)) => {
                provider.record_failure(step, error, true);
                provider.set_state(ProviderState::Failed);
            }
        }
        provider
    }

    fn run_init(&self, res: &mut Resources) -> Result<(), (InitStep, ProviderError)> {
        let backend = &*self.collab.backend;

        // 1. One pool mutex per backend lock, counted afresh every time
        let count = backend.num_locks();
        let bridge = LockBridge::new(&*self.collab.pool, count).map_err(|e| (InitStep::MutexPool, e))?;

        // 2
        if !bridge.install(backend) {
            let reason = "locking callback owned by another component";
            self.record_failure(InitStep::LockCallback, reason, false);
        }
        res.bridge = Some(bridge);

        // 3
        #[cfg(feature = "fips")]
        {
            self.enter_restricted_mode().map_err(|e| (InitStep::SelfTest, e))?;
        }

        // 4
        backend.load_algorithms();
        if self.collab.config.hardware_rng {
            res.rng_engine = self.init_hardware_rng();
        }
        res.rng = Some(Arc::new(BackendRng::new(self.collab.backend.clone())));

        // 5
        #[cfg(feature = "tpm")]
        {
            res.session = Some(self.open_device_session().map_err(|e| (InitStep::DeviceSession, e))?);
            res.transport_loaded = true;
        }

        // 6
        #[cfg(feature = "gost")]
        {
            match self.init_alternate_engine() {
                Ok(engine) => res.alt_engine = Some(engine),
                Err(e) if self.collab.config.require_alternate_engine || e.is_fatal() => {
                    return Err((InitStep::AlternateEngine, e));
                }
                Err(e) => self.record_failure(InitStep::AlternateEngine, e, false),
            }
        }

        Ok(())
    }

    #[cfg(feature = "fips")]
    fn enter_restricted_mode(&self) -> ProviderResult<()> {
        let backend = &*self.collab.backend;
        if !backend.supports_fips() {
            tracing::warn!(backend = backend.name(), "Backend has no restricted mode");
            return Ok(());
        }
        if backend.fips_mode() {
            // Already entered by an earlier instance; self-tests are not re-run
            backend.restore_fips_rand();
        } else {
            self.self_test_passed.store(false, Ordering::Release);
            backend.enter_fips_mode()?;
        }
        self.self_test_passed.store(true, Ordering::Release);
        Ok(())
    }

    /// Failures here are recorded and the software RNG stays in use.
    fn init_hardware_rng(&self) -> Option<Box<dyn Engine>> {
        let Some(mut engine) = self.collab.backend.engine_by_id(RDRAND_ENGINE_ID) else {
            self.record_failure(InitStep::Rng, "hardware RNG engine not available", false);
            return None;
        };
        if let Err(e) = engine.init() {
            self.record_failure(InitStep::Rng, e, false);
            return None;
        }
        if let Err(e) = engine.set_default(EngineMethod::Rand) {
            self.record_failure(InitStep::Rng, e, false);
        }
        Some(engine)
    }

    #[cfg(feature = "tpm")]
    fn open_device_session(&self) -> ProviderResult<DeviceSession> {
        let loader = &self.collab.loader;
        let transport = loader.load(&self.collab.config.transport)?;
        DeviceSession::open(&*self.collab.device, transport).map_err(|e| {
            loader.unload();
            ProviderError::from(e)
        })
    }

    #[cfg(feature = "gost")]
    fn init_alternate_engine(&self) -> ProviderResult<Box<dyn Engine>> {
        let engine = self
            .collab
            .backend
            .engine_by_id(GOST_ENGINE_ID)
            .ok_or_else(|| ProviderError::engine(GOST_ENGINE_ID, "load"))?;

        // A failed init frees the structural reference by dropping it
        let mut guard = InitializedEngine::init(engine)?;
        let engine = guard.get()?;
        if !engine.digest(HashAlgo::Gost) {
            return Err(ProviderError::engine(GOST_ENGINE_ID, "provide the GOST R 34.11-94 digest"));
        }
        engine.register_pkey_asn1_meths()?;
        engine.ctrl_cmd_string("CRYPT_PARAMS", &self.collab.config.gost_crypt_params)?;

        tracing::info!(params = %self.collab.config.gost_crypt_params, "GOST engine initialized");
        guard
            .into_inner()
            .ok_or_else(|| ProviderError::engine(GOST_ENGINE_ID, "stay initialized"))
    }

    fn record_failure(&self, step: InitStep, error: impl fmt::Display, fatal: bool) {
        if fatal {
            tracing::error!(step = %step, error = %error, "Provider initialization failed");
        } else {
            tracing::warn!(step = %step, error = %error, "Optional initialization step failed");
        }
        self.failures.lock().push(InitFailure {
            step,
            message: error.to_string(),
            fatal,
        });
    }

    fn set_state(&self, state: ProviderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(ProviderState::Failed)
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_usable()
    }

    fn ensure_ready(&self) -> ProviderResult<()> {
        match self.state() {
            ProviderState::Ready => Ok(()),
            state => Err(ProviderError::NotReady { state }),
        }
    }

    /// Failed initialization steps, fatal or not, in the order they failed.
    pub fn failures(&self) -> Vec<InitFailure> {
        self.failures.lock().clone()
    }

    /// Whether restricted mode was entered and its self-tests passed.
    pub fn self_test_status(&self) -> bool {
        self.self_test_passed.load(Ordering::Acquire)
    }

    /// Size of the lock table, while it is held.
    pub fn lock_count(&self) -> Option<usize> {
        self.resources.lock().bridge.as_ref().map(|b| b.table().len())
    }

    /// Whether this provider installed the backend's locking callback.
    pub fn owns_locking_callback(&self) -> bool {
        self.resources
            .lock()
            .bridge
            .as_ref()
            .map_or(false, LockBridge::owns_callback)
    }

    pub fn has_device_session(&self) -> bool {
        self.resources.lock().session.is_some()
    }

    pub fn has_alternate_engine(&self) -> bool {
        self.resources.lock().alt_engine.is_some()
    }

    /// Info of the loaded transport module.
    pub fn transport_info(&self) -> Option<TctiInfoSummary> {
        self.collab.loader.info()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.collab.config
    }

    pub fn factory(&self) -> ProviderResult<&AlgorithmFactory> {
        self.ensure_ready()?;
        Ok(&self.factory)
    }

    pub fn get_symmetric_algorithm(&self, algo: SymAlgo) -> ProviderResult<Box<dyn SymmetricAlgorithm>> {
        self.factory()?.get_symmetric_algorithm(algo)
    }

    pub fn get_asymmetric_algorithm(&self, algo: AsymAlgo) -> ProviderResult<Box<dyn AsymmetricAlgorithm>> {
        self.factory()?.get_asymmetric_algorithm(algo)
    }

    pub fn get_hash_algorithm(&self, algo: HashAlgo) -> ProviderResult<Box<dyn HashAlgorithm>> {
        self.factory()?.get_hash_algorithm(algo)
    }

    pub fn get_mac_algorithm(&self, algo: MacAlgo) -> ProviderResult<Box<dyn MacAlgorithm>> {
        self.factory()?.get_mac_algorithm(algo)
    }

    pub fn get_symmetric_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn SymmetricAlgorithm>> {
        self.factory()?.get_symmetric_algorithm_by_id(raw)
    }

    pub fn get_asymmetric_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn AsymmetricAlgorithm>> {
        self.factory()?.get_asymmetric_algorithm_by_id(raw)
    }

    pub fn get_hash_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn HashAlgorithm>> {
        self.factory()?.get_hash_algorithm_by_id(raw)
    }

    pub fn get_mac_algorithm_by_id(&self, raw: u32) -> ProviderResult<Box<dyn MacAlgorithm>> {
        self.factory()?.get_mac_algorithm_by_id(raw)
    }

    /// The one process-wide RNG.
    pub fn rng(&self) -> ProviderResult<Arc<dyn RandomGenerator>> {
        self.ensure_ready()?;
        self.resources
            .lock()
            .rng
            .clone()
            .ok_or(ProviderError::NotReady { state: self.state() })
    }

    pub fn get_rng(&self, rng: RngImpl) -> ProviderResult<Arc<dyn RandomGenerator>> {
        match rng {
            RngImpl::Default => self.rng(),
        }
    }

    pub fn get_rng_by_id(&self, raw: u32) -> ProviderResult<Arc<dyn RandomGenerator>> {
        let rng = RngImpl::from_raw(raw).ok_or_else(|| {
            tracing::error!(value = raw, "Unknown RNG implementation");
            ProviderError::UnknownRng(raw)
        })?;
        self.get_rng(rng)
    }

    /// Release everything in reverse order of acquisition.
    ///
    /// Safe on `Ready` and `Failed` providers; a no-op otherwise, so calling
    /// it twice is harmless.
    pub fn shutdown(&self) {
        let current = self.state();
        if !current.can_shut_down()
            || self
                .state
                .compare_exchange(
                    current as u8,
                    ProviderState::ShuttingDown as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
        {
            return;
        }
        tracing::info!(from = %current, "Shutting down crypto provider");

        let mut res = self.resources.lock();
        let backend = &*self.collab.backend;

        // a
        if let Some(session) = res.session.take() {
            session.close(&*self.collab.device);
        }

        // b
        if std::mem::take(&mut res.transport_loaded) {
            self.collab.loader.unload();
        }

        // c
        if let Some(mut engine) = res.alt_engine.take() {
            engine.finish();
        }

        // d
        res.rng = None;
        if let Some(mut engine) = res.rng_engine.take() {
            engine.finish();
        }

        // e, f
        if let Some(bridge) = res.bridge.take() {
            bridge.uninstall(backend);
            bridge.release(&*self.collab.pool);
        }

        drop(res);
        self.set_state(ProviderState::Destroyed);
        tracing::info!("Crypto provider destroyed");
    }
}

impl Drop for CryptoProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_tcti_ffi::stub::{StubModule, StubOpener};
    use lib_tcti_ffi::UnloadPolicy;

    fn collaborators(opener: StubOpener) -> Collaborators {
        collaborators_with(Arc::new(SoftwareBackend::new()), opener)
    }

    fn collaborators_with(backend: Arc<SoftwareBackend>, opener: StubOpener) -> Collaborators {
        Collaborators {
            backend,
            pool: Arc::new(SystemMutexPool::new()),
            loader: Arc::new(TctiLoader::new(Arc::new(opener), UnloadPolicy::Retain)),
            device: Arc::new(SysContextStack),
            config: ProviderConfig::default(),
        }
    }

    #[test]
    fn test_ready_with_software_backend() {
        let opener = StubOpener::new().with_module(StubModule::transport("tabrmd"));
        let provider = CryptoProvider::initialize(collaborators(opener));

        assert_eq!(provider.state(), ProviderState::Ready, "{:?}", provider.failures());
        assert_eq!(provider.lock_count(), Some(crate::software::NUM_LOCKS));
        assert!(provider.owns_locking_callback());
        assert_eq!(provider.has_device_session(), cfg!(feature = "tpm"));

        let bytes = provider.rng().unwrap().generate_vec(16).unwrap();
        assert_eq!(bytes.len(), 16);

        provider.shutdown();
        assert_eq!(provider.state(), ProviderState::Destroyed);
        assert!(matches!(
            provider.get_hash_algorithm(HashAlgo::Sha256),
            Err(ProviderError::NotReady { state: ProviderState::Destroyed })
        ));
        provider.shutdown();
    }

    #[cfg(feature = "tpm")]
    #[test]
    fn test_missing_transport_fails_at_device_session() {
        let provider = CryptoProvider::initialize(collaborators(StubOpener::new()));
        assert_eq!(provider.state(), ProviderState::Failed);

        let fatal: Vec<_> = provider.failures().into_iter().filter(|f| f.fatal).collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].step, InitStep::DeviceSession);

        assert!(provider.rng().is_err());
        assert_eq!(provider.lock_count(), Some(crate::software::NUM_LOCKS));
    }

    #[cfg(feature = "fips")]
    #[test]
    fn test_self_tests_run_once_across_reinitialization() {
        let backend = Arc::new(SoftwareBackend::new());
        let opener = StubOpener::new().with_module(StubModule::transport("tabrmd"));

        let first = CryptoProvider::initialize(collaborators_with(backend.clone(), opener.clone()));
        assert_eq!(first.state(), ProviderState::Ready, "{:?}", first.failures());
        assert!(first.self_test_status());
        assert!(backend.fips_mode());
        first.shutdown();

        let second = CryptoProvider::initialize(collaborators_with(backend.clone(), opener));
        assert_eq!(second.state(), ProviderState::Ready, "{:?}", second.failures());
        assert!(second.self_test_status());
        assert_eq!(backend.self_tests_run(), 1);
    }

    #[test]
    fn test_system_collaborators_share_global_loader() {
        let close = Collaborators::system(ProviderConfig {
            unload_policy: UnloadPolicy::Close,
            ..ProviderConfig::default()
        });
        assert!(Arc::ptr_eq(&close.loader, &TctiLoader::global()));
        assert_eq!(TctiLoader::global().policy(), UnloadPolicy::Close);

        let retain = Collaborators::system(ProviderConfig::default());
        assert!(Arc::ptr_eq(&retain.loader, &close.loader));
        assert_eq!(TctiLoader::global().policy(), UnloadPolicy::Retain);
    }

    #[test]
    fn test_unknown_rng_id() {
        let opener = StubOpener::new().with_module(StubModule::transport("tabrmd"));
        let provider = CryptoProvider::initialize(collaborators(opener));
        assert!(provider.get_rng(RngImpl::Default).is_ok());
        assert!(matches!(provider.get_rng_by_id(7), Err(ProviderError::UnknownRng(7))));
    }

    #[test]
    fn test_engine_guard_finishes_on_drop() {
        struct Probe(Arc<AtomicBool>);
        impl Engine for Probe {
            fn id(&self) -> &str {
                "probe"
            }
            fn init(&mut self) -> ProviderResult<()> {
                Ok(())
            }
            fn finish(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
            fn set_default(&mut self, _: EngineMethod) -> ProviderResult<()> {
                Ok(())
            }
            fn digest(&self, _: HashAlgo) -> bool {
                false
            }
            fn register_pkey_asn1_meths(&mut self) -> ProviderResult<()> {
                Ok(())
            }
            fn ctrl_cmd_string(&mut self, _: &str, _: &str) -> ProviderResult<()> {
                Ok(())
            }
        }

        let finished = Arc::new(AtomicBool::new(false));
        drop(InitializedEngine::init(Box::new(Probe(finished.clone()))).unwrap());
        assert!(finished.load(Ordering::SeqCst));

        let finished = Arc::new(AtomicBool::new(false));
        let engine = InitializedEngine::init(Box::new(Probe(finished.clone())))
            .unwrap()
            .into_inner();
        assert!(engine.is_some());
        assert!(!finished.load(Ordering::SeqCst));
    }
}
