//! End-to-end lifecycle tests against a recording backend and stub
//! transport modules.

use lib_crypto_provider::config::ProviderConfig;
use lib_crypto_provider::{
    Collaborators, CryptoBackend, CryptoProvider, Engine, EngineMethod, HashAlgo, InitStep,
    LockMode, LockingCallback, MutexPool, PoolMutex, ProviderError, ProviderResult,
    ProviderState, SystemMutexPool,
};
use lib_tcti_ffi::stub::{self, StubModule, StubOpener};
use lib_tcti_ffi::{
    AbiVersion, ContextBuffer, DeviceStack, ReturnCode, SysContextStack, TctiLoader, UnloadPolicy,
};
use parking_lot::{Mutex, RwLock};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Events = Arc<Mutex<Vec<String>>>;

fn position(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("{event} not in {events:?}"))
}

#[cfg_attr(not(feature = "gost"), allow(dead_code))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GostBehavior {
    Absent,
    InitFails,
    CtrlFails,
    Works,
}

#[cfg_attr(not(feature = "fips"), allow(dead_code))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FipsBehavior {
    Absent,
    SelfTestFails,
}

struct StubEngine {
    id: &'static str,
    fail_init: bool,
    fail_ctrl: bool,
    events: Events,
}

impl Engine for StubEngine {
    fn id(&self) -> &str {
        self.id
    }

    fn init(&mut self) -> ProviderResult<()> {
        if self.fail_init {
            return Err(ProviderError::engine(self.id, "initialize"));
        }
        self.events.lock().push(format!("init:{}", self.id));
        Ok(())
    }

    fn finish(&mut self) {
        self.events.lock().push(format!("finish:{}", self.id));
    }

    fn set_default(&mut self, method: EngineMethod) -> ProviderResult<()> {
        self.events.lock().push(format!("default:{}:{method}", self.id));
        Ok(())
    }

    fn digest(&self, algo: HashAlgo) -> bool {
        algo == HashAlgo::Gost
    }

    fn register_pkey_asn1_meths(&mut self) -> ProviderResult<()> {
        Ok(())
    }

    fn ctrl_cmd_string(&mut self, cmd: &str, arg: &str) -> ProviderResult<()> {
        if self.fail_ctrl {
            return Err(ProviderError::engine(self.id, "apply control command"));
        }
        self.events.lock().push(format!("ctrl:{cmd}={arg}"));
        Ok(())
    }
}

struct StubBackend {
    locks: AtomicUsize,
    callback: RwLock<Option<LockingCallback>>,
    rdrand: bool,
    gost: GostBehavior,
    fips: FipsBehavior,
    events: Events,
}

impl StubBackend {
    fn new(locks: usize, events: Events) -> Self {
        Self {
            locks: AtomicUsize::new(locks),
            callback: RwLock::new(None),
            rdrand: true,
            gost: GostBehavior::Works,
            fips: FipsBehavior::Absent,
            events,
        }
    }

    #[cfg_attr(not(feature = "gost"), allow(dead_code))]
    fn with_gost(mut self, gost: GostBehavior) -> Self {
        self.gost = gost;
        self
    }

    fn engine(&self, id: &'static str, fail_init: bool, fail_ctrl: bool) -> Box<dyn Engine> {
        Box::new(StubEngine {
            id,
            fail_init,
            fail_ctrl,
            events: self.events.clone(),
        })
    }
}

impl CryptoBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn num_locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    fn locking_callback_installed(&self) -> bool {
        self.callback.read().is_some()
    }

    fn set_locking_callback(&self, callback: Option<LockingCallback>) {
        let event = if callback.is_some() { "callback:set" } else { "callback:clear" };
        self.events.lock().push(event.to_string());
        *self.callback.write() = callback;
    }

    fn install_locking_callback_if_unset(&self, callback: LockingCallback) -> bool {
        let mut slot = self.callback.write();
        if slot.is_some() {
            return false;
        }
        self.events.lock().push("callback:set".to_string());
        *slot = Some(callback);
        true
    }

    fn supports_fips(&self) -> bool {
        self.fips != FipsBehavior::Absent
    }

    fn enter_fips_mode(&self) -> ProviderResult<()> {
        self.events.lock().push("fips:self-test".to_string());
        Err(ProviderError::SelfTestFailed("SHA-256 known-answer test mismatch".to_string()))
    }

    fn engine_by_id(&self, id: &str) -> Option<Box<dyn Engine>> {
        match (id, self.gost) {
            ("rdrand", _) if self.rdrand => Some(self.engine("rdrand", false, false)),
            ("gost", GostBehavior::Absent) => None,
            ("gost", GostBehavior::InitFails) => Some(self.engine("gost", true, false)),
            ("gost", GostBehavior::CtrlFails) => Some(self.engine("gost", false, true)),
            ("gost", GostBehavior::Works) => Some(self.engine("gost", false, false)),
            _ => None,
        }
    }

    fn random_bytes(&self, buf: &mut [u8]) -> ProviderResult<()> {
        let callback = self.callback.read().clone();
        if let Some(cb) = &callback {
            cb(LockMode::Lock, 0);
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(7);
        }
        if let Some(cb) = &callback {
            cb(LockMode::Unlock, 0);
        }
        Ok(())
    }
}

/// Pool that logs every recycled mutex.
struct RecordingPool {
    inner: SystemMutexPool,
    events: Events,
}

impl MutexPool for RecordingPool {
    fn get_mutex(&self) -> Option<Arc<dyn PoolMutex>> {
        self.inner.get_mutex()
    }

    fn recycle_mutex(&self, mutex: Arc<dyn PoolMutex>) {
        self.events.lock().push("pool:recycle".to_string());
        self.inner.recycle_mutex(mutex);
    }
}

/// Session layer that logs teardown and can report a substituted
/// transport context.
struct RecordingStack {
    events: Events,
    swapped: Option<Mutex<ContextBuffer>>,
}

#[cfg_attr(not(feature = "tpm"), allow(dead_code))]
impl RecordingStack {
    fn new(events: Events) -> Self {
        Self { events, swapped: None }
    }

    fn swapping(events: Events) -> Self {
        Self {
            events,
            swapped: Some(Mutex::new(stub::foreign_context())),
        }
    }

    fn swapped_address(&self) -> Option<usize> {
        self.swapped.as_ref().map(|b| b.lock().as_ptr() as usize)
    }
}

impl DeviceStack for RecordingStack {
    fn context_size(&self) -> usize {
        SysContextStack.context_size()
    }

    fn initialize(&self, sys: &mut ContextBuffer, tcti: NonNull<c_void>, abi: AbiVersion) -> Result<(), ReturnCode> {
        SysContextStack.initialize(sys, tcti, abi)
    }

    fn transport_context(&self, sys: &ContextBuffer) -> Option<NonNull<c_void>> {
        match &self.swapped {
            Some(buffer) => Some(buffer.lock().as_non_null()),
            None => SysContextStack.transport_context(sys),
        }
    }

    fn finalize(&self, sys: &mut ContextBuffer) {
        self.events.lock().push("session:finalize".to_string());
        SysContextStack.finalize(sys);
    }
}

struct Harness {
    events: Events,
    backend: Arc<StubBackend>,
    pool: Arc<RecordingPool>,
    opener: StubOpener,
}

impl Harness {
    fn new(locks: usize) -> Self {
        Self::with_backend(|events| StubBackend::new(locks, events))
    }

    fn with_backend(make: impl FnOnce(Events) -> StubBackend) -> Self {
        stub::reset_counters();
        let events: Events = Arc::default();
        Self {
            backend: Arc::new(make(events.clone())),
            pool: Arc::new(RecordingPool {
                inner: SystemMutexPool::new(),
                events: events.clone(),
            }),
            opener: StubOpener::new().with_module(StubModule::transport("tabrmd")),
            events,
        }
    }

    fn collaborators(&self, device: Arc<dyn DeviceStack>, config: ProviderConfig) -> Collaborators {
        Collaborators {
            backend: self.backend.clone(),
            pool: self.pool.clone(),
            loader: Arc::new(TctiLoader::new(Arc::new(self.opener.clone()), UnloadPolicy::Retain)),
            device,
            config,
        }
    }

    fn start(&self) -> CryptoProvider {
        let device = Arc::new(RecordingStack::new(self.events.clone()));
        CryptoProvider::initialize(self.collaborators(device, ProviderConfig::default()))
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn outstanding(&self) -> usize {
        self.pool.inner.outstanding()
    }
}

#[test]
fn test_successful_init_serves_rng_and_algorithms() {
    let h = Harness::new(16);
    let provider = h.start();

    assert_eq!(provider.state(), ProviderState::Ready, "{:?}", provider.failures());
    assert!(provider.failures().is_empty());
    assert_eq!(provider.lock_count(), Some(16));
    assert_eq!(h.outstanding(), 16);
    assert!(provider.owns_locking_callback());
    assert_eq!(provider.has_device_session(), cfg!(feature = "tpm"));

    let bytes = provider.rng().unwrap().generate_vec(8).unwrap();
    assert_eq!(bytes.len(), 8);

    let events = h.events();
    assert!(position(&events, "init:rdrand") < position(&events, "default:rdrand:rand"));

    provider.shutdown();
    assert_eq!(provider.state(), ProviderState::Destroyed);
    assert_eq!(h.outstanding(), 0);
}

#[test]
fn test_hash_by_type_and_unknown_id() {
    let h = Harness::new(16);
    let provider = h.start();

    let mut sha = provider.get_hash_algorithm(HashAlgo::Sha256).unwrap();
    sha.update(b"abc");
    assert_eq!(
        hex::encode(sha.finalize()),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );

    assert!(matches!(
        provider.get_hash_algorithm_by_id(9999),
        Err(ProviderError::UnsupportedAlgorithm { value: 9999, .. })
    ));
    assert_eq!(provider.state(), ProviderState::Ready);
}

#[test]
fn test_lock_count_follows_backend_on_each_init() {
    let h = Harness::new(16);
    let first = h.start();
    assert_eq!(first.lock_count(), Some(16));
    drop(first);
    assert_eq!(h.outstanding(), 0);

    h.backend.locks.store(24, Ordering::SeqCst);
    let second = h.start();
    assert_eq!(second.lock_count(), Some(24));
    assert_eq!(h.outstanding(), 24);
}

#[test]
fn test_exhausted_pool_fails_without_leaking() {
    let h = Harness::new(16);
    let pool: Arc<dyn MutexPool> = Arc::new(SystemMutexPool::with_limit(4));
    let mut collab = h.collaborators(Arc::new(SysContextStack), ProviderConfig::default());
    collab.pool = pool;

    let provider = CryptoProvider::initialize(collab);
    assert_eq!(provider.state(), ProviderState::Failed);
    assert_eq!(provider.failures()[0].step, InitStep::MutexPool);
    assert_eq!(provider.lock_count(), None);
    assert!(!h.backend.locking_callback_installed());
    assert!(matches!(
        provider.rng(),
        Err(ProviderError::NotReady { state: ProviderState::Failed })
    ));
}

#[test]
fn test_foreign_callback_is_left_alone() {
    let h = Harness::new(16);
    h.backend.set_locking_callback(Some(Arc::new(|_: LockMode, _: usize| {})));

    let provider = h.start();
    assert_eq!(provider.state(), ProviderState::Ready);
    assert!(!provider.owns_locking_callback());
    let failure = &provider.failures()[0];
    assert_eq!(failure.step, InitStep::LockCallback);
    assert!(!failure.fatal);

    provider.shutdown();
    assert!(h.backend.locking_callback_installed());
    assert!(!h.events().contains(&"callback:clear".to_string()));
}

#[test]
fn test_hardware_rng_can_be_disabled() {
    let h = Harness::new(16);
    let config = ProviderConfig {
        hardware_rng: false,
        ..Default::default()
    };
    let device = Arc::new(RecordingStack::new(h.events.clone()));
    let provider = CryptoProvider::initialize(h.collaborators(device, config));

    assert!(provider.rng().is_ok());
    assert!(!h.events().iter().any(|e| e.contains("rdrand")));
}

#[test]
fn test_missing_hardware_rng_engine_is_not_fatal() {
    let h = Harness::with_backend(|events| StubBackend {
        rdrand: false,
        ..StubBackend::new(16, events)
    });
    let provider = h.start();
    assert_eq!(provider.state(), ProviderState::Ready);
    assert!(provider.rng().is_ok());

    let failures = provider.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, InitStep::Rng);
    assert!(!failures[0].fatal);
}

#[cfg(feature = "fips")]
#[test]
fn test_failed_self_test_stops_init() {
    let h = Harness::with_backend(|events| StubBackend {
        fips: FipsBehavior::SelfTestFails,
        ..StubBackend::new(16, events)
    });
    let provider = h.start();

    assert_eq!(provider.state(), ProviderState::Failed);
    let failure = &provider.failures()[0];
    assert_eq!(failure.step, InitStep::SelfTest);
    assert!(failure.fatal);
    assert!(!provider.self_test_status());

    let events = h.events();
    assert!(position(&events, "callback:set") < position(&events, "fips:self-test"));
    assert!(!events.iter().any(|e| e == "init:rdrand"));

    provider.shutdown();
    assert_eq!(h.outstanding(), 0);
    assert!(!h.backend.locking_callback_installed());
}

#[test]
fn test_concurrent_first_access_initializes_once() {
    use lib_crypto_provider::singleton::ProviderCell;

    let h = Arc::new(Harness::new(8));
    let created = Arc::new(AtomicUsize::new(0));
    let cell = {
        let h = h.clone();
        let created = created.clone();
        ProviderCell::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            h.collaborators(Arc::new(SysContextStack), ProviderConfig::default())
        })
    };

    let providers: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| cell.instance())).collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(providers.iter().all(|p| Arc::ptr_eq(p, &providers[0])));
    assert_eq!(h.outstanding(), 8);

    cell.reset();
    assert_eq!(providers[0].state(), ProviderState::Destroyed);
    assert_eq!(h.outstanding(), 0);

    let again = cell.instance();
    assert_eq!(again.state(), ProviderState::Ready);
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[cfg(feature = "tpm")]
mod device_session {
    use super::*;

    #[test]
    fn test_missing_info_symbol_fails_and_finalizes_nothing() {
        let h = Harness::new(16);
        let opener = StubOpener::new().with_module(StubModule::without_info("tabrmd"));
        let mut collab = h.collaborators(Arc::new(SysContextStack), ProviderConfig::default());
        collab.loader = Arc::new(TctiLoader::new(Arc::new(opener), UnloadPolicy::Retain));

        let provider = CryptoProvider::initialize(collab);
        assert_eq!(provider.state(), ProviderState::Failed);
        let failure = &provider.failures()[0];
        assert_eq!(failure.step, InitStep::DeviceSession);
        assert!(failure.fatal);
        assert!(provider.transport_info().is_none());

        provider.shutdown();
        assert!(stub::finalized_contexts().is_empty());
        assert_eq!(h.outstanding(), 0);
        assert!(!h.backend.locking_callback_installed());
    }

    #[test]
    fn test_session_transport_is_finalized_on_shutdown() {
        let h = Harness::new(16);
        let provider = h.start();
        let info = provider.transport_info().unwrap();
        assert_eq!(info.name.as_deref(), Some("stub"));

        provider.shutdown();
        assert_eq!(stub::finalized_contexts().len(), 1);
        assert!(provider.transport_info().is_none());
    }

    #[test]
    fn test_substituted_transport_context_is_the_one_finalized() {
        let h = Harness::new(16);
        let stack = Arc::new(RecordingStack::swapping(h.events.clone()));
        let foreign = stack.swapped_address().unwrap();

        let provider =
            CryptoProvider::initialize(h.collaborators(stack.clone(), ProviderConfig::default()));
        assert_eq!(provider.state(), ProviderState::Ready);

        provider.shutdown();
        assert_eq!(stub::finalized_contexts(), vec![foreign]);
    }

    #[test]
    fn test_teardown_runs_in_reverse_order() {
        let h = Harness::new(4);
        let provider = h.start();
        provider.shutdown();
        provider.shutdown();

        let events = h.events();
        let session = position(&events, "session:finalize");
        let rdrand = position(&events, "finish:rdrand");
        let callback = position(&events, "callback:clear");
        let pool = position(&events, "pool:recycle");
        assert!(session < rdrand);
        assert!(rdrand < callback);
        assert!(callback < pool);
        assert_eq!(events.iter().filter(|e| *e == "pool:recycle").count(), 4);

        #[cfg(feature = "gost")]
        {
            let gost = position(&events, "finish:gost");
            assert!(session < gost && gost < rdrand);
        }
    }
}

#[cfg(feature = "gost")]
mod alternate_engine {
    use super::*;

    fn start_with(gost: GostBehavior, require: bool) -> (Harness, CryptoProvider) {
        let h = Harness::with_backend(|events| StubBackend::new(16, events).with_gost(gost));
        let config = ProviderConfig {
            require_alternate_engine: require,
            ..Default::default()
        };
        let device = Arc::new(RecordingStack::new(h.events.clone()));
        let provider = CryptoProvider::initialize(h.collaborators(device, config));
        (h, provider)
    }

    #[test]
    fn test_engine_is_configured() {
        let (h, provider) = start_with(GostBehavior::Works, false);
        assert!(provider.has_alternate_engine());
        assert!(h
            .events()
            .contains(&"ctrl:CRYPT_PARAMS=id-Gost28147-89-CryptoPro-A-ParamSet".to_string()));
    }

    #[test]
    fn test_missing_engine_is_recorded_not_fatal() {
        let (_h, provider) = start_with(GostBehavior::Absent, false);
        assert_eq!(provider.state(), ProviderState::Ready);
        let failures = provider.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, InitStep::AlternateEngine);
        assert!(!failures[0].fatal);
    }

    #[test]
    fn test_failed_init_is_not_finished() {
        let (h, provider) = start_with(GostBehavior::InitFails, false);
        assert_eq!(provider.state(), ProviderState::Ready);
        assert!(!provider.has_alternate_engine());
        provider.shutdown();
        assert!(!h.events().contains(&"finish:gost".to_string()));
    }

    #[test]
    fn test_failed_configuration_rolls_back_init() {
        let (h, provider) = start_with(GostBehavior::CtrlFails, false);
        assert_eq!(provider.state(), ProviderState::Ready);
        let events = h.events();
        assert!(position(&events, "init:gost") < position(&events, "finish:gost"));
    }

    #[test]
    fn test_required_engine_failure_is_fatal() {
        let (h, provider) = start_with(GostBehavior::Absent, true);
        assert_eq!(provider.state(), ProviderState::Failed);
        assert!(provider.failures()[0].fatal);
        assert!(provider.get_hash_algorithm(HashAlgo::Sha1).is_err());

        provider.shutdown();
        assert_eq!(h.outstanding(), 0);
        assert_eq!(stub::finalized_contexts().len(), usize::from(cfg!(feature = "tpm")));
    }
}
