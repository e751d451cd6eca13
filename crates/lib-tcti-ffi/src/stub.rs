//! Fake transport modules for tests.
//!
//! Each canned module is a set of Rust `extern "C"` functions exposed through
//! [`StubModule`]. Call counters are thread-local: negotiation runs on the
//! calling thread, so parallel tests never see each other's counts.

use crate::abi::{ReturnCode, TctiContextCommonV1, TctiInfo, TctiInitFn, INFO_SYMBOL, RC_SUCCESS};
use crate::context::ContextBuffer;
use crate::module::{Module, ModuleOpener};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;

/// Context size every stub transport asks for.
pub const STUB_CONTEXT_SIZE: usize = size_of::<TctiContextCommonV1>() + 64;

/// Magic written into stub transport headers.
pub const STUB_MAGIC: u64 = 0x5354_5542_5443_5449;

/// Return code stubs use for failures (`TSS2_TCTI_RC_GENERAL_FAILURE`).
pub const STUB_FAILURE: ReturnCode = (10 << 16) | 1;

#[derive(Default)]
struct Counters {
    init_calls: usize,
    sizes_seen: Vec<usize>,
    finalized: Vec<usize>,
}

thread_local! {
    static COUNTERS: RefCell<Counters> = RefCell::new(Counters::default());
}

/// Reset this thread's counters.
pub fn reset_counters() {
    COUNTERS.with(|c| *c.borrow_mut() = Counters::default());
}

/// Number of init calls made on this thread.
pub fn init_calls() -> usize {
    COUNTERS.with(|c| c.borrow().init_calls)
}

/// Value of `*size` on entry to each init call made on this thread.
pub fn sizes_seen() -> Vec<usize> {
    COUNTERS.with(|c| c.borrow().sizes_seen.clone())
}

/// Addresses of contexts finalized on this thread.
pub fn finalized_contexts() -> Vec<usize> {
    COUNTERS.with(|c| c.borrow().finalized.clone())
}

fn record_init(size: *mut usize) {
    // SAFETY: every caller passes a valid size pointer.
    let seen = unsafe { *size };
    COUNTERS.with(|c| {
        let mut c = c.borrow_mut();
        c.init_calls += 1;
        c.sizes_seen.push(seen);
    });
}

unsafe extern "C" fn stub_finalize(context: *mut c_void) {
    COUNTERS.with(|c| c.borrow_mut().finalized.push(context as usize));
}

/// Write a stub transport header into `context`.
///
/// # Safety
/// `context` must point to at least `size_of::<TctiContextCommonV1>()`
/// writable, suitably aligned bytes.
pub unsafe fn write_stub_header(context: *mut c_void) {
    unsafe {
        context.cast::<TctiContextCommonV1>().write(TctiContextCommonV1 {
            magic: STUB_MAGIC,
            version: 1,
            transmit: None,
            receive: None,
            finalize: Some(stub_finalize),
            cancel: None,
            get_poll_handles: None,
            set_locality: None,
        });
    }
}

/// A transport context that no loader handed out, as a session layer might
/// substitute one.
pub fn foreign_context() -> ContextBuffer {
    let buffer = match ContextBuffer::zeroed(STUB_CONTEXT_SIZE) {
        Ok(buffer) => buffer,
        Err(e) => panic!("stub context allocation failed: {e}"),
    };
    // SAFETY: buffer is STUB_CONTEXT_SIZE bytes, aligned to 16.
    unsafe { write_stub_header(buffer.as_ptr()) };
    buffer
}

/// Well-behaved init routine.
///
/// # Safety
/// Follows the `TSS2_TCTI_INIT_FUNC` contract.
pub unsafe extern "C" fn stub_init(
    context: *mut c_void,
    size: *mut usize,
    _config: *const c_char,
) -> ReturnCode {
    record_init(size);
    if context.is_null() {
        unsafe { *size = STUB_CONTEXT_SIZE };
        return RC_SUCCESS;
    }
    if unsafe { *size } < STUB_CONTEXT_SIZE {
        return STUB_FAILURE;
    }
    unsafe { write_stub_header(context) };
    RC_SUCCESS
}

/// Init routine whose size query fails.
///
/// # Safety
/// Follows the `TSS2_TCTI_INIT_FUNC` contract.
pub unsafe extern "C" fn failing_size_query_init(
    _context: *mut c_void,
    size: *mut usize,
    _config: *const c_char,
) -> ReturnCode {
    record_init(size);
    STUB_FAILURE
}

/// Init routine that reports a zero context size.
///
/// # Safety
/// Follows the `TSS2_TCTI_INIT_FUNC` contract.
pub unsafe extern "C" fn zero_size_init(
    _context: *mut c_void,
    size: *mut usize,
    _config: *const c_char,
) -> ReturnCode {
    record_init(size);
    unsafe { *size = 0 };
    RC_SUCCESS
}

/// Init routine that asks for an impossible amount of memory.
///
/// # Safety
/// Follows the `TSS2_TCTI_INIT_FUNC` contract.
pub unsafe extern "C" fn oversized_init(
    _context: *mut c_void,
    size: *mut usize,
    _config: *const c_char,
) -> ReturnCode {
    record_init(size);
    unsafe { *size = usize::MAX };
    RC_SUCCESS
}

/// Init routine that sizes fine but fails to initialize.
///
/// # Safety
/// Follows the `TSS2_TCTI_INIT_FUNC` contract.
pub unsafe extern "C" fn failing_init(
    context: *mut c_void,
    size: *mut usize,
    _config: *const c_char,
) -> ReturnCode {
    record_init(size);
    if context.is_null() {
        unsafe { *size = STUB_CONTEXT_SIZE };
        return RC_SUCCESS;
    }
    STUB_FAILURE
}

struct StaticInfo(TctiInfo);

// Points only at 'static string literals and functions.
unsafe impl Sync for StaticInfo {}

macro_rules! stub_info {
    ($info:ident, $info_fn:ident, $init:expr) => {
        static $info: StaticInfo = StaticInfo(TctiInfo {
            version: 2,
            name: b"stub\0".as_ptr() as *const c_char,
            description: b"In-process fake transport\0".as_ptr() as *const c_char,
            config_help: b"none\0".as_ptr() as *const c_char,
            init: Some($init),
        });

        unsafe extern "C" fn $info_fn() -> *const TctiInfo {
            &$info.0
        }
    };
}

stub_info!(TRANSPORT_INFO, transport_info, stub_init as TctiInitFn);
stub_info!(SIZE_QUERY_FAIL_INFO, size_query_fail_info, failing_size_query_init as TctiInitFn);
stub_info!(INIT_FAIL_INFO, init_fail_info, failing_init as TctiInitFn);

/// A fake module: a path and a symbol table.
pub struct StubModule {
    path: String,
    symbols: HashMap<String, usize>,
}

impl StubModule {
    /// Module exporting no symbols at all.
    pub fn empty(path: &str) -> Self {
        Self {
            path: path.to_string(),
            symbols: HashMap::new(),
        }
    }

    /// Add an exported symbol.
    pub fn with_symbol(mut self, name: &str, address: usize) -> Self {
        self.symbols.insert(name.to_string(), address);
        self
    }

    /// Working transport.
    pub fn transport(path: &str) -> Self {
        Self::empty(path).with_symbol(INFO_SYMBOL, transport_info as *const () as usize)
    }

    /// Module without the info entry point.
    pub fn without_info(path: &str) -> Self {
        Self::empty(path).with_symbol("Tss2_Tcti_Device_Init", stub_init as *const () as usize)
    }

    /// Transport whose size query fails.
    pub fn failing_size_query(path: &str) -> Self {
        Self::empty(path).with_symbol(INFO_SYMBOL, size_query_fail_info as *const () as usize)
    }

    /// Transport whose second init call fails.
    pub fn failing_init(path: &str) -> Self {
        Self::empty(path).with_symbol(INFO_SYMBOL, init_fail_info as *const () as usize)
    }
}

impl Module for StubModule {
    fn path(&self) -> &str {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|&address| NonNull::new(address as *mut c_void))
    }
}

/// Opener serving [`StubModule`]s by exact path, recording every attempt.
#[derive(Clone, Default)]
pub struct StubOpener {
    modules: Arc<Mutex<HashMap<String, Arc<StubModule>>>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl StubOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, module: StubModule) -> Self {
        self.modules
            .lock()
            .insert(module.path.clone(), Arc::new(module));
        self
    }

    /// Every path passed to `open`, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

impl ModuleOpener for StubOpener {
    fn open(&self, path: &str) -> Result<Arc<dyn Module>, String> {
        self.attempts.lock().push(path.to_string());
        match self.modules.lock().get(path) {
            Some(module) => Ok(module.clone() as Arc<dyn Module>),
            None => Err(format!("{path}: cannot open shared object file")),
        }
    }
}
