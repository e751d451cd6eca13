//! C ABI of TPM transport modules.
//!
//! Layouts and calling conventions here must stay bit-compatible with the
//! `tss2_tcti.h` definitions that transport modules are compiled against.

use std::ffi::{c_char, c_void};
use std::ptr::NonNull;

/// `TSS2_RC` status code.
pub type ReturnCode = u32;

/// `TSS2_RC_SUCCESS`.
pub const RC_SUCCESS: ReturnCode = 0;

/// Exported name of the module's info entry point.
pub const INFO_SYMBOL: &str = "Tss2_Tcti_Info";

const RC_LAYER_SHIFT: u32 = 16;

/// Layer of codes produced by the session layer.
pub const SYS_RC_LAYER: ReturnCode = 8 << RC_LAYER_SHIFT;

pub const BASE_RC_GENERAL_FAILURE: ReturnCode = 1;
pub const BASE_RC_BAD_CONTEXT: ReturnCode = 3;
pub const BASE_RC_ABI_MISMATCH: ReturnCode = 4;
pub const BASE_RC_BAD_REFERENCE: ReturnCode = 5;
pub const BASE_RC_BAD_SIZE: ReturnCode = 16;

/// `TSS2_TCTI_INIT_FUNC`.
///
/// ```c
/// TSS2_RC init(TSS2_TCTI_CONTEXT *context, size_t *size, const char *config);
/// ```
pub type TctiInitFn =
    unsafe extern "C" fn(context: *mut c_void, size: *mut usize, config: *const c_char) -> ReturnCode;

/// `TSS2_TCTI_INFO_FUNC`.
///
/// ```c
/// const TSS2_TCTI_INFO *Tss2_Tcti_Info(void);
/// ```
pub type TctiInfoFn = unsafe extern "C" fn() -> *const TctiInfo;

/// `TSS2_TCTI_FINALIZE_FCN`.
pub type TctiFinalizeFn = unsafe extern "C" fn(context: *mut c_void);

pub type TctiTransmitFn =
    unsafe extern "C" fn(context: *mut c_void, size: usize, command: *const u8) -> ReturnCode;

pub type TctiReceiveFn = unsafe extern "C" fn(
    context: *mut c_void,
    size: *mut usize,
    response: *mut u8,
    timeout: i32,
) -> ReturnCode;

pub type TctiCancelFn = unsafe extern "C" fn(context: *mut c_void) -> ReturnCode;

pub type TctiGetPollHandlesFn =
    unsafe extern "C" fn(context: *mut c_void, handles: *mut c_void, count: *mut usize) -> ReturnCode;

pub type TctiSetLocalityFn = unsafe extern "C" fn(context: *mut c_void, locality: u8) -> ReturnCode;

/// `TSS2_TCTI_INFO`, the module's version/info descriptor.
#[repr(C)]
pub struct TctiInfo {
    pub version: u32,
    pub name: *const c_char,
    pub description: *const c_char,
    pub config_help: *const c_char,
    pub init: Option<TctiInitFn>,
}

/// `TSS2_TCTI_CONTEXT_COMMON_V1`, the header every transport context starts with.
#[repr(C)]
pub struct TctiContextCommonV1 {
    pub magic: u64,
    pub version: u32,
    pub transmit: Option<TctiTransmitFn>,
    pub receive: Option<TctiReceiveFn>,
    pub finalize: Option<TctiFinalizeFn>,
    pub cancel: Option<TctiCancelFn>,
    pub get_poll_handles: Option<TctiGetPollHandlesFn>,
    pub set_locality: Option<TctiSetLocalityFn>,
}

/// `TSS2_ABI_VERSION`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbiVersion {
    pub tss_creator: u32,
    pub tss_family: u32,
    pub tss_level: u32,
    pub tss_version_major: u32,
    pub tss_version_minor: u32,
}

impl AbiVersion {
    /// `TSS2_ABI_VERSION_CURRENT`.
    pub const CURRENT: Self = Self {
        tss_creator: 1,
        tss_family: 2,
        tss_level: 1,
        tss_version_major: 0,
        tss_version_minor: 0,
    };
}

/// Finalize a transport context through the function table in its header.
///
/// Equivalent of `Tss2_Tcti_Finalize`: contexts with a version below 1 or
/// without a finalize entry are left untouched.
///
/// # Safety
///
/// `context` must point to a live, initialized transport context whose
/// module is still mapped.
pub unsafe fn finalize_raw(context: NonNull<c_void>) {
    let header = unsafe { &*context.as_ptr().cast::<TctiContextCommonV1>() };
    if header.version < 1 {
        tracing::warn!(version = header.version, "Transport context version too old to finalize");
        return;
    }
    match header.finalize {
        Some(finalize) => unsafe { finalize(context.as_ptr()) },
        None => tracing::warn!("Transport context has no finalize entry"),
    }
}

/// Conventional file name of a transport module, `lib<kind>-<name>.<suffix>`.
#[cfg(all(unix, not(target_os = "macos")))]
pub fn module_file_name(name: &str) -> String {
    format!("libtss2-tcti-{name}.so.0")
}

#[cfg(target_os = "macos")]
pub fn module_file_name(name: &str) -> String {
    format!("libtss2-tcti-{name}.0.dylib")
}

#[cfg(windows)]
pub fn module_file_name(name: &str) -> String {
    format!("tss2-tcti-{name}.dll")
}
