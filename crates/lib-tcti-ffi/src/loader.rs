//! Dynamic loading of transport modules.
//!
//! This module finds a transport module by name, resolves its info entry
//! point and negotiates a transport context. At most one module is active
//! per loader; the process-wide loader returned by [`TctiLoader::global`]
//! therefore enforces a single active transport for the whole process.
//! Its [`UnloadPolicy`] is a runtime setting, so callers wanting modules
//! closed on unload switch the policy instead of creating a second loader.

use crate::abi::{self, TctiInfo, TctiInfoFn, INFO_SYMBOL};
use crate::context::TctiContext;
use crate::error::{TctiError, TctiResult};
use crate::module::{self, Module, ModuleOpener, NativeOpener};
use crate::negotiate::negotiate_and_init;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr};
use std::ptr::NonNull;
use std::sync::Arc;

/// Longest module file name accepted (`PATH_MAX`).
const MAX_MODULE_PATH: usize = 4096;

/// What happens to the module mapping on unload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnloadPolicy {
    /// Keep the module mapped for the rest of the process; only the cached
    /// info is dropped.
    #[default]
    Retain,
    /// Release the loader's reference so the module is closed once no
    /// transport context still uses it.
    Close,
}

/// Copy of a module's info descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TctiInfoSummary {
    pub version: u32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub config_help: Option<String>,
}

impl TctiInfoSummary {
    /// # Safety
    /// String fields must be null or valid NUL-terminated strings.
    unsafe fn read(info: &TctiInfo) -> Self {
        unsafe {
            Self {
                version: info.version,
                name: read_c_string(info.name),
                description: read_c_string(info.description),
                config_help: read_c_string(info.config_help),
            }
        }
    }
}

/// The currently active module.
struct ActiveModule {
    module: Arc<dyn Module>,
    summary: TctiInfoSummary,
}

#[derive(Default)]
struct LoaderSlot {
    policy: UnloadPolicy,
    active: Option<ActiveModule>,
    retained: Vec<Arc<dyn Module>>,
}

/// Loader with a single active transport module.
pub struct TctiLoader {
    opener: Arc<dyn ModuleOpener>,
    slot: Mutex<LoaderSlot>,
}

static GLOBAL_LOADER: Lazy<Arc<TctiLoader>> =
    Lazy::new(|| Arc::new(TctiLoader::new(Arc::new(NativeOpener), UnloadPolicy::Retain)));

impl TctiLoader {
    pub fn new(opener: Arc<dyn ModuleOpener>, policy: UnloadPolicy) -> Self {
        Self {
            opener,
            slot: Mutex::new(LoaderSlot {
                policy,
                ..LoaderSlot::default()
            }),
        }
    }

    /// Process-wide loader using the platform dynamic linker.
    pub fn global() -> Arc<TctiLoader> {
        GLOBAL_LOADER.clone()
    }

    pub fn policy(&self) -> UnloadPolicy {
        self.slot.lock().policy
    }

    /// Change what the next [`unload`](Self::unload) does with the module.
    ///
    /// Modules retained under an earlier policy stay mapped.
    pub fn set_policy(&self, policy: UnloadPolicy) {
        let mut slot = self.slot.lock();
        if slot.policy != policy {
            tracing::debug!(from = ?slot.policy, to = ?policy, "Transport unload policy changed");
            slot.policy = policy;
        }
    }

    /// Load a transport module and negotiate a context with it.
    ///
    /// `name` is tried as a literal path first, then substituted into the
    /// conventional module file name. On any failure the module is released
    /// again and no handle stays registered.
    pub fn load(&self, name: &str) -> TctiResult<TctiContext> {
        let mut slot = self.slot.lock();

        if let Some(active) = &slot.active {
            return Err(TctiError::AlreadyLoaded {
                path: active.module.path().to_string(),
            });
        }

        let module = self.open(name)?;
        let path = module.path().to_string();

        // SAFETY: TctiInfoFn is the documented type of the info symbol.
        let info_fn: TctiInfoFn = unsafe { module::resolve(&*module, INFO_SYMBOL) }
            .ok_or_else(|| {
                tracing::error!(symbol = INFO_SYMBOL, path = %path, "Symbol not found in transport module");
                TctiError::symbol_not_found(INFO_SYMBOL, &path)
            })?;

        // SAFETY: the info entry point takes no arguments and returns a
        // pointer to static data inside the module.
        let info = NonNull::new(unsafe { info_fn() }.cast_mut())
            .ok_or_else(|| TctiError::invalid_info(&path, "info entry point returned null"))?;

        // SAFETY: non-null and owned by the still-mapped module.
        let info_ref = unsafe { info.as_ref() };
        let init = info_ref
            .init
            .ok_or_else(|| TctiError::invalid_info(&path, "no init function"))?;
        let summary = unsafe { TctiInfoSummary::read(info_ref) };

        let buffer = negotiate_and_init(init).map_err(|e| {
            tracing::error!(path = %path, error = %e, "Transport init negotiation failed");
            e
        })?;

        tracing::info!(
            path = %path,
            version = summary.version,
            name = summary.name.as_deref().unwrap_or(""),
            context_size = buffer.len(),
            "Loaded transport module"
        );

        slot.active = Some(ActiveModule {
            module: module.clone(),
            summary,
        });

        Ok(TctiContext::new(buffer, module))
    }

    /// Drop the active module's cached state.
    ///
    /// Under [`UnloadPolicy::Retain`] the module stays mapped; the next
    /// [`load`](Self::load) still re-resolves every symbol.
    pub fn unload(&self) {
        let mut slot = self.slot.lock();
        let Some(active) = slot.active.take() else {
            return;
        };

        let path = active.module.path().to_string();
        let policy = slot.policy;
        match policy {
            UnloadPolicy::Retain => {
                if !slot.retained.iter().any(|m| m.path() == path) {
                    slot.retained.push(active.module);
                }
            }
            UnloadPolicy::Close => drop(active.module),
        }

        tracing::info!(path = %path, policy = ?policy, "Unloaded transport module");
    }

    /// Whether a module is currently active.
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().active.is_some()
    }

    /// Info descriptor of the active module.
    pub fn info(&self) -> Option<TctiInfoSummary> {
        self.slot.lock().active.as_ref().map(|a| a.summary.clone())
    }

    /// Check whether the conventional module file for `name` can be opened.
    ///
    /// The module is closed again right away; the active handle is untouched.
    pub fn is_present(&self, name: &str) -> bool {
        match module_path_for(name) {
            Ok(file) => self.opener.open(&file).is_ok(),
            Err(_) => false,
        }
    }

    fn open(&self, name: &str) -> TctiResult<Arc<dyn Module>> {
        let first = match self.opener.open(name) {
            Ok(module) => return Ok(module),
            Err(e) => e,
        };
        tracing::debug!(name = %name, error = %first, "Literal module path failed, trying file name convention");

        let file = module_path_for(name).map_err(|e| {
            tracing::error!(name = %name, error = %e, "No conventional module file name for transport");
            TctiError::NotFound {
                name: name.to_string(),
                tried: vec![name.to_string()],
                reason: format!("{first}; {e}"),
            }
        })?;
        self.opener.open(&file).map_err(|reason| {
            tracing::error!(name = %name, file = %file, "Could not open transport module");
            TctiError::NotFound {
                name: name.to_string(),
                tried: vec![name.to_string(), file.clone()],
                reason,
            }
        })
    }
}

fn module_path_for(name: &str) -> TctiResult<String> {
    let file = abi::module_file_name(name);
    if file.len() >= MAX_MODULE_PATH {
        return Err(TctiError::InvalidName {
            name: name.to_string(),
            reason: format!("module file name exceeds {MAX_MODULE_PATH} bytes"),
        });
    }
    if file.contains('\0') {
        return Err(TctiError::InvalidName {
            name: name.to_string(),
            reason: "contains a NUL byte".to_string(),
        });
    }
    Ok(file)
}

/// Read a C string, returning None if null or invalid UTF-8.
///
/// # Safety
/// The pointer must be null or point to a valid null-terminated C string.
unsafe fn read_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: Caller guarantees ptr is valid if not null
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(String::from) }
}
