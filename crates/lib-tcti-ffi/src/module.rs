//! Shared module opening and symbol lookup.
//!
//! [`Module`] and [`ModuleOpener`] are the seam between the loader and the
//! dynamic linker. The native implementation goes through `libloading`;
//! tests substitute fake modules built from Rust `extern "C"` functions.

use libloading::Library;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;

/// A mapped shared module.
pub trait Module: Send + Sync {
    /// Path the module was opened from.
    fn path(&self) -> &str;

    /// Address of an exported symbol, if present.
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Opens shared modules by path or file name.
pub trait ModuleOpener: Send + Sync {
    /// Open a module. The error is the linker's description of the failure.
    fn open(&self, path: &str) -> Result<Arc<dyn Module>, String>;
}

/// Resolve an exported symbol as a typed value.
///
/// Returns `None` if the symbol is missing or `T` is not pointer-sized.
///
/// # Safety
///
/// `T` must be the actual type of the exported item (typically an
/// `unsafe extern "C" fn` pointer) and the returned value must not outlive
/// the module.
pub unsafe fn resolve<T: Copy>(module: &dyn Module, name: &str) -> Option<T> {
    if size_of::<T>() != size_of::<*mut c_void>() {
        return None;
    }
    let address = module.symbol(name)?.as_ptr();
    Some(unsafe { std::mem::transmute_copy::<*mut c_void, T>(&address) })
}

/// Module opened through the platform dynamic linker.
pub struct NativeModule {
    /// Keeps the module mapped.
    library: Library,

    /// Path the module was opened from.
    path: String,
}

impl Module for NativeModule {
    fn path(&self) -> &str {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        let mut symbol = Vec::with_capacity(name.len() + 1);
        symbol.extend_from_slice(name.as_bytes());
        symbol.push(0);

        let address = unsafe { self.library.get::<*mut c_void>(&symbol) }.ok()?;
        NonNull::new(*address)
    }
}

/// Opener backed by `dlopen`/`LoadLibrary`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeOpener;

impl ModuleOpener for NativeOpener {
    fn open(&self, path: &str) -> Result<Arc<dyn Module>, String> {
        // Running a module's constructors is the unavoidable cost of loading it.
        let library = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;

        tracing::debug!(path = %path, "Opened shared module");

        Ok(Arc::new(NativeModule {
            library,
            path: path.to_string(),
        }))
    }
}
