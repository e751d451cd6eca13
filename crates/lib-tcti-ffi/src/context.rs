//! Owned context buffers.

use crate::abi::{self, TctiContextCommonV1};
use crate::error::{TctiError, TctiResult};
use crate::module::Module;
use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;

/// Zero-initialized heap buffer of an exact size, handed to native code as an
/// opaque context. Freed on drop.
pub struct ContextBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer is plain memory owned by this value; native code only sees it
// while a caller holds the buffer.
unsafe impl Send for ContextBuffer {}

impl ContextBuffer {
    /// Alignment of every context buffer (matches `malloc`).
    pub const ALIGN: usize = 16;

    /// Allocate `size` zeroed bytes.
    pub fn zeroed(size: usize) -> TctiResult<Self> {
        if size == 0 {
            return Err(TctiError::AllocationFailure { size });
        }
        let layout = Layout::from_size_align(size, Self::ALIGN)
            .map_err(|_| TctiError::AllocationFailure { size })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(TctiError::AllocationFailure { size })?;

        Ok(Self { ptr, layout })
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false; zero-sized buffers are never allocated.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Pointer handed to native code.
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr().cast()
    }

    pub fn as_non_null(&self) -> NonNull<c_void> {
        self.ptr.cast()
    }
}

impl Drop for ContextBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for ContextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .finish()
    }
}

/// An initialized transport context.
///
/// Holds a reference to its module so the code behind the context's function
/// table stays mapped. Dropping the context frees its memory without
/// finalizing; call [`TctiContext::finalize`] to close the transport first.
pub struct TctiContext {
    buffer: ContextBuffer,
    module: Arc<dyn Module>,
}

impl TctiContext {
    pub(crate) fn new(buffer: ContextBuffer, module: Arc<dyn Module>) -> Self {
        Self { buffer, module }
    }

    pub fn as_ptr(&self) -> NonNull<c_void> {
        self.buffer.as_non_null()
    }

    /// Size negotiated with the module.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Path of the module that initialized this context.
    pub fn module_path(&self) -> &str {
        self.module.path()
    }

    /// Magic value from the common header, if the context is large enough to hold one.
    pub fn magic(&self) -> Option<u64> {
        self.header().map(|h| h.magic)
    }

    /// Header version, if the context is large enough to hold one.
    pub fn version(&self) -> Option<u32> {
        self.header().map(|h| h.version)
    }

    fn header(&self) -> Option<&TctiContextCommonV1> {
        if self.buffer.len() < size_of::<TctiContextCommonV1>() {
            return None;
        }
        // SAFETY: buffer is large enough, aligned to 16 and initialized
        // (zeroed, then written by the module's init routine).
        Some(unsafe { &*self.buffer.as_ptr().cast::<TctiContextCommonV1>() })
    }

    /// Finalize through the context's own function table, then free it.
    pub fn finalize(self) {
        if self.header().is_none() {
            tracing::warn!(
                module = %self.module_path(),
                size = self.size(),
                "Transport context too small for a common header, freeing without finalize"
            );
            return;
        }
        tracing::debug!(module = %self.module_path(), "Finalizing transport context");
        // SAFETY: context was initialized by `self.module`, which is still mapped.
        unsafe { abi::finalize_raw(self.as_ptr()) }
    }
}

impl fmt::Debug for TctiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TctiContext")
            .field("module", &self.module_path())
            .field("buffer", &self.buffer)
            .finish()
    }
}
