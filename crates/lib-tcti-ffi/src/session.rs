//! Device sessions layered on a transport context.
//!
//! The session layer owns its own context, sized and initialized against a
//! transport context. It can replace the transport underneath a session, so
//! teardown always asks the layer which transport context is current instead
//! of trusting the one handed in at open time.

use crate::abi::{
    self, AbiVersion, ReturnCode, BASE_RC_ABI_MISMATCH, BASE_RC_BAD_CONTEXT,
    BASE_RC_BAD_REFERENCE, BASE_RC_BAD_SIZE, SYS_RC_LAYER,
};
use crate::context::{ContextBuffer, TctiContext};
use crate::error::{TctiError, TctiResult};
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::ptr::{self, NonNull};

/// Session layer API (`Tss2_Sys_*`).
pub trait DeviceStack: Send + Sync {
    /// Bytes required for a session context.
    fn context_size(&self) -> usize;

    /// Initialize `sys` on top of the transport context `tcti`.
    fn initialize(
        &self,
        sys: &mut ContextBuffer,
        tcti: NonNull<c_void>,
        abi: AbiVersion,
    ) -> Result<(), ReturnCode>;

    /// Transport context currently attached to `sys`.
    fn transport_context(&self, sys: &ContextBuffer) -> Option<NonNull<c_void>>;

    /// Release everything the layer keeps in `sys`.
    fn finalize(&self, sys: &mut ContextBuffer);

    /// Finalize a transport context (`Tss2_Tcti_Finalize`).
    fn finalize_transport(&self, tcti: NonNull<c_void>) {
        // SAFETY: only called with contexts obtained from `transport_context`,
        // which stay valid until finalized.
        unsafe { abi::finalize_raw(tcti) }
    }
}

/// An open device session and the transport context it was opened on.
pub struct DeviceSession {
    sys: ContextBuffer,
    transport: TctiContext,
}

impl DeviceSession {
    /// Open a session on `transport`.
    ///
    /// On failure the transport context is finalized and freed along with
    /// any partially initialized session context.
    pub fn open(stack: &dyn DeviceStack, transport: TctiContext) -> TctiResult<Self> {
        let size = stack.context_size();
        let mut sys = match ContextBuffer::zeroed(size) {
            Ok(sys) => sys,
            Err(e) => {
                transport.finalize();
                return Err(e);
            }
        };

        if let Err(code) = stack.initialize(&mut sys, transport.as_ptr(), AbiVersion::CURRENT) {
            tracing::error!(code = format_args!("{code:#x}"), "Session layer initialization failed");
            transport.finalize();
            return Err(TctiError::DeviceInitFailure { code });
        }

        tracing::info!(
            module = %transport.module_path(),
            sys_size = size,
            "Opened device session"
        );

        Ok(Self { sys, transport })
    }

    /// Transport context the session was opened on.
    pub fn cached_transport(&self) -> NonNull<c_void> {
        self.transport.as_ptr()
    }

    /// Close the session.
    ///
    /// The transport context is re-queried from the session layer and that
    /// context is finalized. The cached transport buffer is freed in every
    /// case; when it no longer matches the queried one it is freed without
    /// being finalized.
    pub fn close(self, stack: &dyn DeviceStack) {
        let Self { mut sys, transport } = self;

        let current = stack.transport_context(&sys);
        stack.finalize(&mut sys);
        drop(sys);

        match current {
            Some(current) => {
                if current != transport.as_ptr() {
                    tracing::warn!(
                        cached = ?transport.as_ptr(),
                        current = ?current,
                        "Transport context changed since the session was opened"
                    );
                }
                stack.finalize_transport(current);
            }
            None => tracing::warn!("Session layer reported no transport context"),
        }

        drop(transport);
        tracing::info!("Closed device session");
    }
}

#[repr(C)]
struct SysHeader {
    magic: u64,
    abi: AbiVersion,
    tcti: *mut c_void,
}

const SYS_MAGIC: u64 = 0x5359_5343_5458_0001;

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("sys", &self.sys)
            .field("transport", &self.transport)
            .finish()
    }
}

/// Session layer implemented in Rust: records the transport context and ABI
/// version in a small header at the start of the session context.
#[derive(Clone, Copy, Debug, Default)]
pub struct SysContextStack;

impl SysContextStack {
    fn header(sys: &ContextBuffer) -> Option<&SysHeader> {
        if sys.len() < size_of::<SysHeader>() {
            return None;
        }
        // SAFETY: large enough, 16-byte aligned, zero-initialized at allocation.
        let header = unsafe { &*sys.as_ptr().cast::<SysHeader>() };
        (header.magic == SYS_MAGIC).then_some(header)
    }
}

impl DeviceStack for SysContextStack {
    fn context_size(&self) -> usize {
        size_of::<SysHeader>()
    }

    fn initialize(
        &self,
        sys: &mut ContextBuffer,
        tcti: NonNull<c_void>,
        abi: AbiVersion,
    ) -> Result<(), ReturnCode> {
        if sys.len() < size_of::<SysHeader>() {
            return Err(SYS_RC_LAYER | BASE_RC_BAD_SIZE);
        }
        if abi != AbiVersion::CURRENT {
            return Err(SYS_RC_LAYER | BASE_RC_ABI_MISMATCH);
        }
        // SAFETY: caller guarantees `tcti` is an initialized transport context,
        // which is at least as large as its common header version field.
        let version = unsafe { (*tcti.as_ptr().cast::<abi::TctiContextCommonV1>()).version };
        if version < 1 {
            return Err(SYS_RC_LAYER | BASE_RC_BAD_CONTEXT);
        }

        // SAFETY: size checked above, buffer aligned to 16.
        unsafe {
            sys.as_ptr().cast::<SysHeader>().write(SysHeader {
                magic: SYS_MAGIC,
                abi,
                tcti: tcti.as_ptr(),
            });
        }
        Ok(())
    }

    fn transport_context(&self, sys: &ContextBuffer) -> Option<NonNull<c_void>> {
        Self::header(sys).and_then(|h| NonNull::new(h.tcti))
    }

    fn finalize(&self, sys: &mut ContextBuffer) {
        if Self::header(sys).is_none() {
            tracing::warn!(
                code = SYS_RC_LAYER | BASE_RC_BAD_REFERENCE,
                "Finalize on an uninitialized session context"
            );
            return;
        }
        // SAFETY: header present, see `header`.
        unsafe {
            ptr::write_bytes(sys.as_ptr().cast::<u8>(), 0, size_of::<SysHeader>());
        }
    }
}
