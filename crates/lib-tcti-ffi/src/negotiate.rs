//! Two-phase context size negotiation.
//!
//! Transport modules size their own contexts. The caller first asks for the
//! size with a null context, allocates exactly that many bytes, then calls
//! the same routine again to initialize the buffer:
//!
//! ```c
//! init(NULL, &size, NULL);      /* size query */
//! ctx = calloc(1, size);
//! init(ctx, &size, NULL);       /* initialize */
//! ```

use crate::abi::{TctiInitFn, RC_SUCCESS};
use crate::context::ContextBuffer;
use crate::error::{TctiError, TctiResult};
use serde::Serialize;
use std::fmt;
use std::ptr;

/// Phase of the negotiation a failure happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    /// First call, null context.
    SizeQuery,
    /// Second call, allocated context.
    Initialize,
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeQuery => f.write_str("size query"),
            Self::Initialize => f.write_str("initialization"),
        }
    }
}

/// Run both phases and return the initialized context buffer.
///
/// Nothing is allocated when the size query fails or reports zero, and the
/// second call is never made when allocation fails. A failing second call
/// frees the buffer before returning.
pub fn negotiate_and_init(init: TctiInitFn) -> TctiResult<ContextBuffer> {
    let mut size: usize = 0;

    // SAFETY: a null context with a valid size pointer is the documented
    // size query form of the init routine.
    let rc = unsafe { init(ptr::null_mut(), &mut size, ptr::null()) };
    if rc != RC_SUCCESS {
        return Err(TctiError::protocol(InitPhase::SizeQuery, rc));
    }
    if size == 0 {
        return Err(TctiError::ProtocolInitFailure {
            phase: InitPhase::SizeQuery,
            code: None,
        });
    }

    tracing::debug!(size, "Transport reported context size");

    let buffer = ContextBuffer::zeroed(size)?;

    // SAFETY: buffer holds exactly `size` zeroed bytes as requested.
    let rc = unsafe { init(buffer.as_ptr(), &mut size, ptr::null()) };
    if rc != RC_SUCCESS {
        return Err(TctiError::protocol(InitPhase::Initialize, rc));
    }

    Ok(buffer)
}
