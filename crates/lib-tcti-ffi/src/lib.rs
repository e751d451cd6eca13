//! # lib-tcti-ffi
//!
//! Safe wrappers around dynamically loaded TPM transport modules (TCTIs).
//!
//! This crate is the only place in the workspace that crosses the foreign
//! call boundary. It handles:
//!
//! - Module discovery: literal path first, then the `libtss2-tcti-<name>`
//!   naming convention
//! - Resolution of the versioned `Tss2_Tcti_Info` entry point
//! - The two-phase "query size, allocate, initialize" protocol
//! - A single process-wide active transport handle
//! - The device session layered on top of a transport context
//!
//! # Safety
//!
//! Transport modules are native code. Every raw call is confined to
//! [`module`], [`negotiate`], [`abi`] and [`context`]; everything exported
//! from the crate root is safe to call.

pub mod abi;
pub mod context;
pub mod error;
pub mod loader;
pub mod module;
pub mod negotiate;
pub mod session;

#[cfg(any(test, feature = "stub"))]
pub mod stub;

pub use abi::{AbiVersion, ReturnCode, RC_SUCCESS};
pub use context::{ContextBuffer, TctiContext};
pub use error::{TctiError, TctiResult};
pub use loader::{TctiInfoSummary, TctiLoader, UnloadPolicy};
pub use module::{Module, ModuleOpener, NativeOpener};
pub use negotiate::{negotiate_and_init, InitPhase};
pub use session::{DeviceSession, DeviceStack, SysContextStack};
