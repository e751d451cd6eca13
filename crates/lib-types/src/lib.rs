//! # lib-types
//!
//! Core type definitions shared by the crypto provider workspace.
//!
//! - Algorithm discriminators, one closed enumeration per category
//! - Provider lifecycle states and initialization steps

pub mod algorithms;
pub mod lifecycle;

pub use algorithms::*;
pub use lifecycle::*;
