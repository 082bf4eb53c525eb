//! Error types for the VMess auth daemon.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
