//! VMess Auth Daemon Library
//!
//! This crate provides the server-side user validator for the VMess
//! protocol: inbound connections authenticate with a 16-byte token derived
//! from a user id and the current second, resolved in O(1) against a
//! continuously refreshed token index.

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
