//! VMess identity types.
//!
//! Users, their accounts and secret keys, and the token a client derives
//! from a key and the current second:
//! ```text
//! token = HMAC-MD5(key = id bytes, msg = seconds since epoch as big-endian u64)
//! ```

mod id;
mod user;

pub use id::{derive_alternates, SecretKey, Timestamp, Token, TOKEN_LEN};
pub use user::{Account, Credential, User, VmessAccount};
