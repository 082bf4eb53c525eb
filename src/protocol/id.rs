//! Identity keys, timestamps and tokens.

use std::fmt;

use md5::{Digest, Md5};
use uuid::Uuid;

/// Length of an authentication token in bytes.
pub const TOKEN_LEN: usize = 16;

/// A 16-byte keyed-hash digest authenticating one key for one second.
pub type Token = [u8; TOKEN_LEN];

/// Salt appended to an id when deriving the next alternate id.
const ALTERNATE_SALT: &[u8] = b"16167dc8-16b6-4e6d-b8bb-65dd68113a81";

/// Salt appended when a derived id collides with its predecessor.
const COLLISION_SALT: &[u8] = b"533eff8a-4113-4b10-b5ce-0f5d76b98cd2";

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from seconds since the Unix epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Fixed-width big-endian encoding fed to the keyed hash.
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub const fn add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub const fn saturating_sub_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 16-byte secret key (the raw bytes of a user id).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretKey([u8; 16]);

impl SecretKey {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Derive the alternate id that follows this one.
    ///
    /// MD5 over the id bytes and a fixed salt. If the digest happens to equal
    /// the id itself, a second salt is appended until it differs.
    pub fn next_alternate(&self) -> SecretKey {
        let mut hasher = Md5::new();
        hasher.update(self.0);
        hasher.update(ALTERNATE_SALT);
        loop {
            let digest = hasher.clone().finalize();
            let mut next = [0u8; 16];
            next.copy_from_slice(&digest);
            if next != self.0 {
                return SecretKey(next);
            }
            hasher.update(COLLISION_SALT);
        }
    }
}

impl From<Uuid> for SecretKey {
    fn from(id: Uuid) -> Self {
        Self(*id.as_bytes())
    }
}

impl fmt::Debug for SecretKey {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Derive `count` alternate ids, each chained from the previous one.
pub fn derive_alternates(primary: &SecretKey, count: u16) -> Vec<SecretKey> {
    let mut alternates = Vec::with_capacity(count as usize);
    let mut prev = *primary;
    for _ in 0..count {
        let next = prev.next_alternate();
        alternates.push(next);
        prev = next;
    }
    alternates
}
