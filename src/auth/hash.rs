//! Keyed-hash strategies used to derive per-second tokens.

use hmac::{Hmac, Mac};
use md5::Md5;
use ring::hmac as ring_hmac;
use serde::Deserialize;

use crate::protocol::{SecretKey, Timestamp, Token, TOKEN_LEN};

/// A keyed hash in progress.
pub trait HashAccumulator: Send {
    /// Append bytes to the message.
    fn update(&mut self, data: &[u8]);

    /// Produce the first 16 bytes of the digest and reset to the freshly
    /// keyed state.
    fn finalize_reset(&mut self) -> Token;

    /// Discard any appended bytes.
    fn reset(&mut self);
}

/// A keyed-hash constructor: yields a fresh accumulator for a secret key.
pub trait IdHash: Send + Sync + 'static {
    type Accumulator: HashAccumulator;

    fn keyed(&self, key: &[u8]) -> Self::Accumulator;
}

/// Compute the token for `key` at `second`, exactly as the index does.
pub fn token_for<H: IdHash>(hasher: &H, key: &SecretKey, second: Timestamp) -> Token {
    let mut acc = hasher.keyed(key.as_bytes());
    acc.update(&second.to_be_bytes());
    acc.finalize_reset()
}

fn truncate(digest: &[u8]) -> Token {
    let mut token = [0u8; TOKEN_LEN];
    token.copy_from_slice(&digest[..TOKEN_LEN]);
    token
}

/// HMAC-MD5, the hash VMess clients use.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacMd5;

pub struct HmacMd5Accumulator {
    mac: Hmac<Md5>,
}

impl IdHash for HmacMd5 {
    type Accumulator = HmacMd5Accumulator;

    fn keyed(&self, key: &[u8]) -> Self::Accumulator {
        let mac = <Hmac<Md5> as Mac>::new_from_slice(key)
            .expect("HMAC accepts keys of any length");
        HmacMd5Accumulator { mac }
    }
}

impl HashAccumulator for HmacMd5Accumulator {
    fn update(&mut self, data: &[u8]) {
        Mac::update(&mut self.mac, data);
    }

    fn finalize_reset(&mut self) -> Token {
        truncate(&self.mac.finalize_reset().into_bytes())
    }

    fn reset(&mut self) {
        Mac::reset(&mut self.mac);
    }
}

/// HMAC-SHA256 truncated to 16 bytes.
///
/// Not understood by stock VMess clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256;

pub struct HmacSha256Accumulator {
    key: ring_hmac::Key,
    ctx: ring_hmac::Context,
}

impl IdHash for HmacSha256 {
    type Accumulator = HmacSha256Accumulator;

    fn keyed(&self, key: &[u8]) -> Self::Accumulator {
        let key = ring_hmac::Key::new(ring_hmac::HMAC_SHA256, key);
        let ctx = ring_hmac::Context::with_key(&key);
        HmacSha256Accumulator { key, ctx }
    }
}

impl HashAccumulator for HmacSha256Accumulator {
    fn update(&mut self, data: &[u8]) {
        self.ctx.update(data);
    }

    fn finalize_reset(&mut self) -> Token {
        let ctx = std::mem::replace(&mut self.ctx, ring_hmac::Context::with_key(&self.key));
        truncate(ctx.sign().as_ref())
    }

    fn reset(&mut self) {
        self.ctx = ring_hmac::Context::with_key(&self.key);
    }
}

/// Hash strategy selected at runtime (from configuration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashKind {
    #[default]
    HmacMd5,
    HmacSha256,
}

impl std::str::FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hmac-md5" => Ok(HashKind::HmacMd5),
            "hmac-sha256" => Ok(HashKind::HmacSha256),
            other => Err(format!(
                "Unknown hash '{}'. Valid hashes: [\"hmac-md5\", \"hmac-sha256\"]",
                other
            )),
        }
    }
}

pub enum AnyAccumulator {
    Md5(HmacMd5Accumulator),
    Sha256(HmacSha256Accumulator),
}

impl IdHash for HashKind {
    type Accumulator = AnyAccumulator;

    fn keyed(&self, key: &[u8]) -> Self::Accumulator {
        match self {
            HashKind::HmacMd5 => AnyAccumulator::Md5(HmacMd5.keyed(key)),
            HashKind::HmacSha256 => AnyAccumulator::Sha256(HmacSha256.keyed(key)),
        }
    }
}

impl HashAccumulator for AnyAccumulator {
    fn update(&mut self, data: &[u8]) {
        match self {
            AnyAccumulator::Md5(acc) => acc.update(data),
            AnyAccumulator::Sha256(acc) => acc.update(data),
        }
    }

    fn finalize_reset(&mut self) -> Token {
        match self {
            AnyAccumulator::Md5(acc) => acc.finalize_reset(),
            AnyAccumulator::Sha256(acc) => acc.finalize_reset(),
        }
    }

    fn reset(&mut self) {
        match self {
            AnyAccumulator::Md5(acc) => acc.reset(),
            AnyAccumulator::Sha256(acc) => acc.reset(),
        }
    }
}
