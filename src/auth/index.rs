//! The token index: registered users, per-key generation cursors and the
//! token map.
//!
//! Not internally synchronized. [`TimedUserValidator`](super::TimedUserValidator)
//! wraps it in a single reader/writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::{Credential, SecretKey, Timestamp, Token, User};

use super::hash::{HashAccumulator, IdHash};

/// Generation state for one secret key.
#[derive(Debug)]
struct IdEntry {
    key: SecretKey,
    user_index: usize,
    /// Next second to generate. Never moves backwards.
    next_sec: Timestamp,
}

/// What a token resolves to.
#[derive(Debug, Clone, Copy)]
struct TokenSlot {
    user_index: usize,
    secs_since_base: u32,
}

/// Snapshot of the index size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Registered users.
    pub users: usize,
    /// Secret keys (primary and alternate) across all users.
    pub entries: usize,
    /// Live tokens.
    pub tokens: usize,
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Tokens written by the generator.
    pub generated: usize,
    /// Tokens removed by the sweep.
    pub pruned: usize,
}

pub(crate) struct CredentialIndex<H> {
    users: Vec<Arc<User>>,
    entries: Vec<IdEntry>,
    tokens: HashMap<Token, TokenSlot>,
    hasher: H,
    base_time: Timestamp,
}

impl<H: IdHash> CredentialIndex<H> {
    pub(crate) fn new(hasher: H, base_time: Timestamp) -> Self {
        Self {
            users: Vec::with_capacity(16),
            entries: Vec::with_capacity(512),
            tokens: HashMap::with_capacity(512),
            hasher,
            base_time,
        }
    }

    pub(crate) fn base_time(&self) -> Timestamp {
        self.base_time
    }

    pub(crate) fn stats(&self) -> IndexStats {
        IndexStats {
            users: self.users.len(),
            entries: self.entries.len(),
            tokens: self.tokens.len(),
        }
    }

    /// Register a user and seed a window of tokens for each of its keys.
    ///
    /// Each key's cursor starts at `now - cache_duration` and is generated
    /// through `now + cache_duration`. Returns the user's index and the
    /// number of tokens generated.
    pub(crate) fn register(
        &mut self,
        user: Arc<User>,
        credential: &Credential,
        now: Timestamp,
        cache_duration: u64,
    ) -> (usize, usize) {
        let user_index = self.users.len();
        self.users.push(user);

        let start = now.saturating_sub_secs(cache_duration);
        let target = now.add_secs(cache_duration);
        let mut generated = 0;
        for key in credential.keys() {
            let mut entry = IdEntry {
                key: *key,
                user_index,
                next_sec: start,
            };
            generated += generate(
                &self.hasher,
                self.base_time,
                &mut self.tokens,
                &mut entry,
                target,
            );
            self.entries.push(entry);
        }

        (user_index, generated)
    }

    /// Extend every key's window through `now + cache_duration`, then drop
    /// tokens older than `now - 3 * cache_duration`.
    pub(crate) fn refresh(&mut self, now: Timestamp, cache_duration: u64) -> RefreshOutcome {
        let target = now.add_secs(cache_duration);
        let mut generated = 0;
        for entry in &mut self.entries {
            generated += generate(
                &self.hasher,
                self.base_time,
                &mut self.tokens,
                entry,
                target,
            );
        }

        let horizon = now.saturating_sub_secs(cache_duration.saturating_mul(3));
        let pruned = if horizon > self.base_time {
            self.remove_stale(offset_from(self.base_time, horizon))
        } else {
            0
        };

        RefreshOutcome { generated, pruned }
    }

    /// Delete every token whose second offset is below `expire_offset`.
    ///
    /// Returns the number of tokens removed.
    pub(crate) fn remove_stale(&mut self, expire_offset: u32) -> usize {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, slot| slot.secs_since_base >= expire_offset);
        before - self.tokens.len()
    }

    /// Look a token up. Whole-token match only.
    pub(crate) fn lookup(&self, token: &Token) -> Option<(&Arc<User>, Timestamp)> {
        let slot = self.tokens.get(token)?;
        Some((
            &self.users[slot.user_index],
            self.base_time.add_secs(u64::from(slot.secs_since_base)),
        ))
    }
}

/// Generate tokens for `entry` from its cursor through `target` inclusive.
///
/// Existing tokens are overwritten (last write wins). Seconds before
/// `base_time` cannot be encoded and are skipped. Returns the number of
/// tokens written.
fn generate<H: IdHash>(
    hasher: &H,
    base_time: Timestamp,
    tokens: &mut HashMap<Token, TokenSlot>,
    entry: &mut IdEntry,
    target: Timestamp,
) -> usize {
    if entry.next_sec < base_time {
        entry.next_sec = base_time;
    }
    if entry.next_sec > target {
        return 0;
    }

    let mut acc = hasher.keyed(entry.key.as_bytes());
    let mut generated = 0;
    for sec in entry.next_sec.as_secs()..=target.as_secs() {
        let sec = Timestamp(sec);
        acc.update(&sec.to_be_bytes());
        tokens.insert(
            acc.finalize_reset(),
            TokenSlot {
                user_index: entry.user_index,
                secs_since_base: offset_from(base_time, sec),
            },
        );
        generated += 1;
    }
    entry.next_sec = target.add_secs(1);

    generated
}

fn offset_from(base_time: Timestamp, sec: Timestamp) -> u32 {
    u32::try_from(sec.as_secs() - base_time.as_secs()).unwrap_or(u32::MAX)
}
