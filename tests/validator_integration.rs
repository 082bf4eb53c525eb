//! Integration tests for the time-windowed user validator.
//!
//! These drive the public API with a manual clock and, where identities must
//! never collide, a transparent stub hash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vmess_authd::auth::{
    token_for, Clock, HashAccumulator, HmacMd5, IdHash, ManualClock, SystemClock,
    TimedUserValidator,
};
use vmess_authd::config::ValidatorConfig;
use vmess_authd::error::{AuthErrorKind, DaemonError};
use vmess_authd::protocol::{Account, SecretKey, Timestamp, Token, User, VmessAccount};

const T0: Timestamp = Timestamp(1_700_000_000);
const CACHE: u64 = 120;

/// Token = first 8 key bytes followed by the 8 message bytes.
///
/// Collision-free as long as keys differ in their first 8 bytes.
#[derive(Debug, Clone, Copy)]
struct StubHash;

struct StubAccumulator {
    prefix: [u8; 8],
    message: Vec<u8>,
}

impl IdHash for StubHash {
    type Accumulator = StubAccumulator;

    fn keyed(&self, key: &[u8]) -> Self::Accumulator {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&key[..8]);
        StubAccumulator {
            prefix,
            message: Vec::new(),
        }
    }
}

impl HashAccumulator for StubAccumulator {
    fn update(&mut self, data: &[u8]) {
        self.message.extend_from_slice(data);
    }

    fn finalize_reset(&mut self) -> Token {
        let mut token = [0u8; 16];
        token[..8].copy_from_slice(&self.prefix);
        token[8..].copy_from_slice(&self.message[self.message.len() - 8..]);
        self.message.clear();
        token
    }

    fn reset(&mut self) {
        self.message.clear();
    }
}

fn config() -> ValidatorConfig {
    ValidatorConfig {
        cache_duration_seconds: CACHE,
        update_interval_seconds: 10,
        ..ValidatorConfig::default()
    }
}

/// Validator whose base time is `T0` (constructed at `T0 + 3 * CACHE`).
fn stub_validator() -> (TimedUserValidator<StubHash>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0.add_secs(3 * CACHE)));
    let validator = TimedUserValidator::with_clock(StubHash, clock.clone(), &config()).unwrap();
    (validator, clock)
}

fn lookup(
    validator: &TimedUserValidator<StubHash>,
    key: &SecretKey,
    sec: Timestamp,
) -> Option<(Arc<User>, Timestamp)> {
    validator.get(&token_for(&StubHash, key, sec))
}

#[test]
fn test_scenario_window_after_add() {
    let (validator, clock) = stub_validator();
    assert_eq!(validator.base_time(), T0);

    let id = Uuid::new_v4();
    let key = SecretKey::from(id);
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    // Seeded window is [T0+240, T0+480].
    for offset in [240, 300, 360, 480] {
        let (user, ts) = lookup(&validator, &key, T0.add_secs(offset)).unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(ts, T0.add_secs(offset));
    }
    assert!(lookup(&validator, &key, T0.add_secs(239)).is_none());
    assert!(lookup(&validator, &key, T0.add_secs(481)).is_none());

    // T0+600 only appears once a refresh runs at T0+480 or later.
    assert!(lookup(&validator, &key, T0.add_secs(600)).is_none());
    clock.set(T0.add_secs(470));
    validator.refresh();
    assert!(lookup(&validator, &key, T0.add_secs(600)).is_none());
    clock.set(T0.add_secs(480));
    validator.refresh();
    assert_eq!(
        lookup(&validator, &key, T0.add_secs(600)).unwrap().1,
        T0.add_secs(600)
    );
}

#[test]
fn test_forward_lookahead_after_refresh() {
    let (validator, clock) = stub_validator();
    let id = Uuid::new_v4();
    let key = SecretKey::from(id);
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    let t = T0.add_secs(1000);
    clock.set(t);
    let outcome = validator.refresh();
    assert!(outcome.generated > 0);

    assert!(lookup(&validator, &key, t.add_secs(CACHE)).is_some());
    assert!(lookup(&validator, &key, t.add_secs(CACHE + 1)).is_none());
}

#[test]
fn test_sliding_window_expires_old_tokens() {
    let (validator, clock) = stub_validator();
    let id = Uuid::new_v4();
    let key = SecretKey::from(id);
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    let first = T0.add_secs(240);
    // Step the clock like the refresher would, up to exactly 3 windows past.
    let mut now = T0.add_secs(3 * CACHE);
    while now < first.add_secs(3 * CACHE) {
        now = now.add_secs(10);
        clock.set(now);
        validator.refresh();
    }
    assert!(lookup(&validator, &key, first).is_some());

    clock.set(first.add_secs(3 * CACHE + 10));
    let outcome = validator.refresh();
    assert!(outcome.pruned > 0);
    assert!(lookup(&validator, &key, first).is_none());

    // Memory stays bounded: four windows of tokens at most.
    assert!(validator.stats().tokens <= (4 * CACHE + 1) as usize);
}

#[test]
fn test_regeneration_keeps_timestamps() {
    let (validator, clock) = stub_validator();
    let id = Uuid::new_v4();
    let key = SecretKey::from(id);
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    let sec = T0.add_secs(400);
    let before = lookup(&validator, &key, sec).unwrap().1;
    for step in 0..5 {
        clock.set(T0.add_secs(3 * CACHE + step * 10));
        validator.refresh();
    }
    // Time going backwards does not regenerate or move anything.
    clock.set(T0);
    assert_eq!(validator.refresh().generated, 0);
    assert_eq!(lookup(&validator, &key, sec).unwrap().1, before);
}

#[test]
fn test_cross_identity_isolation() {
    let (validator, clock) = stub_validator();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    validator.add(User::vmess("alice@example.com", alice, 0)).unwrap();
    validator.add(User::vmess("bob@example.com", bob, 0)).unwrap();
    clock.advance(30);
    validator.refresh();

    for offset in 240..=510 {
        let sec = T0.add_secs(offset);
        let (user, _) = lookup(&validator, &SecretKey::from(alice), sec).unwrap();
        assert_eq!(user.email, "alice@example.com");
        let (user, _) = lookup(&validator, &SecretKey::from(bob), sec).unwrap();
        assert_eq!(user.email, "bob@example.com");
    }
}

#[test]
fn test_alternate_ids_resolve_to_owner() {
    let clock = Arc::new(ManualClock::new(T0.add_secs(3 * CACHE)));
    let validator = TimedUserValidator::with_clock(HmacMd5, clock.clone(), &config()).unwrap();
    let id = Uuid::new_v4();
    let user = User::vmess("a@example.com", id, 4);
    let credential = user.credential().unwrap();
    validator.add(user).unwrap();

    let stats = validator.stats();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.entries, 5);

    let now = clock.now();
    for key in credential.keys() {
        let (user, ts) = validator.get(&token_for(&HmacMd5, key, now)).unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(ts, now);
    }
}

#[test]
fn test_known_client_token() {
    // HMAC-MD5 keyed with the raw id bytes over the big-endian second.
    let clock = Arc::new(ManualClock::new(T0));
    let validator = TimedUserValidator::with_clock(HmacMd5, clock, &config()).unwrap();
    let id = Uuid::parse_str("b831381d-6324-4d53-ad4f-8cda48b30811").unwrap();
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    let mut token = [0u8; 16];
    hex::decode_to_slice("cb4c98431253a6f41d16adc57e6d3550", &mut token).unwrap();
    let (user, ts) = validator.get(&token).unwrap();
    assert_eq!(user.email, "a@example.com");
    assert_eq!(ts, T0);

    // One flipped bit is a plain miss.
    token[15] ^= 1;
    assert!(validator.get(&token).is_none());
}

#[test]
fn test_failed_add_commits_nothing() {
    let (validator, _) = stub_validator();
    validator
        .add(User::vmess("a@example.com", Uuid::new_v4(), 0))
        .unwrap();
    let before = validator.stats();

    let id = Uuid::new_v4();
    let malformed = VmessAccount::with_alternates(id, vec![SecretKey::from(Uuid::new_v4()); 2]);
    let result = validator.add(User::new("bad@example.com", Account::Vmess(malformed)));
    assert!(matches!(
        result,
        Err(DaemonError::Auth {
            kind: AuthErrorKind::AccountType { .. }
        })
    ));
    assert_eq!(validator.stats(), before);
    assert!(lookup(&validator, &SecretKey::from(id), T0.add_secs(3 * CACHE)).is_none());
}

#[test]
fn test_concurrent_readers_never_see_partial_batch() {
    let (validator, _) = stub_validator();
    let validator = Arc::new(validator);
    let ids: Vec<Uuid> = (0..50).map(|_| Uuid::new_v4()).collect();
    let done = Arc::new(AtomicBool::new(false));

    let first = T0.add_secs(2 * CACHE);
    let last = T0.add_secs(4 * CACHE);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let ids = ids.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    for id in &ids {
                        let key = SecretKey::from(*id);
                        // Tokens are never removed here, so once the first
                        // second of a batch is visible the last must be too.
                        if lookup(&validator, &key, first).is_some() {
                            assert!(lookup(&validator, &key, last).is_some());
                        }
                    }
                }
            })
        })
        .collect();

    for id in &ids {
        validator.add(User::vmess("user@example.com", *id, 2)).unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(validator.stats().users, ids.len());
}

#[test]
fn test_concurrent_readers_never_see_partial_refresh() {
    let (validator, clock) = stub_validator();
    let validator = Arc::new(validator);
    let ids: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        validator.add(User::vmess("user@example.com", *id, 1)).unwrap();
    }
    let done = Arc::new(AtomicBool::new(false));

    // Each refresh at `now` generates the batch (previous end, now + CACHE].
    // The sweep drops older seconds first, so a visible first second of a
    // batch implies a visible last second.
    const STEP: u64 = 10;
    const CYCLES: u64 = 200;
    let start = T0.add_secs(3 * CACHE);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let ids = ids.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    for cycle in 1..=CYCLES {
                        let last = start.add_secs(cycle * STEP + CACHE);
                        let first = last.saturating_sub_secs(STEP - 1);
                        for id in &ids {
                            let key = SecretKey::from(*id);
                            if lookup(&validator, &key, first).is_some() {
                                assert!(lookup(&validator, &key, last).is_some());
                            }
                        }
                    }
                }
            })
        })
        .collect();

    let writer = {
        let validator = Arc::clone(&validator);
        let clock = Arc::clone(&clock);
        thread::spawn(move || {
            for _ in 0..CYCLES {
                clock.advance(STEP);
                let outcome = validator.refresh();
                assert_eq!(outcome.generated, ids.len() * 2 * STEP as usize);
            }
        })
    };

    writer.join().unwrap();
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(clock.now(), start.add_secs(CYCLES * STEP));
}

#[tokio::test]
async fn test_construct_with_system_clock() {
    let cancel = CancellationToken::new();
    let validator = TimedUserValidator::new(cancel.clone(), HmacMd5, &config()).unwrap();
    let id = Uuid::new_v4();
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    let now = SystemClock.now();
    let (user, ts) = validator
        .get(&token_for(&HmacMd5, &SecretKey::from(id), now))
        .unwrap();
    assert_eq!(user.email, "a@example.com");
    assert_eq!(ts, now);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_refresher_follows_cadence_until_cancelled() {
    let (validator, clock) = stub_validator();
    let validator = Arc::new(validator);
    let id = Uuid::new_v4();
    let key = SecretKey::from(id);
    validator.add(User::vmess("a@example.com", id, 0)).unwrap();

    let cancel = CancellationToken::new();
    let handle = validator.start_refresh_task(cancel.clone());

    // No cycle before the first interval elapses.
    clock.advance(100);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(lookup(&validator, &key, T0.add_secs(560)).is_none());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(lookup(&validator, &key, T0.add_secs(580)).is_some());

    cancel.cancel();
    handle.await.unwrap();

    // Stopped: further time passing changes nothing.
    clock.advance(100);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(lookup(&validator, &key, T0.add_secs(680)).is_none());
}
