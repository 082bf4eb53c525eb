//! Authentication module.
//!
//! Maintains a self-refreshing index of per-second keyed-hash tokens for
//! every registered user key, and resolves inbound tokens back to users.

mod clock;
mod hash;
mod index;
mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::{
    token_for, AnyAccumulator, HashAccumulator, HashKind, HmacMd5, HmacMd5Accumulator,
    HmacSha256, HmacSha256Accumulator, IdHash,
};
pub use index::{IndexStats, RefreshOutcome};
pub use validator::TimedUserValidator;
