//! Named advisory locks for Velo.
//!
//! A named lock is the primitive that makes at-most-one-builder-per-
//! fingerprint work: every rewrite that intends to build an artifact
//! first acquires the lock named by its fingerprint. Waiters poll a
//! non-blocking table with exponential backoff, honor a timeout and a
//! cancellation flag, and may steal a lock whose holder has had it for
//! too long (for example because the holding process crashed).

mod backoff;
mod manager;

pub use backoff::Backoff;
pub use manager::{InMemoryLockManager, LockManager, LockManagerStats, NamedLock};
