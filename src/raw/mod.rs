//! Raw synchronization primitives. Each type here is a single *shard*: a mutex
//! protecting the per-key bookkeeping plus the condition variables its waiters
//! sleep on.
//!
//!  - [`RawKeyRwLock`] provides a non-blocking (fallible) interface,
//!    similar to `std::sync::RwLock::try_write`.
//!
//!  - [`RawBlockingKeyRwLock`] provides a blocking interface, similar to
//!    `std::sync::RwLock::write`, plus deadline-bounded variants.
//!
//! # Wait/Wake Protocol
//!
//! Every key mapped to a shard shares that shard's two condition variables.
//! Readers wait on the reader condvar while the key is write-held; writers
//! wait on the writer condvar while the key is read- or write-held. Releasing
//! the last reader of a key, or its writer, wakes *all* waiters on both
//! condvars, and each waiter re-evaluates its own predicate. A wakeup thus
//! says nothing about the waiter's own key.
//!
//! The mutex is held only while a predicate is evaluated and the bookkeeping
//! is updated. A hold is the presence of the key in the bookkeeping, not a
//! held mutex.
//!
//! There is no fairness: a steady stream of readers on a key can starve a
//! writer waiting for the same key.
use std::time::Instant;

use crate::core::{Key, KeyState, UnlockError};

#[cfg(feature = "parking_lot")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "parking_lot")))]
pub mod parking;
pub mod sync;

/// A non-blocking interface to a readers-writer lock over a set of keys.
pub trait RawKeyRwLock: Default + Send + Sync {
    /// Attempt to acquire a reader lock on `key`. (Non-blocking)
    fn try_lock_read(&self, key: Key) -> bool;

    /// Attempt to acquire a writer lock on `key`. (Non-blocking)
    fn try_lock_write(&self, key: Key) -> bool;

    /// Release one reader lock on `key`.
    ///
    /// Fails without side effects if `key` is not read-locked.
    fn unlock_read(&self, key: Key) -> Result<(), UnlockError>;

    /// Release the writer lock on `key`.
    ///
    /// Fails without side effects if `key` is not write-locked.
    fn unlock_write(&self, key: Key) -> Result<(), UnlockError>;

    /// Get the current hold state of `key`.
    fn key_state(&self, key: Key) -> KeyState;

    /// Get the number of keys currently held.
    fn len(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A blocking interface to a readers-writer lock over a set of keys.
pub trait RawBlockingKeyRwLock: RawKeyRwLock {
    /// Acquire a reader lock, blocking the current thread until being able to
    /// do so.
    fn lock_read(&self, key: Key);

    /// Acquire a writer lock, blocking the current thread until being able to
    /// do so.
    fn lock_write(&self, key: Key);

    /// Acquire a reader lock, blocking the current thread until being able to
    /// do so or until `deadline` passes. Returns `false` (and acquires
    /// nothing) in the latter case.
    fn lock_read_until(&self, key: Key, deadline: Instant) -> bool;

    /// Ditto for writer locks.
    fn lock_write_until(&self, key: Key, deadline: Instant) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(feature = "parking_lot")] {
        /// The shard implementation used by [`LockTable`](crate::hl::table::LockTable)
        /// unless specified otherwise.
        pub type DefaultRawKeyRwLock = parking::ParkingRawKeyRwLock;
    } else {
        /// The shard implementation used by [`LockTable`](crate::hl::table::LockTable)
        /// unless specified otherwise.
        pub type DefaultRawKeyRwLock = sync::SyncRawKeyRwLock;
    }
}
