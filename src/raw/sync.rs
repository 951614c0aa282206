//! The shard implementation that uses [`std`]'s interthread synchronization
//! API.
use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::{
    core::{Key, KeyState, KeyTable, UnlockError},
    raw::{RawBlockingKeyRwLock, RawKeyRwLock},
};

/// A readers-writer lock over a set of keys, built on [`std::sync::Mutex`]
/// and [`std::sync::Condvar`].
#[derive(Debug, Default)]
pub struct SyncRawKeyRwLock {
    table: Mutex<KeyTable>,
    /// Signaled when a reader might proceed.
    read_cv: Condvar,
    /// Signaled when a writer might proceed.
    write_cv: Condvar,
}

impl SyncRawKeyRwLock {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the bookkeeping.
    ///
    /// Poisoning is ignored. `KeyTable` validates before it mutates, so a
    /// panicking holder can't leave it half-updated.
    #[inline]
    fn table(&self) -> MutexGuard<'_, KeyTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn wake_all(&self) {
        self.read_cv.notify_all();
        self.write_cv.notify_all();
    }
}

impl RawKeyRwLock for SyncRawKeyRwLock {
    fn try_lock_read(&self, key: Key) -> bool {
        self.table().try_lock_read(key)
    }

    fn try_lock_write(&self, key: Key) -> bool {
        self.table().try_lock_write(key)
    }

    fn unlock_read(&self, key: Key) -> Result<(), UnlockError> {
        let last = self.table().unlock_read(key)?;
        if last {
            self.wake_all();
        }
        Ok(())
    }

    fn unlock_write(&self, key: Key) -> Result<(), UnlockError> {
        self.table().unlock_write(key)?;
        self.wake_all();
        Ok(())
    }

    fn key_state(&self, key: Key) -> KeyState {
        self.table().state(key)
    }

    fn len(&self) -> usize {
        self.table().len()
    }
}

impl RawBlockingKeyRwLock for SyncRawKeyRwLock {
    fn lock_read(&self, key: Key) {
        let mut table = self.table();
        if !table.can_read(key) {
            log::trace!("reader of {key:#x} waiting for a writer");
            table = self
                .read_cv
                .wait_while(table, |table| !table.can_read(key))
                .unwrap_or_else(PoisonError::into_inner);
        }
        table.lock_read(key);
    }

    fn lock_write(&self, key: Key) {
        let mut table = self.table();
        if !table.can_write(key) {
            log::trace!("writer of {key:#x} waiting for the key to become idle");
            table = self
                .write_cv
                .wait_while(table, |table| !table.can_write(key))
                .unwrap_or_else(PoisonError::into_inner);
        }
        table.lock_write(key);
    }

    fn lock_read_until(&self, key: Key, deadline: Instant) -> bool {
        let mut table = self.table();
        if !table.can_read(key) {
            let timeout = deadline.saturating_duration_since(Instant::now());
            table = self
                .read_cv
                .wait_timeout_while(table, timeout, |table| !table.can_read(key))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let ok = table.try_lock_read(key);
        if !ok {
            log::trace!("reader of {key:#x} timed out");
        }
        ok
    }

    fn lock_write_until(&self, key: Key, deadline: Instant) -> bool {
        let mut table = self.table();
        if !table.can_write(key) {
            let timeout = deadline.saturating_duration_since(Instant::now());
            table = self
                .write_cv
                .wait_timeout_while(table, timeout, |table| !table.can_write(key))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let ok = table.try_lock_write(key);
        if !ok {
            log::trace!("writer of {key:#x} timed out");
        }
        ok
    }
}
