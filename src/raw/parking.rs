//! The shard implementation that uses [`parking_lot`]'s mutex and condition
//! variable.
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

use crate::{
    core::{Key, KeyState, KeyTable, UnlockError},
    raw::{RawBlockingKeyRwLock, RawKeyRwLock},
};

/// A readers-writer lock over a set of keys, built on [`parking_lot::Mutex`]
/// and [`parking_lot::Condvar`].
#[derive(Debug, Default)]
pub struct ParkingRawKeyRwLock {
    table: Mutex<KeyTable>,
    /// Signaled when a reader might proceed.
    read_cv: Condvar,
    /// Signaled when a writer might proceed.
    write_cv: Condvar,
}

impl ParkingRawKeyRwLock {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn wake_all(&self) {
        self.read_cv.notify_all();
        self.write_cv.notify_all();
    }
}

impl RawKeyRwLock for ParkingRawKeyRwLock {
    fn try_lock_read(&self, key: Key) -> bool {
        self.table.lock().try_lock_read(key)
    }

    fn try_lock_write(&self, key: Key) -> bool {
        self.table.lock().try_lock_write(key)
    }

    fn unlock_read(&self, key: Key) -> Result<(), UnlockError> {
        let last = self.table.lock().unlock_read(key)?;
        if last {
            self.wake_all();
        }
        Ok(())
    }

    fn unlock_write(&self, key: Key) -> Result<(), UnlockError> {
        self.table.lock().unlock_write(key)?;
        self.wake_all();
        Ok(())
    }

    fn key_state(&self, key: Key) -> KeyState {
        self.table.lock().state(key)
    }

    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

impl RawBlockingKeyRwLock for ParkingRawKeyRwLock {
    fn lock_read(&self, key: Key) {
        let mut table = self.table.lock();
        if !table.can_read(key) {
            log::trace!("reader of {key:#x} waiting for a writer");
            self.read_cv
                .wait_while(&mut table, |table| !table.can_read(key));
        }
        table.lock_read(key);
    }

    fn lock_write(&self, key: Key) {
        let mut table = self.table.lock();
        if !table.can_write(key) {
            log::trace!("writer of {key:#x} waiting for the key to become idle");
            self.write_cv
                .wait_while(&mut table, |table| !table.can_write(key));
        }
        table.lock_write(key);
    }

    fn lock_read_until(&self, key: Key, deadline: Instant) -> bool {
        let mut table = self.table.lock();
        if !table.can_read(key) {
            // The result is ignored; the predicate is checked again below
            let _ = self
                .read_cv
                .wait_while_until(&mut table, |table| !table.can_read(key), deadline);
        }
        let ok = table.try_lock_read(key);
        if !ok {
            log::trace!("reader of {key:#x} timed out");
        }
        ok
    }

    fn lock_write_until(&self, key: Key, deadline: Instant) -> bool {
        let mut table = self.table.lock();
        if !table.can_write(key) {
            let _ = self
                .write_cv
                .wait_while_until(&mut table, |table| !table.can_write(key), deadline);
        }
        let ok = table.try_lock_write(key);
        if !ok {
            log::trace!("writer of {key:#x} timed out");
        }
        ok
    }
}
