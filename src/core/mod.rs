//! The core bookkeeping of a single shard: which keys are read-held (and by
//! how many readers) and which keys are write-held.
//!
//! Nothing here synchronizes. A [`KeyTable`] is always accessed under the
//! mutex of the shard that owns it (see [`crate::raw`]).
use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
};


/// An opaque 64-bit identifier of a logical resource.
pub type Key = u64;

/// The hold state of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    /// No reader or writer holds the key.
    Idle,
    /// The key is held by the given number of readers.
    Reading(NonZeroUsize),
    /// The key is held by exactly one writer.
    Writing,
}

impl KeyState {
    #[inline]
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// Indicates that a release did not match any hold.
///
/// The table does not track lock ownership, so this is only detected when the
/// key has no hold of the released kind at all.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum UnlockError {
    /// `unlock_read` was called on a key that has no readers.
    #[error("attempted to release a reader lock on key {key:#x}, which is not read-locked")]
    NotReadLocked { key: Key },
    /// `unlock_write` was called on a key that has no writer.
    #[error("attempted to release a writer lock on key {key:#x}, which is not write-locked")]
    NotWriteLocked { key: Key },
}

/// Reader counts and writer flags for every key mapped to one shard.
///
/// # Invariants
///
///  - A key is never present in both `readers` and `writers`.
///  - `readers` never contains a zero count. Entries are created on the first
///    reader and erased together with the last one, so the size of both
///    collections is bounded by the number of keys currently held.
#[derive(Debug, Default)]
pub struct KeyTable {
    readers: HashMap<Key, usize>,
    writers: HashSet<Key>,
}

impl KeyTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a flag indicating whether a reader lock on `key` can be granted
    /// right now.
    #[inline]
    pub fn can_read(&self, key: Key) -> bool {
        !self.writers.contains(&key)
    }

    /// Get a flag indicating whether a writer lock on `key` can be granted
    /// right now.
    #[inline]
    pub fn can_write(&self, key: Key) -> bool {
        !self.writers.contains(&key) && !self.readers.contains_key(&key)
    }

    /// Register one more reader of `key`.
    ///
    /// The caller must have checked [`Self::can_read`].
    #[inline]
    pub fn lock_read(&mut self, key: Key) {
        debug_assert!(self.can_read(key), "key {key:#x} is write-locked");
        *self.readers.entry(key).or_insert(0) += 1;
    }

    /// Mark `key` as write-held.
    ///
    /// The caller must have checked [`Self::can_write`].
    #[inline]
    pub fn lock_write(&mut self, key: Key) {
        debug_assert!(self.can_write(key), "key {key:#x} is locked");
        self.writers.insert(key);
    }

    /// Check [`Self::can_read`] and [`Self::lock_read`] in one step.
    #[inline]
    pub fn try_lock_read(&mut self, key: Key) -> bool {
        let ok = self.can_read(key);
        if ok {
            self.lock_read(key);
        }
        ok
    }

    /// Check [`Self::can_write`] and [`Self::lock_write`] in one step.
    #[inline]
    pub fn try_lock_write(&mut self, key: Key) -> bool {
        let ok = self.can_write(key);
        if ok {
            self.lock_write(key);
        }
        ok
    }

    /// Release one reader of `key`.
    ///
    /// Returns `true` if that was the last reader, in which case the entry has
    /// been erased and waiters should be woken up.
    pub fn unlock_read(&mut self, key: Key) -> Result<bool, UnlockError> {
        let count = self
            .readers
            .get_mut(&key)
            .ok_or(UnlockError::NotReadLocked { key })?;
        *count -= 1;
        if *count == 0 {
            self.readers.remove(&key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release the writer of `key`.
    pub fn unlock_write(&mut self, key: Key) -> Result<(), UnlockError> {
        if self.writers.remove(&key) {
            Ok(())
        } else {
            Err(UnlockError::NotWriteLocked { key })
        }
    }

    pub fn state(&self, key: Key) -> KeyState {
        if self.writers.contains(&key) {
            KeyState::Writing
        } else {
            self.readers
                .get(&key)
                .and_then(|&count| NonZeroUsize::new(count))
                .map_or(KeyState::Idle, KeyState::Reading)
        }
    }

    /// Get the number of keys currently held by any reader or writer.
    #[inline]
    pub fn len(&self) -> usize {
        self.readers.len() + self.writers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writers.is_empty()
    }
}
