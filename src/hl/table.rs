//! Provides [`LockTable`], a readers-writer lock for an unbounded space of
//! 64-bit keys, multiplexed onto a fixed number of shards.
use crossbeam_utils::CachePadded;
use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use crate::{
    core::{Key, KeyState, UnlockError},
    raw::{DefaultRawKeyRwLock, RawBlockingKeyRwLock, RawKeyRwLock},
    utils::dedup::dedup_keys,
};


/// Indicates a failure of a non-blocking lock operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum TryLockError {
    /// The lock could not be acquired at this time because the operation would
    /// otherwise block.
    #[error("lock failed because the operation would block")]
    WouldBlock,
}

/// Indicates that a deadline-bounded lock operation gave up.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[error("lock failed because the deadline passed")]
pub struct TimedOut;

#[cold]
#[track_caller]
fn unbalanced_unlock(err: UnlockError) -> ! {
    panic!("{err}");
}

// `LockTable` and its methods
// ----------------------------------------------------------------------------

/// A readers-writer lock table addressed by [`Key`].
///
/// A key is routed to shard `key % N`. Each shard is a `RawShard`, which owns
/// one mutex and two condition variables shared by every key routed to it.
/// Exclusion is nevertheless per key: a writer on one key never blocks a
/// reader or writer on another key of the same shard.
///
/// The table does not track which thread holds what. Each acquisition must be
/// matched by exactly one release of the same kind on the same key.
/// Releases that match nothing are detected and reported (see
/// [`Self::checked_read_unlock`]); other misuse is not.
///
/// There is no fairness. A writer can be starved by readers that keep
/// arriving for the same key.
///
/// # Drop Validation
///
/// Dropping a table that still has holds is a caller error. Debug builds
/// panic in that case.
pub struct LockTable<const N: usize, RawShard: RawKeyRwLock = DefaultRawKeyRwLock> {
    shards: [CachePadded<RawShard>; N],
}

impl<const N: usize, RawShard: RawKeyRwLock> LockTable<N, RawShard> {
    /// The number of shards.
    pub const SHARD_COUNT: usize = N;

    /// Construct a table with every key idle.
    ///
    /// # Panics
    ///
    /// Panics if `N` is zero.
    pub fn new() -> Self {
        assert!(N > 0, "a lock table needs at least one shard");
        Self {
            shards: std::array::from_fn(|_| CachePadded::new(RawShard::default())),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        N
    }

    /// Get the index of the shard `key` is routed to.
    #[inline]
    pub fn shard_index(&self, key: Key) -> usize {
        (key % N as u64) as usize
    }

    #[inline]
    fn shard(&self, key: Key) -> &RawShard {
        &self.shards[self.shard_index(key)]
    }

    /// Get the current hold state of `key`.
    ///
    /// The result may be stale by the time it's returned.
    pub fn key_state(&self, key: Key) -> KeyState {
        self.shard(key).key_state(key)
    }

    /// Get the number of keys currently held by any reader or writer.
    ///
    /// Shards are inspected one by one, so the result is not a snapshot under
    /// concurrent use.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    /// Get a flag indicating whether no key is held.
    pub fn is_idle(&self) -> bool {
        self.shards.iter().all(|shard| shard.is_empty())
    }

    /// Attempt to acquire a reader lock on `key`. (Non-blocking)
    pub fn try_read_lock(&self, key: Key) -> Result<(), TryLockError> {
        if self.shard(key).try_lock_read(key) {
            Ok(())
        } else {
            Err(TryLockError::WouldBlock)
        }
    }

    /// Attempt to acquire a writer lock on `key`. (Non-blocking)
    pub fn try_write_lock(&self, key: Key) -> Result<(), TryLockError> {
        if self.shard(key).try_lock_write(key) {
            Ok(())
        } else {
            Err(TryLockError::WouldBlock)
        }
    }

    /// Release one reader lock on `key`.
    ///
    /// When the last reader leaves, every waiter on the shard is woken up to
    /// re-check its key.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not read-locked. The table is left unchanged.
    #[track_caller]
    pub fn read_unlock(&self, key: Key) {
        if let Err(err) = self.checked_read_unlock(key) {
            unbalanced_unlock(err);
        }
    }

    /// Release the writer lock on `key` and wake up every waiter on the
    /// shard.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not write-locked. The table is left unchanged.
    #[track_caller]
    pub fn write_unlock(&self, key: Key) {
        if let Err(err) = self.checked_write_unlock(key) {
            unbalanced_unlock(err);
        }
    }

    /// The variant of [`Self::read_unlock`] that reports an unbalanced release
    /// instead of panicking.
    pub fn checked_read_unlock(&self, key: Key) -> Result<(), UnlockError> {
        self.shard(key).unlock_read(key)
    }

    /// The variant of [`Self::write_unlock`] that reports an unbalanced release
    /// instead of panicking.
    pub fn checked_write_unlock(&self, key: Key) -> Result<(), UnlockError> {
        self.shard(key).unlock_write(key)
    }

    /// Release one reader lock on each distinct key in `keys`.
    ///
    /// This undoes [`Self::read_lock_many`] called with the same keys.
    ///
    /// # Panics
    ///
    /// Panics at the first key that is not read-locked. Keys before it have
    /// been released.
    #[track_caller]
    pub fn read_unlock_many(&self, keys: impl IntoIterator<Item = Key>) {
        for key in dedup_keys(keys) {
            self.read_unlock(key);
        }
    }

    /// Release the writer lock on each distinct key in `keys`.
    ///
    /// # Panics
    ///
    /// Panics at the first key that is not write-locked. Keys before it have
    /// been released.
    #[track_caller]
    pub fn write_unlock_many(&self, keys: impl IntoIterator<Item = Key>) {
        for key in dedup_keys(keys) {
            self.write_unlock(key);
        }
    }

    /// Attempt to acquire a reader lock on `key`, returning an RAII guard.
    /// (Non-blocking)
    ///
    /// # Example
    ///
    /// ```rust
    /// use keylock::{LockTable, hl::table::TryLockError};
    ///
    /// let table: LockTable<16> = LockTable::new();
    /// let _writer = table.try_write(7).unwrap();
    /// assert_eq!(table.try_read(7).err(), Some(TryLockError::WouldBlock));
    /// assert!(table.try_read(8).is_ok());
    /// ```
    pub fn try_read(&self, key: Key) -> Result<ReadGuard<'_, N, RawShard>, TryLockError> {
        self.try_read_lock(key)?;
        Ok(ReadGuard { table: self, key })
    }

    /// Attempt to acquire a writer lock on `key`, returning an RAII guard.
    /// (Non-blocking)
    pub fn try_write(&self, key: Key) -> Result<WriteGuard<'_, N, RawShard>, TryLockError> {
        self.try_write_lock(key)?;
        Ok(WriteGuard { table: self, key })
    }
}

/// # Blocking Lock Operations
///
/// These methods require `RawShard: `[`RawBlockingKeyRwLock`].
impl<const N: usize, RawShard: RawBlockingKeyRwLock> LockTable<N, RawShard> {
    /// Acquire a reader lock on `key`, blocking the current thread while a
    /// writer holds it.
    pub fn read_lock(&self, key: Key) {
        self.shard(key).lock_read(key);
    }

    /// Acquire a writer lock on `key`, blocking the current thread while any
    /// reader or writer holds it.
    pub fn write_lock(&self, key: Key) {
        self.shard(key).lock_write(key);
    }

    /// Acquire a reader lock on `key`, blocking the current thread until
    /// being able to do so or until `deadline`.
    pub fn read_lock_until(&self, key: Key, deadline: Instant) -> Result<(), TimedOut> {
        if self.shard(key).lock_read_until(key, deadline) {
            Ok(())
        } else {
            Err(TimedOut)
        }
    }

    /// Acquire a writer lock on `key`, blocking the current thread until
    /// being able to do so or until `deadline`.
    pub fn write_lock_until(&self, key: Key, deadline: Instant) -> Result<(), TimedOut> {
        if self.shard(key).lock_write_until(key, deadline) {
            Ok(())
        } else {
            Err(TimedOut)
        }
    }

    /// The variant of [`Self::read_lock_until`] that takes a relative timeout.
    pub fn read_lock_timeout(&self, key: Key, timeout: Duration) -> Result<(), TimedOut> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.read_lock_until(key, deadline),
            None => {
                self.read_lock(key);
                Ok(())
            }
        }
    }

    /// The variant of [`Self::write_lock_until`] that takes a relative timeout.
    pub fn write_lock_timeout(&self, key: Key, timeout: Duration) -> Result<(), TimedOut> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.write_lock_until(key, deadline),
            None => {
                self.write_lock(key);
                Ok(())
            }
        }
    }

    /// Acquire a reader lock on each distinct key in `keys`, one at a time,
    /// in the order of first occurrence.
    ///
    /// Repeated keys are locked once. The acquisition as a whole is not
    /// atomic, and keys are not reordered; callers that hold several batches
    /// at once should sort their keys to avoid lock-order deadlocks.
    pub fn read_lock_many(&self, keys: impl IntoIterator<Item = Key>) {
        self.read_lock_distinct(keys);
    }

    /// Acquire a writer lock on each distinct key in `keys`.
    ///
    /// See [`Self::read_lock_many`] for the caveats.
    pub fn write_lock_many(&self, keys: impl IntoIterator<Item = Key>) {
        self.write_lock_distinct(keys);
    }

    /// The deadline-bounded variant of [`Self::read_lock_many`].
    ///
    /// On timeout, the keys this call already acquired are released before
    /// returning.
    pub fn read_lock_many_until(
        &self,
        keys: impl IntoIterator<Item = Key>,
        deadline: Instant,
    ) -> Result<(), TimedOut> {
        self.lock_many_until(
            keys,
            |shard, key| shard.lock_read_until(key, deadline),
            Self::read_unlock,
        )
        .map(drop)
    }

    /// The deadline-bounded variant of [`Self::write_lock_many`].
    ///
    /// On timeout, the keys this call already acquired are released before
    /// returning.
    pub fn write_lock_many_until(
        &self,
        keys: impl IntoIterator<Item = Key>,
        deadline: Instant,
    ) -> Result<(), TimedOut> {
        self.lock_many_until(
            keys,
            |shard, key| shard.lock_write_until(key, deadline),
            Self::write_unlock,
        )
        .map(drop)
    }

    fn read_lock_distinct(&self, keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
        let keys = dedup_keys(keys);
        for &key in &keys {
            self.read_lock(key);
        }
        keys
    }

    fn write_lock_distinct(&self, keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
        let keys = dedup_keys(keys);
        for &key in &keys {
            self.write_lock(key);
        }
        keys
    }

    fn lock_many_until(
        &self,
        keys: impl IntoIterator<Item = Key>,
        mut lock: impl FnMut(&RawShard, Key) -> bool,
        unlock: impl Fn(&Self, Key),
    ) -> Result<Vec<Key>, TimedOut> {
        let keys = dedup_keys(keys);
        for (i, &key) in keys.iter().enumerate() {
            if !lock(self.shard(key), key) {
                log::trace!("batch lock timed out at {key:#x}, rolling back {i} keys");
                for &acquired in keys[..i].iter().rev() {
                    unlock(self, acquired);
                }
                return Err(TimedOut);
            }
        }
        Ok(keys)
    }

    /// Acquire a reader lock on `key`, returning an RAII guard.
    pub fn read(&self, key: Key) -> ReadGuard<'_, N, RawShard> {
        self.read_lock(key);
        ReadGuard { table: self, key }
    }

    /// Acquire a writer lock on `key`, returning an RAII guard.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keylock::{KeyState, LockTable};
    ///
    /// let table: LockTable<4> = LockTable::new();
    /// {
    ///     let _guard = table.write(1);
    ///     assert_eq!(table.key_state(1), KeyState::Writing);
    ///     // 5 shares a shard with 1 but is a different key
    ///     assert!(table.try_read(5).is_ok());
    /// }
    /// assert!(table.is_idle());
    /// ```
    pub fn write(&self, key: Key) -> WriteGuard<'_, N, RawShard> {
        self.write_lock(key);
        WriteGuard { table: self, key }
    }

    /// Acquire a reader lock on each distinct key in `keys`, returning an
    /// RAII guard that releases all of them.
    ///
    /// See [`Self::read_lock_many`] for the caveats.
    pub fn read_many(
        &self,
        keys: impl IntoIterator<Item = Key>,
    ) -> ReadManyGuard<'_, N, RawShard> {
        let keys = self.read_lock_distinct(keys);
        ReadManyGuard { table: self, keys }
    }

    /// Acquire a writer lock on each distinct key in `keys`, returning an
    /// RAII guard that releases all of them.
    ///
    /// See [`Self::read_lock_many`] for the caveats.
    pub fn write_many(
        &self,
        keys: impl IntoIterator<Item = Key>,
    ) -> WriteManyGuard<'_, N, RawShard> {
        let keys = self.write_lock_distinct(keys);
        WriteManyGuard { table: self, keys }
    }

    /// The deadline-bounded variant of [`Self::read_many`].
    pub fn read_many_until(
        &self,
        keys: impl IntoIterator<Item = Key>,
        deadline: Instant,
    ) -> Result<ReadManyGuard<'_, N, RawShard>, TimedOut> {
        let keys = self.lock_many_until(
            keys,
            |shard, key| shard.lock_read_until(key, deadline),
            Self::read_unlock,
        )?;
        Ok(ReadManyGuard { table: self, keys })
    }

    /// The deadline-bounded variant of [`Self::write_many`].
    pub fn write_many_until(
        &self,
        keys: impl IntoIterator<Item = Key>,
        deadline: Instant,
    ) -> Result<WriteManyGuard<'_, N, RawShard>, TimedOut> {
        let keys = self.lock_many_until(
            keys,
            |shard, key| shard.lock_write_until(key, deadline),
            Self::write_unlock,
        )?;
        Ok(WriteManyGuard { table: self, keys })
    }
}

impl<const N: usize, RawShard: RawKeyRwLock> Default for LockTable<N, RawShard> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, RawShard: RawKeyRwLock> fmt::Debug for LockTable<N, RawShard> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("shard_count", &N)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<const N: usize, RawShard: RawKeyRwLock> Drop for LockTable<N, RawShard> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && !thread::panicking() {
            assert!(
                self.is_idle(),
                "lock table dropped while {} keys are still held",
                self.len()
            );
        }
    }
}

// Lock guards
// ----------------------------------------------------------------------------

macro_rules! define_lock_guard {
    (
        $( #[$meta:meta] )*
        pub struct $ident:ident;
        impl Drop for _ { => $unlock_method:ident }
    ) => {
        $( #[$meta] )*
        ///
        /// # Notes
        ///
        /// [`forget`]ting a value of this type leaks the hold. The key stays
        /// locked until it's released through the table directly.
        ///
        /// [`forget`]: core::mem::forget
        #[must_use = "if unused the lock will immediately unlock"]
        pub struct $ident<'a, const N: usize, RawShard: RawKeyRwLock> {
            table: &'a LockTable<N, RawShard>,
            key: Key,
        }

        impl<const N: usize, RawShard: RawKeyRwLock> $ident<'_, N, RawShard> {
            /// Get the key this guard holds.
            #[inline]
            pub fn key(&self) -> Key {
                self.key
            }
        }

        impl<const N: usize, RawShard: RawKeyRwLock> fmt::Debug for $ident<'_, N, RawShard> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ident))
                    .field("key", &self.key)
                    .finish()
            }
        }

        impl<const N: usize, RawShard: RawKeyRwLock> Drop for $ident<'_, N, RawShard> {
            #[inline]
            fn drop(&mut self) {
                self.table.$unlock_method(self.key);
            }
        }
    };
}

macro_rules! define_batch_lock_guard {
    (
        $( #[$meta:meta] )*
        pub struct $ident:ident;
        impl Drop for _ { => $unlock_method:ident }
    ) => {
        $( #[$meta] )*
        #[must_use = "if unused the locks will immediately unlock"]
        pub struct $ident<'a, const N: usize, RawShard: RawKeyRwLock> {
            table: &'a LockTable<N, RawShard>,
            /// Distinct keys, in acquisition order
            keys: Vec<Key>,
        }

        impl<const N: usize, RawShard: RawKeyRwLock> $ident<'_, N, RawShard> {
            /// Get the distinct keys this guard holds, in acquisition order.
            #[inline]
            pub fn keys(&self) -> &[Key] {
                &self.keys
            }
        }

        impl<const N: usize, RawShard: RawKeyRwLock> fmt::Debug for $ident<'_, N, RawShard> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ident))
                    .field("keys", &self.keys)
                    .finish()
            }
        }

        impl<const N: usize, RawShard: RawKeyRwLock> Drop for $ident<'_, N, RawShard> {
            fn drop(&mut self) {
                for &key in self.keys.iter().rev() {
                    self.table.$unlock_method(key);
                }
            }
        }
    };
}

define_lock_guard! {
    /// [`LockTable`]'s RAII lock guard for a reader lock on one key.
    pub struct ReadGuard;
    impl Drop for _ { => read_unlock }
}

define_lock_guard! {
    /// [`LockTable`]'s RAII lock guard for a writer lock on one key.
    pub struct WriteGuard;
    impl Drop for _ { => write_unlock }
}

define_batch_lock_guard! {
    /// [`LockTable`]'s RAII lock guard for reader locks on a set of keys.
    pub struct ReadManyGuard;
    impl Drop for _ { => read_unlock }
}

define_batch_lock_guard! {
    /// [`LockTable`]'s RAII lock guard for writer locks on a set of keys.
    pub struct WriteManyGuard;
    impl Drop for _ { => write_unlock }
}
