//! Reader-preferring lock shared by all ingest workers.
//!
//! Inserts take the lock for reading; merges and compaction take it for
//! writing. Many inserts may run together, and nothing else runs while a
//! writer holds the lock.
//!
//! ```text
//! read()    lock mutex ─ count += 1 ─ unlock          (never waits on the condvar)
//! drop(R)   lock mutex ─ count -= 1 ─ notify if 0 ─ unlock
//! write()   lock mutex ─ wait while count > 0 ─ keep mutex until drop
//! drop(W)   notify one ─ unlock
//! ```
//!
//! Readers may keep arriving while a writer waits, so a writer can starve
//! under a steady stream of inserts. While a writer holds the mutex,
//! `read()` blocks on the mutex itself.

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InsertLock {
    readers: Mutex<usize>,
    released: Condvar,
}

/// Shared access; released on drop.
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a InsertLock,
}

/// Exclusive access; released on drop.
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a InsertLock,
    _held: MutexGuard<'a, usize>,
}

impl InsertLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> ReadGuard<'_> {
        *self.readers.lock() += 1;
        ReadGuard { lock: self }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        let mut held = self.readers.lock();
        while *held > 0 {
            self.released.wait(&mut held);
        }
        WriteGuard {
            lock: self,
            _held: held,
        }
    }

    /// Current reader count. Blocks while a writer holds the lock.
    pub fn readers(&self) -> usize {
        *self.readers.lock()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.lock.readers.lock();
        *count -= 1;
        if *count == 0 {
            self.lock.released.notify_one();
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.released.notify_one();
    }
}
