//! Reader-writer spinlock guarding the allocation table and counters.
//!
//! We cannot use `std::sync::RwLock` inside a global allocator hook without
//! risking reentrancy, so this is a small atomic-word lock in the same spirit
//! as a test-and-set spinlock, extended with a shared mode.
//!
//! Layout of the state word:
//! - bit 0: a writer holds the lock
//! - bit 1: a writer is waiting; new readers back off
//! - bits 2..: number of active readers
//!
//! Waiting writers block new readers, so a steady stream of allocation
//! traffic is never starved by report generation.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

const WRITER: usize = 1;
const WRITER_WAITING: usize = 1 << 1;
const READER: usize = 1 << 2;

/// A reader-writer lock that spins instead of parking.
/// Does not allocate and can be used in a `static`.
pub struct RwSpinLock<T> {
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwSpinLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self {
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(val),
        }
    }

    /// Acquire shared access. Any number of readers may hold the lock at once.
    #[inline]
    pub fn read(&self) -> ReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            core::hint::spin_loop();
        }
    }

    #[inline]
    pub fn try_read(&self) -> Option<ReadGuard<'_, T>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & (WRITER | WRITER_WAITING) != 0 {
            return None;
        }
        self.state
            .compare_exchange(s, s + READER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ReadGuard { lock: self })
    }

    /// Acquire exclusive access.
    #[inline]
    pub fn write(&self) -> WriteGuard<'_, T> {
        if let Some(guard) = self.try_write() {
            return guard;
        }
        self.write_slow()
    }

    #[cold]
    fn write_slow(&self) -> WriteGuard<'_, T> {
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & WRITER == 0 && s < READER {
                // Clears WRITER_WAITING too; other waiters set it again.
                if self
                    .state
                    .compare_exchange_weak(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return WriteGuard { lock: self };
                }
            } else if s & WRITER_WAITING == 0 {
                self.state.fetch_or(WRITER_WAITING, Ordering::Relaxed);
            }
            core::hint::spin_loop();
        }
    }

    #[inline]
    pub fn try_write(&self) -> Option<WriteGuard<'_, T>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & WRITER != 0 || s >= READER {
            return None;
        }
        self.state
            .compare_exchange(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| WriteGuard { lock: self })
    }
}

/// RAII shared guard for `RwSpinLock`. Only hands out `&T`.
pub struct ReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.state.fetch_sub(READER, Ordering::Release);
    }
}

/// RAII exclusive guard for `RwSpinLock`. Unlocks on drop.
pub struct WriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // Leave WRITER_WAITING alone: another writer may have set it.
        self.lock.state.fetch_and(!WRITER, Ordering::Release);
    }
}
