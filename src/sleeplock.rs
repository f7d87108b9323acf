//! sleeplock
//!
//! Long-term lock for inode contents.
//! The scheduler is not part of this crate,
//! so a contended acquirer spins instead of sleeping on a channel.

use core::cell::{Cell, UnsafeCell};
use core::hint;
use core::ops::{Deref, DerefMut, Drop};

use crate::spinlock::SpinLock;

pub struct SleepLock<T: ?Sized> {
    lock: SpinLock<()>,
    locked: Cell<bool>,
    name: &'static str,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: SpinLock::new((), "sleeplock"),
            locked: Cell::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// blocking, might wait if this sleeplock is already locked
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut guard = self.lock.lock();
        while self.locked.get() {
            drop(guard);
            hint::spin_loop();
            guard = self.lock.lock();
        }
        self.locked.set(true);
        drop(guard);
        SleepLockGuard {
            lock: &self,
            data: unsafe { &mut *self.data.get() }
        }
    }

    /// Check whether the lock is currently held by some guard.
    #[cfg(test)]
    pub(crate) fn holding(&self) -> bool {
        let guard = self.lock.lock();
        let r = self.locked.get();
        drop(guard);
        r
    }

    /// Called by its guard when dropped
    fn unlock(&self) {
        let guard = self.lock.lock();
        if !self.locked.get() {
            panic!("sleeplock {}: unlock while not locked", self.name);
        }
        self.locked.set(false);
        drop(guard);
    }
}

pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    data: &'a mut T,
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    /// The dropping of the SleepLockGuard will call sleeplock's unlock(),
    /// through its reference to its original sleeplock.
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
