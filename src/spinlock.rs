//! spinlock module
//! unlike xv6-riscv, xv6-riscv-rust wraps data into a spinlock
//! useful reference crate spin(https://crates.io/crates/spin)
//!
//! Interrupt masking (push_off/pop_off) belongs to the trap layer,
//! which is not part of this crate, so the lock only spins.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

/// holder value when no cpu holds the lock
const NO_CPU: usize = usize::MAX;

pub struct SpinLock<T: ?Sized> {
    // for debugging
    // NO_CPU means this spinlock is not held by any cpu
    cpu_id: AtomicUsize,
    name: &'static str,

    lock: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
// This is not needed for xv6-riscv's spinlock, while this is implemented both crate std and spin.
// unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(user_data: T, name: &'static str) -> SpinLock<T> {
        SpinLock {
            cpu_id: AtomicUsize::new(NO_CPU),
            name,
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(user_data),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Check whether this cpu is holding the lock.
    fn holding(&self) -> bool {
        match cpu_id() {
            Some(id) => self.lock.load(Ordering::Relaxed) && self.cpu_id.load(Ordering::Relaxed) == id,
            None => false,
        }
    }

    fn acquire_lock(&self) {
        if self.holding() {
            panic!("acquire {}", self.name);
        }
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        // Tell the compiler and the processor to not move loads or stores
        // past this point, to ensure that the critical section's memory
        // references happen after the lock is acquired.
        fence(Ordering::SeqCst);
        if let Some(id) = cpu_id() {
            self.cpu_id.store(id, Ordering::Relaxed);
        }
    }

    /// Locks the spinlock and returns a guard.
    ///
    /// The returned guard can be deferenced for data access.
    /// i.e., we implement Deref trait for the guard.
    /// Also, the lock will also be dropped when the guard falls out of scope.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.acquire_lock();
        SpinLockGuard {
            spin_lock: &self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// Whether some guard currently holds the lock.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    fn release_lock(&self) {
        if !self.lock.load(Ordering::Relaxed) {
            panic!("release {}", self.name);
        }
        self.cpu_id.store(NO_CPU, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.lock.store(false, Ordering::Release);
    }
}

/// Which cpu is running.
/// The hart id is kept in tp, as the kernel entry code sets it up.
#[cfg(all(not(test), target_arch = "riscv64"))]
#[inline]
fn cpu_id() -> Option<usize> {
    let id: usize;
    unsafe { core::arch::asm!("mv {0}, tp", out(reg) id); }
    Some(id)
}

/// Elsewhere there is no hart id to tell holders apart.
#[cfg(all(not(test), not(target_arch = "riscv64")))]
#[inline]
fn cpu_id() -> Option<usize> {
    None
}

/// Host threads play the role of harts in tests.
#[cfg(test)]
fn cpu_id() -> Option<usize> {
    std::thread_local! {
        static HART: u8 = 0;
    }
    Some(HART.with(|hart| hart as *const u8 as usize))
}

pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    spin_lock: &'a SpinLock<T>,
    data: &'a mut T,
}

impl<'a, T: ?Sized> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    /// The dropping of the SpinLockGuard will call spinlock's release_lock(),
    /// through its reference to its original spinlock.
    fn drop(&mut self) {
        self.spin_lock.release_lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let m = SpinLock::new((), "smoke");
        drop(m.lock());
        drop(m.lock());
        assert!(!m.is_locked());
    }

    #[test]
    fn guard_releases_on_drop() {
        let m = SpinLock::new(0usize, "counter");
        {
            let mut guard = m.lock();
            *guard += 1;
            assert!(m.is_locked());
        }
        assert!(!m.is_locked());
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    #[should_panic(expected = "acquire relock")]
    fn relock_on_same_cpu_panics() {
        let m = SpinLock::new((), "relock");
        let _first = m.lock();
        let _second = m.lock();
    }

    #[test]
    fn other_cpu_waits_for_holder() {
        let m = std::sync::Arc::new(SpinLock::new(0usize, "shared"));
        let guard = m.lock();
        let other = {
            let m = m.clone();
            std::thread::spawn(move || {
                *m.lock() += 1;
            })
        };
        drop(guard);
        other.join().unwrap();
        assert_eq!(*m.lock(), 1);
        assert_eq!(m.cpu_id.load(Ordering::Relaxed), NO_CPU);
    }
}
