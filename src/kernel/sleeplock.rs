//! Sleeping locks: exclusive long-term access held across I/O and
//! across other blocking operations (`spec.md` §5), used for buffer
//! contents and inode contents.
//!
//! Adapted from the teacher's `sleeplock.rs`. The teacher's
//! `SleepLockInfo` records the owning `pid` so a process can tell
//! whether it already holds a given lock; with process identity out of
//! scope (`spec.md` §1) this collapses to a plain `locked: bool`, and
//! waiting goes through [`crate::spinlock::MutexGuard::sleep`] against
//! the injected [`crate::hal::Scheduler`] instead of `PROCS.wakeup`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::hal;
use crate::spinlock::Mutex;

pub struct SleepLock<T> {
    lk: Mutex<bool>,
    data: UnsafeCell<T>,
    name: &'static str,
}

unsafe impl<T> Sync for SleepLock<T> {}
unsafe impl<T> Send for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    sleep_lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lk: Mutex::new(false, "sleep lock"),
            data: UnsafeCell::new(data),
            name,
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut locked = self.lk.lock();
        while *locked {
            locked = locked.sleep(self as *const _ as usize, hal::scheduler());
        }
        *locked = true;
        SleepLockGuard { sleep_lock: self }
    }

    pub fn holding(&self) -> bool {
        *self.lk.lock()
    }

    pub fn unlock(guard: SleepLockGuard<'_, T>) -> &'_ SleepLock<T> {
        guard.sleep_lock()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<'a, T: 'a> SleepLockGuard<'a, T> {
    pub fn sleep_lock(&self) -> &'a SleepLock<T> {
        self.sleep_lock
    }

    pub fn holding(&self) -> bool {
        self.sleep_lock.holding()
    }
}

impl<'a, T: 'a> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.sleep_lock.data.get() }
    }
}

impl<'a, T: 'a> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.sleep_lock.data.get() }
    }
}

impl<'a, T: 'a> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        let mut locked = self.sleep_lock.lk.lock();
        *locked = false;
        hal::scheduler().wakeup(self.sleep_lock as *const _ as usize);
    }
}
