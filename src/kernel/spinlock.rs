//! Mutual-exclusion lock for short critical sections, i.e. the xv6
//! "spinlock": never held across a sleep, never held while the holder
//! itself sleeps.
//!
//! Built on [`spin::Mutex`] rather than a hand-rolled test-and-set loop
//! -- this crate runs with CPU scheduling and interrupt control out of
//! scope, so there is no `push_off`/`pop_off` interrupt-disable pair to
//! wire in here the way xv6's own spinlock.c does. What's left is the
//! bare mutual exclusion, which `spin` already provides; this wrapper
//! keeps the teacher's naming convention (`Mutex::new(data, name)`,
//! panicking `get_mut`) so the rest of this crate reads the same as it
//! would against a hand-written spinlock.

use core::ops::{Deref, DerefMut};

use crate::hal::Scheduler;

pub struct Mutex<T> {
    inner: spin::Mutex<T>,
    name: &'static str,
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    inner: Option<spin::MutexGuard<'a, T>>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            inner: spin::Mutex::new(data),
            name,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            inner: Some(self.inner.lock()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// # Safety
    /// Caller must guarantee no other reference (locked or not) to the
    /// data is alive. Used only by the panic path, which must be able
    /// to print even if some other context holds the lock; the lock is
    /// deliberately never released afterwards since the system is
    /// halting.
    pub unsafe fn get_mut(&self) -> &mut T {
        let mut guard = self.inner.lock();
        let ptr: *mut T = &mut *guard;
        core::mem::forget(guard);
        &mut *ptr
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner.as_ref().expect("use after sleep")
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("use after sleep")
    }
}

impl<'a, T> MutexGuard<'a, T> {
    pub fn name(&self) -> &'static str {
        self.mutex.name()
    }

    /// Release the spin lock, park on `chan` until woken, then
    /// re-acquire and return a fresh guard.
    ///
    /// This is the generalization of the teacher's
    /// `p.sleep(chan, guard) -> guard`: every caller that used to reach
    /// into the global process table now drives the same
    /// release-park-reacquire sequence through an injected
    /// [`Scheduler`] (`spec.md` §5 "Suspension points").
    pub fn sleep(mut self, chan: usize, scheduler: &dyn Scheduler) -> Self {
        let mutex = self.mutex;
        self.inner.take(); // drop the spin lock before parking
        scheduler.park(chan);
        mutex.lock()
    }
}
