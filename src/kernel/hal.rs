//! External collaborators this crate needs and does not implement:
//! the block device, the clock, and the scheduler's park/unpark
//! primitive. `spec.md` §6 calls the first two out explicitly; the
//! third is the minimal seam sleep locks and the log's admission
//! control need from CPU scheduling, which is out of scope (§1).
//!
//! Each is a trait object, registered once at boot by [`init`], the
//! same "process-wide singleton set up once" shape the teacher uses
//! for `SB`/`LOG`/`ITABLE`/`FTABLE` (`spec.md` §9 "Global mutables").
//! A real kernel wires a virtio driver, a CLINT tick counter, and its
//! own process table; `#[cfg(test)]` wires the in-memory stand-ins in
//! `testing.rs` instead.

use crate::param::BSIZE;
use spin::Once;

pub trait BlockDevice: Sync {
    /// Read exactly `BSIZE` bytes from `blockno` into `buf`. Synchronous;
    /// a device error is fatal (`spec.md` §6).
    fn read(&self, blockno: u32, buf: &mut [u8; BSIZE]);
    /// Write exactly `BSIZE` bytes from `buf` to `blockno`. Synchronous.
    fn write(&self, blockno: u32, buf: &[u8; BSIZE]);
}

pub trait Clock: Sync {
    /// Monotonically non-decreasing tick count. Resolution is coarser
    /// than a lock/unlock cycle, which is fine per `spec.md` §6.
    fn ticks(&self) -> u64;
}

/// The park/unpark primitive `sleep`/`wakeup` in the teacher's
/// `proc.rs` provide to every other lock in the crate. `chan` is an
/// arbitrary address-sized token identifying what's being waited for,
/// exactly as xv6 uses the address of the lock or resource itself.
pub trait Scheduler: Sync {
    /// Park the calling context until a matching [`Scheduler::wakeup`].
    /// Called with no lock held by the caller (the lock protecting the
    /// condition has already been dropped by [`crate::spinlock::MutexGuard::sleep`]).
    fn park(&self, chan: usize);
    /// Wake every context parked on `chan`.
    fn wakeup(&self, chan: usize);
}

static BLOCK_DEVICE: Once<&'static dyn BlockDevice> = Once::new();
static CLOCK: Once<&'static dyn Clock> = Once::new();
static SCHEDULER: Once<&'static dyn Scheduler> = Once::new();

/// Register the external collaborators. Must be called exactly once,
/// before any other operation in this crate (mirrors the boot-order
/// requirement on `binit`/`initlog`/`iinit`/`fileinit` in `spec.md` §5).
pub fn init(block_device: &'static dyn BlockDevice, clock: &'static dyn Clock, scheduler: &'static dyn Scheduler) {
    BLOCK_DEVICE.call_once(|| block_device);
    CLOCK.call_once(|| clock);
    SCHEDULER.call_once(|| scheduler);
}

pub fn block_device() -> &'static dyn BlockDevice {
    *BLOCK_DEVICE.get().expect("hal::init was never called")
}

pub fn clock() -> &'static dyn Clock {
    *CLOCK.get().expect("hal::init was never called")
}

pub fn scheduler() -> &'static dyn Scheduler {
    *SCHEDULER.get().expect("hal::init was never called")
}

#[cfg(test)]
pub mod testing;
