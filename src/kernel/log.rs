//! Physical redo log: groups the block writes of one file-system
//! operation into an atomic-looking transaction, so a crash mid-write
//! never leaves the disk in a state between two operations
//! (`spec.md` §4.3).
//!
//! Adapted from the teacher's `log.rs`. Admission control
//! (`begin_op`/`end_op` sleeping on log space or an in-progress commit)
//! now goes through [`crate::hal::Scheduler`] instead of `CPUS`/`PROCS`,
//! and the on-disk header is (de)serialized with `zerocopy` instead of
//! the teacher's `align_to`/`align_to_mut` reinterpretation, since the
//! header is a structured record rather than raw buffer bytes.

use core::ops::{Deref, DerefMut};
use spin::Once;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::{BufGuard, BCACHE};
use crate::hal;
use crate::param::LOGSIZE;
use crate::spinlock::Mutex;

static LOG: Once<Mutex<Log>> = Once::new();

/// Contents of the on-disk header block, and the in-memory record of
/// logged block numbers before commit.
#[repr(C)]
#[derive(Default, Debug, Clone, Copy, AsBytes, FromBytes)]
struct LogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

pub struct Log {
    start: u32,
    size: u32,
    dev: u32,
    outstanding: u32,
    committing: bool,
    lh: LogHeader,
}

impl Log {
    fn new(dev: u32, start: u32, size: u32) -> Self {
        let mut log = Self {
            start,
            size,
            dev,
            outstanding: 0,
            committing: false,
            lh: LogHeader::default(),
        };
        log.recover();
        log
    }

    fn recover(&mut self) {
        self.read_head();
        self.install_trans(true); // if committed, copy from log to disk
        self.lh.n = 0;
        self.write_head(); // clear the log
    }

    fn read_head(&mut self) {
        let buf = BCACHE.read(self.dev, self.start);
        self.lh
            .as_bytes_mut()
            .copy_from_slice(&buf[..core::mem::size_of::<LogHeader>()]);
    }

    /// Copy committed blocks from the log to their home location.
    fn install_trans(&self, recovering: bool) {
        for tail in 0..self.lh.n {
            let lbuf = BCACHE.read(self.dev, self.start + tail + 1); // log block
            let mut dbuf = BCACHE.read(self.dev, self.lh.block[tail as usize]); // home block
            dbuf.copy_from_slice(lbuf.deref());
            dbuf.write();
            if !recovering {
                BCACHE.unpin(&dbuf);
            }
        }
    }

    /// Write the in-memory header to disk. This is the point at which
    /// the transaction commits.
    fn write_head(&self) {
        let mut buf = BCACHE.read(self.dev, self.start);
        buf[..core::mem::size_of::<LogHeader>()].copy_from_slice(self.lh.as_bytes());
        buf.write();
    }

    /// Copy modified blocks from the cache to the log.
    fn write_log(&mut self) {
        for tail in 0..self.lh.n {
            let mut to = BCACHE.read(self.dev, self.start + tail + 1);
            let from = BCACHE.read(self.dev, self.lh.block[tail as usize]);
            to.copy_from_slice(from.deref());
            to.write();
        }
    }

    fn commit(&mut self) {
        if self.lh.n > 0 {
            self.write_log();
            self.write_head(); // the real commit point
            self.install_trans(false);
            self.lh.n = 0;
            self.write_head(); // clear the log
        }
    }
}

impl Mutex<Log> {
    /// Called at the start of each file-system operation. Blocks while
    /// a commit is in flight, or while this operation might exhaust
    /// the log's reserved space (`spec.md` §4.3 "Admission control").
    pub fn begin_op(&self) {
        let mut guard = self.lock();
        loop {
            if guard.committing {
                guard = guard.sleep(self as *const _ as usize, hal::scheduler());
            } else if guard.lh.n as usize + (guard.outstanding + 1) as usize * crate::param::MAXOPBLOCKS
                > LOGSIZE
            {
                guard = guard.sleep(self as *const _ as usize, hal::scheduler());
            } else {
                guard.outstanding += 1;
                break;
            }
        }
    }

    /// Called at the end of each file-system operation. Commits if
    /// this was the last outstanding operation.
    pub fn end_op(&self) {
        let mut to_commit: Option<*mut Log> = None;

        {
            let mut guard = self.lock();
            guard.outstanding -= 1;
            assert!(!guard.committing, "log: commit already in progress");
            if guard.outstanding == 0 {
                guard.committing = true;
                to_commit = Some(guard.deref_mut() as *mut Log);
            } else {
                // begin_op() may be waiting for log space, freed up
                // now that outstanding has decreased.
                hal::scheduler().wakeup(self as *const _ as usize);
            }
        }

        if let Some(log) = to_commit {
            // Commit without holding the lock: commit() does buffer
            // I/O that may park on a sleep lock, which this spin lock
            // must never be held across. Safe because `committing`
            // stays true until this call returns, so no other caller
            // can reach the log while this pointer is live.
            unsafe { (*log).commit() };
            let mut guard = self.lock();
            guard.committing = false;
            hal::scheduler().wakeup(self as *const _ as usize);
        }
    }

    /// Record that buffer `b` was modified as part of the current
    /// transaction, and pin it in the cache so it survives until
    /// commit installs it. Absorbs repeat writes to the same block
    /// within one transaction.
    pub fn write(&self, b: BufGuard) {
        let mut guard = self.lock();
        assert!(
            (guard.lh.n as usize) < LOGSIZE && guard.lh.n < guard.size - 1,
            "log: transaction too big"
        );
        assert!(guard.outstanding >= 1, "log: write outside of transaction");

        let blockno = b.blockno();
        if guard.lh.block[..guard.lh.n as usize].contains(&blockno) {
            return; // log absorption
        }
        let n = guard.lh.n as usize;
        guard.lh.block[n] = blockno;
        guard.lh.n += 1;
        BCACHE.pin(&b);
    }
}

pub fn init(dev: u32, log_start: u32, log_size: u32) {
    assert!(
        core::mem::size_of::<LogHeader>() <= crate::param::BSIZE,
        "initlog: log header too big for one block"
    );
    LOG.call_once(|| Mutex::new(Log::new(dev, log_start, log_size), "log"));
}

fn log() -> &'static Mutex<Log> {
    LOG.get().expect("log::init was never called")
}

pub fn begin_op() {
    log().begin_op();
}

pub fn end_op() {
    log().end_op();
}

pub fn write(b: BufGuard) {
    log().write(b);
}

#[cfg(test)]
mod tests {
    use crate::bio::BCACHE;
    use crate::param::ROOTDEV;

    #[test]
    fn write_inside_a_transaction_is_visible_after_end_op() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        let mut buf = BCACHE.read(ROOTDEV, 900);
        buf[0] = 0x7a;
        crate::log::write(buf);
        crate::log::end_op();

        assert_eq!(BCACHE.read(ROOTDEV, 900)[0], 0x7a);
    }

    #[test]
    fn repeat_writes_to_the_same_block_absorb_into_one_log_slot() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        for i in 0..5u8 {
            let mut buf = BCACHE.read(ROOTDEV, 901);
            buf[1] = i;
            crate::log::write(buf);
        }
        crate::log::end_op();

        assert_eq!(BCACHE.read(ROOTDEV, 901)[1], 4);
    }
}
