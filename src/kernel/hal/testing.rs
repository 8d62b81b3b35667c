//! In-memory stand-ins for the hardware this crate treats as external
//! (`spec.md` §6), used only by `#[cfg(test)]`. None of the five
//! retrieved repositories carry test harnesses of their own (see
//! `DESIGN.md`), so this module is grounded on the pack's general
//! `std`-backed testing idiom rather than on any one file: a
//! `Vec<[u8; BSIZE]>` behind a `std::sync::Mutex` plays the virtio
//! disk, an `AtomicU64` plays the CLINT tick counter, and a condvar
//! per wait-channel plays the process table's `sleep`/`wakeup`.

extern crate std;

use crate::hal::{BlockDevice, Clock, Scheduler};
use crate::param::BSIZE;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

pub struct MemDisk {
    blocks: Mutex<std::vec::Vec<[u8; BSIZE]>>,
}

impl MemDisk {
    pub fn new(nblocks: usize) -> Self {
        Self {
            blocks: Mutex::new(std::vec![[0u8; BSIZE]; nblocks]),
        }
    }
}

impl BlockDevice for MemDisk {
    fn read(&self, blockno: u32, buf: &mut [u8; BSIZE]) {
        let blocks = self.blocks.lock().unwrap();
        *buf = blocks[blockno as usize];
    }

    fn write(&self, blockno: u32, buf: &[u8; BSIZE]) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks[blockno as usize] = *buf;
    }
}

pub struct TickClock(AtomicU64);

impl TickClock {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Clock for TickClock {
    fn ticks(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct ThreadScheduler {
    channels: Mutex<HashMap<usize, std::sync::Arc<Condvar>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, chan: usize) -> std::sync::Arc<Condvar> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(chan)
            .or_insert_with(|| std::sync::Arc::new(Condvar::new()))
            .clone()
    }
}

impl Scheduler for ThreadScheduler {
    fn park(&self, chan: usize) {
        // Real parking would require the caller's guard; tests only
        // exercise this through MutexGuard::sleep, which re-acquires
        // its own lock right after this returns, so a short parked
        // wait guarded by a dummy mutex is enough to yield the thread.
        let cond = self.channel(chan);
        let lock = Mutex::new(());
        let guard = lock.lock().unwrap();
        let _ = cond
            .wait_timeout(guard, std::time::Duration::from_millis(50))
            .unwrap();
    }

    fn wakeup(&self, chan: usize) {
        self.channel(chan).notify_all();
    }
}

/// Format a fresh in-memory disk and mount it, once for the whole test
/// binary: `hal::init`'s `Once`s (and every other global singleton —
/// `spec.md` §5 "Shared-resource policy" — `SB`/`LOG`/`ITABLE`/`FTABLE`)
/// can only be set up a single time per process, so every `#[cfg(test)]`
/// module in this crate mounts the same disk rather than each minting
/// its own. Tests that need isolation from each other create their own
/// top-level directory off the root (`mkdir("/<test name>")`) instead of
/// reformatting.
///
/// The on-disk layout written here duplicates the private `DInode`/
/// `SuperBlock` record shapes from `fs::inode`/`fs::superblock` rather
/// than reaching into them: `mkfs` (a separate crate) has to do the same
/// duplication for the same reason (it writes the disk image before any
/// kernel exists to ask), so this mirrors that split instead of
/// threading a test-only back door through the production types.
pub fn mount() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        use zerocopy::AsBytes;

        use crate::param::{BSIZE, LOGSIZE, NDIRECT, ROOTDEV};
        use crate::stat::IType;

        #[repr(C)]
        #[derive(Default, Clone, Copy, AsBytes)]
        struct RawSuperBlock {
            magic: u32,
            size: u32,
            nblocks: u32,
            ninodes: u32,
            nlog: u32,
            logstart: u32,
            inodestart: u32,
            bmapstart: u32,
        }

        #[repr(C)]
        #[derive(Default, Clone, Copy, AsBytes)]
        struct RawDInode {
            itype: u16,
            major: u16,
            minor: u16,
            nlink: u16,
            size: u32,
            addrs: [u32; NDIRECT + 2],
        }

        const NINODES: u32 = 200;
        const TOTAL_BLOCKS: u32 = 2000;

        let ipb = (BSIZE / core::mem::size_of::<RawDInode>()) as u32;
        let ninodeblocks = NINODES / ipb + 1;
        let nlog = LOGSIZE as u32;
        let logstart = 2u32;
        let inodestart = logstart + nlog;
        let nbitmap = TOTAL_BLOCKS / (BSIZE as u32 * 8) + 1;
        let bmapstart = inodestart + ninodeblocks;
        let nmeta = bmapstart + nbitmap;

        let disk = std::boxed::Box::leak(std::boxed::Box::new(MemDisk::new(TOTAL_BLOCKS as usize)));
        let clock = std::boxed::Box::leak(std::boxed::Box::new(TickClock::new()));
        let scheduler = std::boxed::Box::leak(std::boxed::Box::new(ThreadScheduler::new()));
        crate::hal::init(disk, clock, scheduler);

        let sb = RawSuperBlock {
            magic: 0x10203040,
            size: TOTAL_BLOCKS,
            nblocks: TOTAL_BLOCKS - nmeta,
            ninodes: NINODES,
            nlog,
            logstart,
            inodestart,
            bmapstart,
        };
        let mut sb_block = [0u8; BSIZE];
        sb_block[..core::mem::size_of::<RawSuperBlock>()].copy_from_slice(sb.as_bytes());
        disk.write(1, &sb_block);

        // Log header block starts zeroed (no pending transaction),
        // which `MemDisk::new` already guarantees. The bitmap does not:
        // mark the boot/super/log/inode/bitmap blocks themselves as
        // allocated, or `balloc` would be free to hand block 1 (the
        // superblock) out as a content block the moment a test writes
        // a file.
        let mut bitmap_block = [0u8; BSIZE];
        for b in 0..nmeta as usize {
            bitmap_block[b / 8] |= 1 << (b % 8);
        }
        disk.write(bmapstart, &bitmap_block);

        let root = RawDInode {
            itype: IType::Dir as u16,
            nlink: 1,
            ..Default::default()
        };
        let mut inode_block = [0u8; BSIZE];
        inode_block[..core::mem::size_of::<RawDInode>()].copy_from_slice(root.as_bytes());
        disk.write(inodestart, &inode_block);

        crate::fs::init(ROOTDEV);

        crate::log::begin_op();
        let root = crate::fs::root();
        {
            let mut data = root.lock();
            crate::fs::dir::link(&mut data, ".", root.inum()).expect("mount: . entry");
            crate::fs::dir::link(&mut data, "..", root.inum()).expect("mount: .. entry");
        }
        crate::log::end_op();
    });
}
