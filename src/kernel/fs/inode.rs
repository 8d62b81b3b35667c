//! In-memory inode table and per-inode content operations
//! (`spec.md` §4.4): allocation, locking, `bmap`'s block-address
//! translation (direct, single-indirect, double-indirect), truncation,
//! and `readi`/`writei`.
//!
//! Adapted from the teacher's `fs.rs` (`ITable`/`MInode`/`IData`). The
//! teacher's own `bmap`/`trunc` only implement the single-indirect
//! case (`NDIRECT=12`); the double-indirect tier here is grounded on
//! `examples/original_source/kernel/fs.c`'s `bmap`/`itrunc` instead,
//! adapted into `Result`-returning, no-raw-pointer Rust, and fixing an
//! out-of-bounds slot index present in that C original (`addrs[NDIRECT
//! + NINDIRECT]`, which overflows the 13-element `addrs` array — this
//! uses `addrs[NDIRECT + 1]`, the correct double-indirect slot; see
//! `DESIGN.md`). `readi`/`writei` copy through [`CopyIn`]/[`CopyOut`]
//! instead of the teacher's page-table-bound `VirtAddr`.

use alloc::sync::Arc;
use core::ops::Deref;
use zerocopy::{AsBytes, FromBytes};

use crate::array;
use crate::bio::BCACHE;
use crate::copy::{CopyIn, CopyOut};
use crate::error::{Error, Result};
use crate::file::Major;
use crate::fs_panic;
use crate::log;
use crate::param::{BSIZE, MAXFILE, NDIRECT, NINDIRECT, NINODE};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::stat::{IType, Stat};

use super::balloc::{balloc, bfree};
use super::superblock::sb;

/// On-disk inodes per block.
pub const IPB: usize = BSIZE / core::mem::size_of::<DInode>();

/// On-disk inode record. `itype`/`major` are stored as raw integers
/// rather than the enum types so the struct stays a plain zerocopy
/// target; [`IType::from_u16`]/[`Major::from_u16`] translate at the
/// in-memory boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
struct DInode {
    itype: u16,
    major: u16,
    minor: u16,
    nlink: u16,
    size: u32,
    addrs: [u32; NDIRECT + 2],
}

static ITABLE: Mutex<[Option<Arc<MInode>>; NINODE]> = Mutex::new(array![None; NINODE], "itable");

/// A reference-counted handle to an in-memory inode table entry.
/// Dropping the last handle returns the slot to the table (and, if the
/// on-disk link count is also zero, frees the inode's content).
#[derive(Clone, Default)]
pub struct Inode {
    ip: Option<Arc<MInode>>,
}

pub struct MInode {
    dev: u32,
    inum: u32,
    data: SleepLock<IData>,
}

#[derive(Default)]
pub struct IData {
    dev: u32,
    inum: u32,
    valid: bool,
    itype: IType,
    major: Major,
    minor: u16,
    nlink: u16,
    size: u32,
    addrs: [u32; NDIRECT + 2],
}

impl IData {
    fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            ..Default::default()
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    pub fn itype(&self) -> IType {
        self.itype
    }

    pub fn set_itype(&mut self, itype: IType) {
        self.itype = itype;
    }

    pub fn major(&self) -> Major {
        self.major
    }

    pub fn set_major_minor(&mut self, major: u16, minor: u16) {
        self.major = Major::from_u16(major);
        self.minor = minor;
    }

    pub fn nlink(&self) -> u16 {
        self.nlink
    }

    pub fn set_nlink(&mut self, nlink: u16) {
        self.nlink = nlink;
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Flush this inode's in-memory fields to its on-disk slot. Must
    /// be called after every change to a field that lives on disk.
    pub fn update(&self) {
        let mut buf = BCACHE.read(self.dev, sb().iblock(self.inum));
        let off = (self.inum as usize % IPB) * core::mem::size_of::<DInode>();
        let dip = DInode {
            itype: self.itype as u16,
            major: self.major as u16,
            minor: self.minor,
            nlink: self.nlink,
            size: self.size,
            addrs: self.addrs,
        };
        buf[off..off + core::mem::size_of::<DInode>()].copy_from_slice(dip.as_bytes());
        log::write(buf);
    }

    /// Discard this inode's content, freeing every block it owns.
    pub fn truncate(&mut self) {
        for addr in self.addrs.iter_mut().take(NDIRECT) {
            if *addr > 0 {
                bfree(self.dev, *addr);
                *addr = 0;
            }
        }

        if self.addrs[NDIRECT] > 0 {
            free_indirect(self.dev, self.addrs[NDIRECT]);
            bfree(self.dev, self.addrs[NDIRECT]);
            self.addrs[NDIRECT] = 0;
        }

        if self.addrs[NDIRECT + 1] > 0 {
            let dbuf = BCACHE.read(self.dev, self.addrs[NDIRECT + 1]);
            for i in 0..NINDIRECT {
                let addr = read_u32(&dbuf, i);
                if addr > 0 {
                    free_indirect(self.dev, addr);
                    bfree(self.dev, addr);
                }
            }
            drop(dbuf);
            bfree(self.dev, self.addrs[NDIRECT + 1]);
            self.addrs[NDIRECT + 1] = 0;
        }

        self.size = 0;
        self.update();
    }

    /// Return the disk block address of the `bn`th block of this
    /// inode's content, allocating one (and any indirect blocks
    /// needed to address it) if it doesn't exist yet.
    fn bmap(&mut self, bn: usize) -> Result<u32> {
        if bn >= MAXFILE {
            return Err(Error::FileTooLarge);
        }

        if bn < NDIRECT {
            if self.addrs[bn] == 0 {
                self.addrs[bn] = balloc(self.dev);
            }
            return Ok(self.addrs[bn]);
        }
        let bn = bn - NDIRECT;

        if bn < NINDIRECT {
            return Ok(self.bmap_via(NDIRECT, bn));
        }
        let bn = bn - NINDIRECT;
        debug_assert!(bn < NINDIRECT * NINDIRECT);

        let outer = bn / NINDIRECT;
        let inner = bn % NINDIRECT;
        let second_level = self.bmap_via(NDIRECT + 1, outer);
        Ok(bmap_slot(self.dev, second_level, inner))
    }

    /// Resolve (allocating if necessary) the `idx`th pointer stored in
    /// the indirect block named by `self.addrs[slot]`, allocating that
    /// indirect block itself first if needed.
    fn bmap_via(&mut self, slot: usize, idx: usize) -> u32 {
        if self.addrs[slot] == 0 {
            self.addrs[slot] = balloc(self.dev);
        }
        bmap_slot(self.dev, self.addrs[slot], idx)
    }

    /// Copy stat metadata from this inode.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev,
            ino: self.inum,
            itype: self.itype,
            nlink: self.nlink,
            size: self.size as usize,
        }
    }

    pub fn readi(&mut self, mut dst: CopyOut<'_>, off: usize, n: usize) -> Result<usize> {
        if off > self.size as usize {
            return Ok(0);
        }
        let n = if off + n > self.size as usize {
            self.size as usize - off
        } else {
            n
        };

        let mut tot = 0;
        while tot < n {
            let bno = self.bmap((off + tot) / BSIZE)?;
            let buf = BCACHE.read(self.dev, bno);
            let boff = (off + tot) % BSIZE;
            let m = core::cmp::min(n - tot, BSIZE - boff);
            dst.put(tot, &buf[boff..boff + m]).map_err(|_| Error::InvalidArgument)?;
            tot += m;
        }
        Ok(tot)
    }

    pub fn writei(&mut self, src: CopyIn<'_>, off: usize, n: usize) -> Result<usize> {
        if off > self.size as usize {
            return Err(Error::InvalidArgument);
        }
        if off + n > MAXFILE * BSIZE {
            return Err(Error::FileTooLarge);
        }

        let mut tot = 0;
        while tot < n {
            let bno = self.bmap((off + tot) / BSIZE)?;
            let mut buf = BCACHE.read(self.dev, bno);
            let boff = (off + tot) % BSIZE;
            let m = core::cmp::min(n - tot, BSIZE - boff);
            src.get(tot, &mut buf[boff..boff + m]).map_err(|_| Error::InvalidArgument)?;
            tot += m;
            log::write(buf);
        }

        if off + tot > self.size as usize {
            self.size = (off + tot) as u32;
        }
        // Write back even if size didn't change: bmap() may have
        // allocated new blocks into self.addrs[] above.
        self.update();

        Ok(tot)
    }
}

fn read_u32(buf: &[u8; BSIZE], idx: usize) -> u32 {
    u32::from_ne_bytes(buf[idx * 4..idx * 4 + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8; BSIZE], idx: usize, val: u32) {
    buf[idx * 4..idx * 4 + 4].copy_from_slice(&val.to_ne_bytes());
}

/// Resolve (allocating if necessary) the `idx`th `u32` pointer stored
/// in indirect block `block`.
fn bmap_slot(dev: u32, block: u32, idx: usize) -> u32 {
    let mut buf = BCACHE.read(dev, block);
    let addr = read_u32(&buf, idx);
    if addr != 0 {
        return addr;
    }
    let addr = balloc(dev);
    write_u32(&mut buf, idx, addr);
    log::write(buf);
    addr
}

fn free_indirect(dev: u32, block: u32) {
    let buf = BCACHE.read(dev, block);
    for i in 0..NINDIRECT {
        let addr = read_u32(&buf, i);
        if addr != 0 {
            bfree(dev, addr);
        }
    }
}

impl MInode {
    fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            data: SleepLock::new(IData::new(dev, inum), "inode"),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    /// Lock the inode, reading it from disk first if this is the
    /// first caller to touch it since it entered the table.
    pub fn lock(&self) -> SleepLockGuard<'_, IData> {
        let mut guard = self.data.lock();
        if !guard.valid {
            let buf = BCACHE.read(self.dev, sb().iblock(self.inum));
            let off = (self.inum as usize % IPB) * core::mem::size_of::<DInode>();
            let dip = DInode::read_from(&buf[off..off + core::mem::size_of::<DInode>()])
                .expect("inode block too small");
            guard.itype = IType::from_u16(dip.itype);
            guard.major = Major::from_u16(dip.major);
            guard.minor = dip.minor;
            guard.nlink = dip.nlink;
            guard.size = dip.size;
            guard.addrs = dip.addrs;
            drop(buf);
            guard.valid = true;
            guard.dev = self.dev;
            guard.inum = self.inum;
            if guard.itype == IType::None {
                fs_panic!("ilock: no type");
            }
        }
        guard
    }
}

impl Inode {
    fn new(ip: Arc<MInode>) -> Self {
        Self { ip: Some(ip) }
    }

    pub fn dup(&self) -> Self {
        Self { ip: self.ip.clone() }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, IData> {
        self.ip.as_ref().unwrap().lock()
    }

    pub fn dev(&self) -> u32 {
        self.ip.as_ref().unwrap().dev()
    }

    pub fn inum(&self) -> u32 {
        self.ip.as_ref().unwrap().inum()
    }
}

impl Deref for Inode {
    type Target = MInode;
    fn deref(&self) -> &Self::Target {
        self.ip.as_ref().unwrap()
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        if let Some(ip) = self.ip.take() {
            put(ip);
        }
    }
}

/// Allocate an inode on `dev` of type `itype`. Returns an unlocked but
/// allocated and referenced inode. Must be called inside a transaction.
pub fn ialloc(dev: u32, itype: IType) -> Result<Inode> {
    let sb = sb();
    for inum in 1..sb.ninodes {
        let mut buf = BCACHE.read(dev, sb.iblock(inum));
        let off = (inum as usize % IPB) * core::mem::size_of::<DInode>();
        let existing =
            DInode::read_from(&buf[off..off + core::mem::size_of::<DInode>()]).unwrap();
        if IType::from_u16(existing.itype) == IType::None {
            let dip = DInode {
                itype: itype as u16,
                ..Default::default()
            };
            buf[off..off + core::mem::size_of::<DInode>()].copy_from_slice(dip.as_bytes());
            log::write(buf);
            return Ok(iget(dev, inum));
        }
    }
    Err(Error::NoInodes)
}

/// Find the in-memory copy of inode `inum` on `dev`, allocating a
/// table entry for it if one doesn't already exist. Does not lock or
/// read it from disk.
pub fn iget(dev: u32, inum: u32) -> Inode {
    let mut guard = ITABLE.lock();

    let mut empty: Option<usize> = None;
    for (i, slot) in guard.iter().enumerate() {
        match slot {
            Some(mip) if mip.dev == dev && mip.inum == inum => {
                return Inode::new(Arc::clone(mip));
            }
            None if empty.is_none() => empty = Some(i),
            _ => (),
        }
    }

    let i = empty.unwrap_or_else(|| fs_panic!("iget: no inodes"));
    let ip = Arc::new(MInode::new(dev, inum));
    guard[i] = Some(Arc::clone(&ip));
    Inode::new(ip)
}

/// Drop a reference to an in-memory inode. If that was the last
/// reference and the inode has no on-disk links, free its content.
/// Must be called inside a transaction.
fn put(inode: Arc<MInode>) {
    let guard = ITABLE.lock();

    if Arc::strong_count(&inode) == 2 {
        // No other caller can have this inode sleep-locked: the table
        // and this `Arc` are the only two references.
        let mut idata = inode.data.lock();
        let table = Mutex::unlock(guard);

        if idata.valid && idata.nlink == 0 {
            idata.truncate();
            idata.itype = IType::None;
            idata.update();
            idata.valid = false;
        }

        let mut guard = table.lock();
        for slot in guard.iter_mut() {
            if matches!(slot, Some(mip) if Arc::ptr_eq(mip, &inode)) {
                slot.take();
            }
        }
    }
}

pub(super) fn init() {}

pub type InodeGuard<'a> = SleepLockGuard<'a, IData>;
