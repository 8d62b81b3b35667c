//! Buffer cache: one in-memory copy per disk block, shared by every
//! caller that names the same `(dev, blockno)` pair, with a bounded
//! pool and LRU eviction (`spec.md` §4).
//!
//! The teacher's own `bio.rs` keeps a single global MRU list behind
//! `Rc`/`RefCell`/`Weak`. That doesn't scale the way `spec.md` §4.1-4.2
//! asks (sharded buckets, an eviction lock, at most two bucket locks
//! held at once), so this is grounded instead on the C original's
//! `bio.c`: `NBUCKET` hash buckets, each an independent spin lock
//! guarding a small `Vec` of buffer metadata, plus one global
//! `evict_lock` serializing the cross-bucket LRU scan. Buffer *contents*
//! stay behind the teacher's `SleepLock`, since disk I/O may block.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use crate::array;
use crate::fs_panic;
use crate::hal;
use crate::param::{BSIZE, NBUCKET, NBUF};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::{Mutex, MutexGuard};

fn hash(blockno: u32) -> usize {
    blockno as usize % NBUCKET
}

pub static BCACHE: BCache = BCache::new();

/// Per-block state protected by a bucket's spin lock: which buffer
/// slot holds this block, how many live [`BufGuard`]s reference it,
/// and (only meaningful once `refcnt` drops to zero) the tick it was
/// last released at, for LRU victim selection.
struct BufMeta {
    idx: usize,
    dev: u32,
    blockno: u32,
    refcnt: u32,
    last_use: u64,
}

struct Bucket {
    entries: Mutex<Vec<BufMeta>>,
}

pub struct BufData {
    data: [u8; BSIZE],
    valid: bool,
}

pub struct BCache {
    buf: [SleepLock<BufData>; NBUF],
    buckets: [Bucket; NBUCKET],
    // Serializes the cross-bucket LRU scan so at most one caller at a
    // time is evicting, even though the per-bucket locks alone are
    // dropped and reacquired repeatedly during that scan.
    evict_lock: Mutex<()>,
}

pub struct BufGuard {
    dev: u32,
    blockno: u32,
    idx: usize,
    data: Option<SleepLockGuard<'static, BufData>>,
}

impl BufData {
    const fn new() -> Self {
        Self {
            data: [0; BSIZE],
            valid: false,
        }
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Bucket {
    const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new(), "bcache bucket"),
        }
    }
}

impl BCache {
    const fn new() -> Self {
        Self {
            buf: array![SleepLock::new(BufData::new(), "buffer"); NBUF],
            buckets: array![Bucket::new(); NBUCKET],
            evict_lock: Mutex::new((), "bcache evict"),
        }
    }

    /// Look through the buffer cache for `(dev, blockno)`. If not
    /// found, recycle the least-recently-used unused buffer. Either
    /// way, return it locked (`spec.md` §4.1 "Acquire").
    fn get(&self, dev: u32, blockno: u32) -> BufGuard {
        let idx = hash(blockno);

        {
            let mut bucket = self.buckets[idx].entries.lock();
            if let Some(meta) = bucket.iter_mut().find(|m| m.dev == dev && m.blockno == blockno) {
                meta.refcnt += 1;
                let buf_idx = meta.idx;
                drop(bucket);
                return BufGuard {
                    dev,
                    blockno,
                    idx: buf_idx,
                    data: Some(self.buf[buf_idx].lock()),
                };
            }
        }

        // Not cached: serialize eviction so at most one caller walks
        // the buckets at a time, then re-check the target bucket in
        // case another caller raced us in and cached it first.
        let evict = self.evict_lock.lock();

        {
            let mut bucket = self.buckets[idx].entries.lock();
            if let Some(meta) = bucket.iter_mut().find(|m| m.dev == dev && m.blockno == blockno) {
                meta.refcnt += 1;
                let buf_idx = meta.idx;
                drop(bucket);
                drop(evict);
                return BufGuard {
                    dev,
                    blockno,
                    idx: buf_idx,
                    data: Some(self.buf[buf_idx].lock()),
                };
            }
        }

        // Recycle the least-recently-used unused buffer. `evict_lock`
        // already serializes eviction against every other caller on
        // this path. Hold at most two bucket locks at once: the
        // bucket currently being scanned, and the bucket owning the
        // current best candidate, carried forward across iterations
        // (not re-acquired) so the winner can't be raced between
        // selection and removal — matching the C original's `bget`.
        let mut best: Option<(usize, usize, u64)> = None; // (bucket, pos, last_use)
        let mut best_guard: Option<MutexGuard<'_, Vec<BufMeta>>> = None;

        for i in 0..NBUCKET {
            let guard = self.buckets[i].entries.lock();
            let candidate = guard
                .iter()
                .enumerate()
                .filter(|(_, m)| m.refcnt == 0)
                .min_by_key(|(_, m)| m.last_use)
                .map(|(pos, m)| (pos, m.last_use));

            if let Some((pos, last_use)) = candidate {
                let better = best.map_or(true, |(_, _, best_use)| last_use < best_use);
                if better {
                    // Replacing `best_guard` drops the previous
                    // winner's (now losing) bucket lock right here.
                    best = Some((i, pos, last_use));
                    best_guard = Some(guard);
                }
                // Otherwise `guard` drops at the end of this iteration.
            }
        }

        let (_, victim_pos, _) = match best {
            Some(v) => v,
            None => fs_panic!("bget: no buffers"),
        };
        let mut bucket = best_guard.expect("best is Some iff best_guard is Some");
        let mut meta = bucket.remove(victim_pos);
        debug_assert_eq!(meta.refcnt, 0);
        let buf_idx = meta.idx;
        meta.dev = dev;
        meta.blockno = blockno;
        meta.refcnt = 1;
        drop(bucket);

        self.buckets[idx].entries.lock().push(meta);
        drop(evict);

        let mut data = self.buf[buf_idx].lock();
        data.valid = false;
        BufGuard {
            dev,
            blockno,
            idx: buf_idx,
            data: Some(data),
        }
    }

    /// Return a locked buffer with the contents of `blockno`, reading
    /// it from disk first if this is the first caller to touch it.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard {
        let mut b = self.get(dev, blockno);
        if !b.data.as_ref().unwrap().valid {
            hal::block_device().read(blockno, &mut b.data.as_mut().unwrap().data);
            b.data.as_mut().unwrap().valid = true;
        }
        b
    }

    /// Increment a buffer's reference count without taking its sleep
    /// lock, keeping it resident across a log commit (`spec.md` §4.3).
    pub fn pin(&self, b: &BufGuard) {
        let idx = hash(b.blockno);
        let mut bucket = self.buckets[idx].entries.lock();
        let meta = bucket
            .iter_mut()
            .find(|m| m.idx == b.idx)
            .expect("pin: buffer not in its home bucket");
        meta.refcnt += 1;
    }

    pub fn unpin(&self, b: &BufGuard) {
        let idx = hash(b.blockno);
        let mut bucket = self.buckets[idx].entries.lock();
        let meta = bucket
            .iter_mut()
            .find(|m| m.idx == b.idx)
            .expect("unpin: buffer not in its home bucket");
        debug_assert!(meta.refcnt > 0);
        meta.refcnt -= 1;
    }
}

impl BufGuard {
    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// Write this buffer's contents to disk. Caller must hold the
    /// buffer's sleep lock, which the guard's existence guarantees.
    pub fn write(&mut self) {
        let data = self.data.as_mut().unwrap();
        hal::block_device().write(self.blockno, &data.data);
    }
}

impl Deref for BufGuard {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        &self.data.as_ref().unwrap().data
    }
}

impl DerefMut for BufGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data.as_mut().unwrap().data
    }
}

impl Drop for BufGuard {
    fn drop(&mut self) {
        let idx = hash(self.blockno);
        let mut bucket = BCACHE.buckets[idx].entries.lock();
        self.data.take(); // release the sleep lock first
        let meta = bucket
            .iter_mut()
            .find(|m| m.idx == self.idx)
            .expect("brelse: buffer not in its home bucket");
        meta.refcnt -= 1;
        if meta.refcnt == 0 {
            meta.last_use = hal::clock().ticks();
        }
    }
}

/// Seed every buffer slot into bucket 0 as the initial free pool, the
/// same boot-time layout as the C original's `binit`: every buffer
/// starts unused (`refcnt == 0`) and gets relocated to its proper
/// bucket the first time it is recycled for a real block.
pub fn init() {
    let mut bucket0 = BCACHE.buckets[0].entries.lock();
    for i in 0..NBUF {
        bucket0.push(BufMeta {
            idx: i,
            dev: 0,
            blockno: 0,
            refcnt: 0,
            last_use: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ROOTDEV;

    #[test]
    fn two_handles_to_the_same_block_share_one_buffer() {
        crate::hal::testing::mount();

        let mut a = BCACHE.read(ROOTDEV, 950);
        a[0] = 0xab;
        let b = BCACHE.read(ROOTDEV, 950);
        assert_eq!(b[0], 0xab);
    }

    #[test]
    fn write_persists_across_eviction() {
        crate::hal::testing::mount();

        let mut buf = BCACHE.read(ROOTDEV, 960);
        buf[0] = 0x42;
        buf.write();
        drop(buf);

        // Touch more distinct blocks than NBUF holds so the cache must
        // recycle the now-unreferenced entry for block 960.
        for bn in 970..970 + NBUF as u32 + 5 {
            drop(BCACHE.read(ROOTDEV, bn));
        }

        assert_eq!(BCACHE.read(ROOTDEV, 960)[0], 0x42);
    }
}
