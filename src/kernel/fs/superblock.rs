//! On-disk layout descriptor (`spec.md` §3): block counts and the
//! start of each region, read once from block 1 at mount time.
//!
//! Adapted from the teacher's `fs.rs::SuperBlock`. `bblock` here fixes
//! an off-by-shape bug in the teacher's version (`b + BPB +
//! bmapstart`, which indexes past the bitmap almost immediately) to
//! match the C original's `BBLOCK(b, sb) ((b)/BPB + sb.bmapstart)` —
//! see `DESIGN.md`.

use spin::Once;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::BCACHE;
use crate::param::BSIZE;

pub const FSMAGIC: u32 = 0x10203040;

/// Bitmap bits per block.
pub const BPB: u32 = (BSIZE * 8) as u32;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct SuperBlock {
    pub magic: u32,
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

impl SuperBlock {
    fn read(dev: u32) -> Self {
        let buf = BCACHE.read(dev, 1);
        let mut sb = SuperBlock::default();
        sb.as_bytes_mut()
            .copy_from_slice(&buf[..core::mem::size_of::<SuperBlock>()]);
        sb
    }

    /// Block containing inode `i`.
    pub fn iblock(&self, i: u32) -> u32 {
        i / super::inode::IPB as u32 + self.inodestart
    }

    /// Block of the free-bitmap containing the bit for block `b`.
    pub fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}

static SB: Once<SuperBlock> = Once::new();

pub(super) fn init(dev: u32) -> &'static SuperBlock {
    SB.call_once(|| {
        let sb = SuperBlock::read(dev);
        assert_eq!(sb.magic, FSMAGIC, "invalid file system");
        sb
    })
}

pub fn sb() -> &'static SuperBlock {
    SB.get().expect("fs::init was never called")
}
