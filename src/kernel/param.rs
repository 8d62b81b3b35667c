// Compile-time sizing for the file system core.

pub const BSIZE: usize = 1024; // block size
pub const ROOTDEV: u32 = 1; // device number of file system root disk
pub const ROOTINO: u32 = 1; // root inode number

pub const NDIRECT: usize = 11;
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>(); // 256
pub const NDOUBLY_INDIRECT: usize = NINDIRECT * NINDIRECT;
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NDOUBLY_INDIRECT;

pub const DIRSIZ: usize = 14; // max length of a path component
pub const MAXPATH: usize = 128; // max length of a full path
pub const MAXSYMLINKS: usize = 10; // symlink chase depth before ELOOP

pub const NBUF: usize = 30; // size of the buffer cache
pub const NBUCKET: usize = 13; // buffer cache hash buckets, see bio.rs

pub const LOGSIZE: usize = 30; // max data blocks in on-disk log
pub const MAXOPBLOCKS: usize = 10; // max distinct blocks written per fs op

pub const NINODE: usize = 50; // max number of active in-memory inodes
pub const NFILE: usize = 100; // max number of open files in the whole system
pub const NDEV: usize = 10; // max number of major device numbers
