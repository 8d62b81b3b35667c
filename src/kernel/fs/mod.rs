//! The file-system core (`spec.md` §4): on-disk layout, block
//! allocation, the in-memory inode table, directory contents, and path
//! resolution, layered on top of [`crate::bio`] and [`crate::log`].

pub mod balloc;
pub mod dir;
pub mod inode;
pub mod path;
pub mod superblock;

pub use inode::{Inode, InodeGuard};
pub use path::{create, link, namei, namei_nofollow, nameiparent, symlink, unlink};
pub use superblock::sb;

use crate::param::ROOTDEV;

/// Mount device `dev`: read its superblock, initialize the log (which
/// replays any pending transaction), and prepare the inode table.
pub fn init(dev: u32) {
    let sb = superblock::init(dev);
    crate::log::init(dev, sb.logstart, sb.nlog);
    inode::init();
}

/// The root directory inode, opened fresh from the table.
pub fn root() -> Inode {
    inode::iget(ROOTDEV, crate::param::ROOTINO)
}
