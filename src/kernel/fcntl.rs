//! Open-flag bits (`spec.md` §6). The teacher's `fcntl.rs` models this
//! as a builder-pattern `OpenOptions` struct; `bitflags` is already in
//! the dependency stack (the teacher itself reaches for it elsewhere),
//! so flags are modeled as a bitset here instead, matching the
//! wire-level "flag bits on open" language in the spec more directly
//! and giving callers `|` composition for free.

use bitflags::bitflags;

bitflags! {
    #[derive(Default)]
    pub struct OpenFlags: u32 {
        const WRONLY   = 0x001;
        const RDWR     = 0x002;
        const CREATE   = 0x200;
        const TRUNC    = 0x400;
        const NOFOLLOW = 0x800;
    }
}

impl OpenFlags {
    /// `RDONLY` is the all-zero access mode, so it is not a flag bit.
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn is_read(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    pub fn is_write(self) -> bool {
        self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }

    pub fn is_create(self) -> bool {
        self.contains(OpenFlags::CREATE)
    }

    pub fn is_trunc(self) -> bool {
        self.contains(OpenFlags::TRUNC)
    }

    pub fn is_nofollow(self) -> bool {
        self.contains(OpenFlags::NOFOLLOW)
    }
}
