//! Path resolution (`spec.md` §4.5): turning a `/`-separated string
//! into an inode, following symlinks as it goes.
//!
//! Adapted from the teacher's `fs.rs::Path`/`namex`. The teacher reaches
//! into `CPUS.my_proc().cwd` for a relative start and a `my_proc()`-bound
//! process table for symlink bookkeeping; with no process table in
//! scope, every entry point here takes the starting directory as an
//! explicit argument, and the teacher's `#[repr(transparent)] Path { str
//! }` newtype is dropped in favor of plain `&str` plus free functions —
//! the newtype only bought method syntax over an unsafe cast with no
//! functional benefit (see `DESIGN.md`).

use crate::error::{Error, Result};
use crate::param::{MAXSYMLINKS, ROOTDEV, ROOTINO};
use crate::stat::IType;

use super::dir;
use super::inode::{self, Inode};

/// Split the first path element off `path`. Returns `(element, rest)`;
/// `rest` still begins with any leading slash trimmed for the next call.
/// Leading slashes before the first element are skipped.
fn skip_elem(path: &str) -> (Option<&str>, &str) {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return (None, path);
    }
    match path.find('/') {
        Some(i) => (Some(&path[..i]), &path[i..]),
        None => (Some(path), ""),
    }
}

fn root() -> Inode {
    inode::iget(ROOTDEV, ROOTINO)
}

/// Resolve the target of a symlink inode, chasing further symlinks as
/// needed. `dir` is the directory that contained the symlink, used as
/// the resolution root for a relative target.
fn resolve_symlink(mut ip: Inode, dir: &Inode, depth: &mut usize) -> Result<Inode> {
    loop {
        *depth += 1;
        if *depth > MAXSYMLINKS {
            return Err(Error::TooManySymlinks);
        }

        let mut buf = [0u8; crate::param::MAXPATH];
        let n = {
            let mut data = ip.lock();
            if data.itype() != IType::Symlink {
                drop(data);
                return Ok(ip);
            }
            let n = data
                .readi(crate::copy::CopyOut::Kernel(&mut buf), 0, buf.len())
                .map_err(|_| Error::NotFound)?;
            n
        };
        let target = core::str::from_utf8(&buf[..n]).map_err(|_| Error::NotFound)?;

        let start = if target.starts_with('/') { root() } else { dir.dup() };
        let (_, resolved) = namex_inner(target, &start, false, false, depth)?;
        ip = resolved;
    }
}

/// Core path walk. Returns the final path element (unresolved, for
/// `parent` callers) and the inode it names.
///
/// `parent`: stop one component short and return the parent directory.
/// `nofollow`: if the final component is a symlink, return it unresolved
/// rather than chasing it (intermediate components are always chased).
fn namex_inner<'a>(
    path: &'a str,
    start: &Inode,
    parent: bool,
    nofollow: bool,
    depth: &mut usize,
) -> Result<(&'a str, Inode)> {
    let mut ip = if path.starts_with('/') { root() } else { start.dup() };

    let (mut elem, mut rest) = skip_elem(path);
    if elem.is_none() {
        // Empty path names the starting directory itself.
        return Ok(("", ip));
    }

    loop {
        let name = elem.unwrap();

        {
            let data = ip.lock();
            if data.itype() != IType::Dir {
                return Err(Error::NotADirectory);
            }
        }

        let (next_elem, next_rest) = skip_elem(rest);
        let last = next_elem.is_none();

        if parent && last {
            return Ok((name, ip));
        }

        let mut data = ip.lock();
        let found = dir::lookup_inode(&ip, &mut data, name);
        drop(data);
        let next = match found {
            Some(next) => next,
            None => return Err(Error::NotFound),
        };

        // Intermediate components are always chased through a symlink;
        // the final component is chased unless the caller asked not to.
        let containing_dir = ip;
        let mut resolved = next;
        if !last || !nofollow {
            let itype = resolved.lock().itype();
            if itype == IType::Symlink {
                resolved = resolve_symlink(resolved, &containing_dir, depth)?;
            }
        }
        drop(containing_dir);
        ip = resolved;

        if last {
            return Ok((name, ip));
        }

        elem = next_elem;
        rest = next_rest;
    }
}

/// Resolve `path` to an inode, following a symlink in the final
/// component.
pub fn namei(path: &str, start: &Inode) -> Result<Inode> {
    let mut depth = 0;
    namex_inner(path, start, false, false, &mut depth).map(|(_, ip)| ip)
}

/// Resolve `path` to an inode, without following a symlink that names
/// the final component.
pub fn namei_nofollow(path: &str, start: &Inode) -> Result<Inode> {
    let mut depth = 0;
    namex_inner(path, start, false, true, &mut depth).map(|(_, ip)| ip)
}

/// Resolve `path`'s parent directory, returning it along with the
/// unresolved final component name.
pub fn nameiparent<'a>(path: &'a str, start: &Inode) -> Result<(&'a str, Inode)> {
    let mut depth = 0;
    let (name, ip) = namex_inner(path, start, true, false, &mut depth)?;
    if name.len() > crate::param::DIRSIZ {
        return Err(Error::NameTooLong);
    }
    Ok((name, ip))
}

/// Create `path` as a new inode of type `itype` (used by `mkdir`,
/// `mknod`, `symlink`, and `open` with the create flag). Must run
/// inside a log transaction. If `path` already names a plain file and
/// `itype` is `File`, the existing inode is returned instead of an
/// error, matching `open(..., O_CREATE)` without `O_EXCL`.
pub fn create(path: &str, start: &Inode, itype: IType, major: u16, minor: u16) -> Result<Inode> {
    let (name, dp) = nameiparent(path, start)?;
    let mut dpdata = dp.lock();

    if let Some(ip) = dir::lookup_inode(&dp, &mut dpdata, name) {
        drop(dpdata);
        let existing = ip.lock().itype();
        if itype == IType::File && matches!(existing, IType::File | IType::Device) {
            return Ok(ip);
        }
        return Err(Error::FileExists);
    }
    drop(dpdata);

    let ip = inode::ialloc(dp.dev(), itype)?;
    {
        let mut idata = ip.lock();
        idata.set_major_minor(major, minor);
        idata.set_nlink(1);
        idata.update();

        if itype == IType::Dir {
            // Two inode sleep-locks are safe here: `ip` was just
            // allocated and is not yet reachable by any other thread.
            dir::link(&mut idata, ".", ip.inum()).expect("create: . entry");
            dir::link(&mut idata, "..", dp.inum()).expect("create: .. entry");
        }
    }

    let mut dpdata = dp.lock();
    dir::link(&mut dpdata, name, ip.inum())?;
    if itype == IType::Dir {
        dpdata.set_nlink(dpdata.nlink() + 1);
        dpdata.update();
    }

    Ok(ip)
}

/// Add a new name `newpath` for the inode named by `oldpath`. Must run
/// inside a log transaction.
pub fn link(oldpath: &str, newpath: &str, start: &Inode) -> Result<()> {
    let ip = namei(oldpath, start)?;
    {
        let data = ip.lock();
        if data.itype() == IType::Dir {
            return Err(Error::IsADirectory);
        }
    }

    let (name, dp) = nameiparent(newpath, start)?;
    if dp.dev() != ip.dev() {
        return Err(Error::CrossDevice);
    }

    let mut idata = ip.lock();
    idata.set_nlink(idata.nlink() + 1);
    idata.update();
    drop(idata);

    let mut dpdata = dp.lock();
    if let Err(e) = dir::link(&mut dpdata, name, ip.inum()) {
        drop(dpdata);
        let mut idata = ip.lock();
        idata.set_nlink(idata.nlink() - 1);
        idata.update();
        return Err(e);
    }
    Ok(())
}

/// Remove the name `path` from its parent directory, freeing the
/// target inode's content once its last link and last reference are
/// both gone. Must run inside a log transaction.
pub fn unlink(path: &str, start: &Inode) -> Result<()> {
    let (name, dp) = nameiparent(path, start)?;
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument);
    }

    let mut dpdata = dp.lock();
    let (inum, off) = dir::lookup(&mut dpdata, name).ok_or(Error::NotFound)?;
    let ip = inode::iget(dp.dev(), inum);
    let mut idata = ip.lock();

    if idata.nlink() < 1 {
        crate::fs_panic!("unlink: nlink < 1");
    }
    if idata.itype() == IType::Dir && !dir::is_empty(&mut idata) {
        return Err(Error::DirNotEmpty);
    }

    dir::clear_entry(&mut dpdata, off);
    if idata.itype() == IType::Dir {
        dpdata.set_nlink(dpdata.nlink() - 1);
        dpdata.update();
    }
    drop(dpdata);

    idata.set_nlink(idata.nlink() - 1);
    idata.update();
    Ok(())
}

/// Create a symlink at `path` whose content is `target`. Must run
/// inside a log transaction.
pub fn symlink(target: &str, path: &str, start: &Inode) -> Result<()> {
    let ip = create(path, start, IType::Symlink, 0, 0)?;
    let mut data = ip.lock();
    data.writei(crate::copy::CopyIn::Kernel(target.as_bytes()), 0, target.len())
        .map_err(|_| Error::FileTooLarge)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_namei_resolves_a_nested_path() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        let root = super::root();
        create("/path_nested/leaf", &root, IType::File, 0, 0).unwrap();
        let found = namei("/path_nested/leaf", &root).unwrap();
        assert_eq!(found.lock().itype(), IType::File);
        crate::log::end_op();
    }

    #[test]
    fn create_existing_file_returns_the_same_inode_without_o_excl() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        let root = super::root();
        let first = create("/path_create_twice", &root, IType::File, 0, 0).unwrap();
        let second = create("/path_create_twice", &root, IType::File, 0, 0).unwrap();
        assert_eq!(first.inum(), second.inum());
        crate::log::end_op();
    }

    #[test]
    fn unlink_removes_the_name_and_symlink_resolves_through_namei() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        let root = super::root();
        create("/path_target", &root, IType::File, 0, 0).unwrap();
        symlink("/path_target", "/path_link", &root).unwrap();
        let resolved = namei("/path_link", &root).unwrap();
        assert_eq!(resolved.lock().itype(), IType::File);

        unlink("/path_link", &root).unwrap();
        assert!(namei_nofollow("/path_link", &root).is_err());
        crate::log::end_op();
    }

    #[test]
    fn symlink_chase_past_maxsymlinks_is_rejected() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        let root = super::root();
        for i in 0..=MAXSYMLINKS {
            let from = alloc::format!("/path_loop{}", i);
            let to = alloc::format!("/path_loop{}", i + 1);
            symlink(&to, &from, &root).unwrap();
        }
        assert_eq!(namei("/path_loop0", &root).unwrap_err(), Error::TooManySymlinks);
        crate::log::end_op();
    }

    #[test]
    fn link_across_names_shares_one_inode() {
        crate::hal::testing::mount();

        crate::log::begin_op();
        let root = super::root();
        create("/path_orig", &root, IType::File, 0, 0).unwrap();
        link("/path_orig", "/path_alias", &root).unwrap();
        let a = namei("/path_orig", &root).unwrap();
        let b = namei("/path_alias", &root).unwrap();
        assert_eq!(a.inum(), b.inum());
        crate::log::end_op();
    }
}
