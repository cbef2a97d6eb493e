//! Symlink resolution confined to a root directory.
//!
//! Absolute link targets restart at the root, and `..` never climbs above
//! it, so a hostile rootfs cannot redirect a mount onto a host path.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use rootcell_common::constants::MAX_SYMLINK_HOPS;

/// Resolves `path` as if `root` were `/`.
///
/// Components that do not exist are appended unresolved, so the result
/// for a missing path is still the location it would have.
///
/// # Errors
///
/// Returns an error if more than 255 symlinks are followed or a
/// component cannot be inspected for a reason other than absence.
pub fn resolve_in_root(root: &Path, path: &Path) -> io::Result<PathBuf> {
    let mut pending: VecDeque<OsString> = components(path).collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0usize;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            let _ = resolved.pop();
            continue;
        }
        let candidate = root.join(&resolved).join(&part);
        let metadata = match std::fs::symlink_metadata(&candidate) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                resolved.push(&part);
                continue;
            }
            Err(e) => return Err(e),
        };
        if !metadata.file_type().is_symlink() {
            resolved.push(&part);
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(io::Error::from_raw_os_error(libc::ELOOP));
        }
        let link = std::fs::read_link(&candidate)?;
        if link.is_absolute() {
            resolved = PathBuf::new();
        }
        for (i, component) in components(&link).enumerate() {
            pending.insert(i, component);
        }
    }
    Ok(root.join(resolved))
}

fn components(path: &Path) -> impl Iterator<Item = OsString> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
    })
}
