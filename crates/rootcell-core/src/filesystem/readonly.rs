//! Read-only enforcement for paths inside the root.

use std::path::Path;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::statvfs::FsFlags;
use rootcell_common::error::{Result, RootcellError};

use super::mount::{MountSyscalls, READ_ONLY_FLAGS};
use super::resolve::resolve_in_root;

/// Remounts `path` with `flags` if `statvfs` does not already report it
/// read-only.
///
/// # Errors
///
/// Returns [`RootcellError::Mount`] if the status check or remount fails.
pub fn ensure_read_only(ops: &dyn MountSyscalls, path: &Path, flags: MsFlags) -> Result<()> {
    let current = ops.statfs_flags(path).map_err(|e| {
        RootcellError::mount(
            format!("error checking if directory {} was bound read-only", path.display()),
            e,
        )
    })?;
    if !current.contains(FsFlags::ST_RDONLY) {
        ops.mount(Some(path), path, Some("bind"), flags | MsFlags::MS_REMOUNT, None)
            .map_err(|e| {
                RootcellError::mount(
                    format!("error remounting {} in mount namespace read-only", path.display()),
                    e,
                )
            })?;
    }
    Ok(())
}

/// Makes every path in `paths` read-only inside `root`.
///
/// Missing paths and paths that are already read-only are skipped, so a
/// second run over the same set issues no mount calls.
///
/// # Errors
///
/// Returns [`RootcellError::Mount`] if a bind, remount, or status check
/// fails and [`RootcellError::ReadOnlyEnforcement`] if a path is still
/// writable after the remount.
pub fn make_paths_read_only<P: AsRef<Path>>(
    ops: &dyn MountSyscalls,
    root: &Path,
    paths: &[P],
) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        let target = resolve_in_root(root, path).map_err(|e| {
            RootcellError::mount(
                format!("error checking {} for symlinks before marking it read-only", path.display()),
                e,
            )
        })?;

        match ops.statfs_flags(&target) {
            Err(Errno::ENOENT) => continue,
            Err(e) => {
                return Err(RootcellError::mount(
                    format!("error checking if directory {} is already read-only", target.display()),
                    e,
                ));
            }
            Ok(flags) if flags.contains(FsFlags::ST_RDONLY) => {
                tracing::debug!(path = %target.display(), "already read-only");
                continue;
            }
            Ok(_) => {}
        }

        match ops.mount(
            Some(&target),
            &target,
            None,
            READ_ONLY_FLAGS | MsFlags::MS_BIND | MsFlags::MS_REC,
            None,
        ) {
            Err(Errno::ENOENT) => continue,
            Err(e) => {
                return Err(RootcellError::mount(
                    format!(
                        "error bind mounting {} onto itself in preparation for making it read-only",
                        target.display()
                    ),
                    e,
                ));
            }
            Ok(()) => {}
        }

        let flags = ops.statfs_flags(&target).map_err(|e| {
            RootcellError::mount(
                format!("error checking if directory {} was bound read-only", target.display()),
                e,
            )
        })?;
        if !flags.contains(FsFlags::ST_RDONLY) {
            ops.mount(
                Some(&target),
                &target,
                None,
                READ_ONLY_FLAGS | MsFlags::MS_BIND | MsFlags::MS_REMOUNT,
                None,
            )
            .map_err(|e| {
                RootcellError::mount(
                    format!("error remounting {} in mount namespace read-only", target.display()),
                    e,
                )
            })?;
        }

        let flags = ops.statfs_flags(&target).map_err(|e| {
            RootcellError::mount(
                format!("error checking if directory {} was remounted read-only", target.display()),
                e,
            )
        })?;
        if !flags.contains(FsFlags::ST_RDONLY) {
            return Err(RootcellError::ReadOnlyEnforcement { path: target });
        }
        tracing::debug!(path = %target.display(), "made read-only");
    }
    Ok(())
}
