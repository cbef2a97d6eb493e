//! Path masking.
//!
//! Masked directories get an empty read-only directory mounted over them
//! and masked files get the null device, unless they are already
//! neutralized.

use std::fs::{DirBuilder, Metadata};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use nix::sys::statvfs::FsFlags;
use rootcell_common::constants::{DEV_NULL, EMPTY_DIR_NAME};
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::{Linux, LinuxIdMapping};

use super::mount::MountSyscalls;
use super::resolve::resolve_in_root;

const MASK_DIR_FLAGS: MsFlags = MsFlags::MS_BIND
    .union(MsFlags::MS_NOSUID)
    .union(MsFlags::MS_NODEV)
    .union(MsFlags::MS_NOEXEC)
    .union(MsFlags::MS_RDONLY);

const MASK_FILE_FLAGS: MsFlags = MsFlags::MS_BIND
    .union(MsFlags::MS_RDONLY)
    .union(MsFlags::MS_PRIVATE);

/// What to do with one masked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskingDecision {
    /// Leave the path untouched.
    Skip,
    /// Mount the empty directory over it, read-only.
    OvermountEmptyDir,
    /// Bind the null device over it, read-only.
    BindDevNull,
}

/// Observed state of a masked directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DirectoryState {
    /// The directory sits on a read-only mount.
    pub is_read_only: bool,
    /// The directory has entries besides `.` and `..`.
    pub has_content: bool,
    /// A mapped identity can read or search it.
    pub is_accessible: bool,
}

impl DirectoryState {
    /// A read-only directory is left alone unless it still exposes content
    /// to a mapped identity.
    #[must_use]
    pub const fn decide(&self) -> MaskingDecision {
        if !self.is_read_only || (self.has_content && self.is_accessible) {
            MaskingDecision::OvermountEmptyDir
        } else {
            MaskingDecision::Skip
        }
    }
}

/// Decision for a masked non-directory.
#[must_use]
pub const fn decide_file(is_null_device: bool) -> MaskingDecision {
    if is_null_device {
        MaskingDecision::Skip
    } else {
        MaskingDecision::BindDevNull
    }
}

/// Returns `true` if a mapped identity may read or search an object with
/// the given mode and ownership.
///
/// "Other" bits grant access unconditionally, group bits when `gid` falls
/// in a GID mapping, and owner bits when `uid` falls in a UID mapping.
pub fn is_accessible(
    mode: u32,
    uid: u32,
    gid: u32,
    uid_mappings: &[LinuxIdMapping],
    gid_mappings: &[LinuxIdMapping],
) -> bool {
    // Each class is tested as (mode & (R | X)) != 0.
    if mode & (libc::S_IROTH | libc::S_IXOTH) != 0 {
        return true;
    }
    if mode & (libc::S_IRGRP | libc::S_IXGRP) != 0
        && gid_mappings.iter().any(|m| m.contains_container_id(gid))
    {
        return true;
    }
    mode & (libc::S_IRUSR | libc::S_IXUSR) != 0
        && uid_mappings.iter().any(|m| m.contains_container_id(uid))
}

fn is_null_device(metadata: &Metadata) -> bool {
    if !metadata.file_type().is_char_device() {
        return false;
    }
    match std::fs::metadata(DEV_NULL) {
        Ok(null) => metadata.rdev() == null.rdev(),
        Err(e) => {
            tracing::warn!(error = %e, "unable to stat {DEV_NULL}");
            false
        }
    }
}

fn has_content(dir: &Path) -> Result<bool> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return Ok(false),
        Err(e) => {
            return Err(RootcellError::masking(
                format!("error opening directory {}", dir.display()),
                e,
            ));
        }
    };
    match entries.next() {
        None => Ok(false),
        Some(Ok(_)) => Ok(true),
        Some(Err(e)) => Err(RootcellError::masking(
            format!("error reading contents of directory {}", dir.display()),
            e,
        )),
    }
}

/// Creates the empty masking directory inside `bundle_path`.
///
/// # Errors
///
/// Returns [`RootcellError::Masking`] if the directory cannot be created.
pub fn create_empty_dir(bundle_path: &Path) -> Result<PathBuf> {
    let dir = bundle_path.join(EMPTY_DIR_NAME);
    match DirBuilder::new().mode(0o700).create(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(dir),
        Err(e) => Err(RootcellError::masking(
            format!("error creating empty directory {}", dir.display()),
            e,
        )),
    }
}

/// Masks every path in `linux.masked_paths` inside `root`.
///
/// # Errors
///
/// Returns [`RootcellError::Masking`] if a path cannot be inspected or a
/// masking mount fails.
pub fn mask_paths(
    ops: &dyn MountSyscalls,
    root: &Path,
    bundle_path: &Path,
    linux: &Linux,
) -> Result<()> {
    if linux.masked_paths.is_empty() {
        return Ok(());
    }
    let empty_dir = create_empty_dir(bundle_path)?;

    for masked in &linux.masked_paths {
        let target = resolve_in_root(root, masked)
            .unwrap_or_else(|_| root.join(masked.strip_prefix("/").unwrap_or(masked)));
        let metadata = match std::fs::metadata(&target) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(RootcellError::masking(
                    format!("error examining {} for masking in mount namespace", target.display()),
                    e,
                ));
            }
        };

        let decision = if metadata.is_dir() {
            let flags = ops.statfs_flags(&target).map_err(|e| {
                RootcellError::masking(
                    format!("error checking if directory {} is a mountpoint", target.display()),
                    e,
                )
            })?;
            DirectoryState {
                is_read_only: flags.contains(FsFlags::ST_RDONLY),
                has_content: has_content(&target)?,
                is_accessible: is_accessible(
                    metadata.mode(),
                    metadata.uid(),
                    metadata.gid(),
                    &linux.uid_mappings,
                    &linux.gid_mappings,
                ),
            }
            .decide()
        } else {
            decide_file(is_null_device(&metadata))
        };
        tracing::debug!(path = %target.display(), ?decision, "masking");

        match decision {
            MaskingDecision::Skip => {}
            MaskingDecision::OvermountEmptyDir => mask_directory(ops, &empty_dir, &target)?,
            MaskingDecision::BindDevNull => {
                ops.mount(Some(Path::new(DEV_NULL)), &target, None, MASK_FILE_FLAGS, None)
                    .map_err(|e| {
                        RootcellError::masking(
                            format!("error masking non-directory {} in mount namespace", target.display()),
                            e,
                        )
                    })?;
            }
        }
    }
    Ok(())
}

fn mask_directory(ops: &dyn MountSyscalls, empty_dir: &Path, target: &Path) -> Result<()> {
    ops.mount(Some(empty_dir), target, Some("bind"), MASK_DIR_FLAGS, None)
        .map_err(|e| {
            RootcellError::masking(
                format!("error masking directory {} in mount namespace", target.display()),
                e,
            )
        })?;
    let flags = ops.statfs_flags(target).map_err(|e| {
        RootcellError::masking(
            format!("error checking if directory {} was mounted read-only", target.display()),
            e,
        )
    })?;
    if !flags.contains(FsFlags::ST_RDONLY) {
        ops.mount(Some(target), target, None, MASK_DIR_FLAGS | MsFlags::MS_REMOUNT, None)
            .map_err(|e| {
                RootcellError::masking(
                    format!("error making sure directory {} is read only", target.display()),
                    e,
                )
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::testing::{Call, FakeMounts};

    fn mapping(container_id: u32, size: u32) -> LinuxIdMapping {
        LinuxIdMapping {
            container_id,
            host_id: 100_000,
            size,
        }
    }

    #[test]
    fn decision_table() {
        let state = |is_read_only, has_content, is_accessible| DirectoryState {
            is_read_only,
            has_content,
            is_accessible,
        };
        assert_eq!(state(true, false, true).decide(), MaskingDecision::Skip);
        assert_eq!(state(true, true, false).decide(), MaskingDecision::Skip);
        assert_eq!(state(true, true, true).decide(), MaskingDecision::OvermountEmptyDir);
        assert_eq!(state(false, false, false).decide(), MaskingDecision::OvermountEmptyDir);
        assert_eq!(decide_file(true), MaskingDecision::Skip);
        assert_eq!(decide_file(false), MaskingDecision::BindDevNull);
    }

    #[test]
    fn other_bits_grant_access_unconditionally() {
        assert!(is_accessible(0o705, 5, 5, &[], &[]));
        assert!(is_accessible(0o701, 5, 5, &[], &[]));
    }

    #[test]
    fn group_bits_need_a_mapped_gid() {
        assert!(!is_accessible(0o050, 5, 5, &[], &[]));
        assert!(is_accessible(0o050, 5, 5, &[], &[mapping(0, 10)]));
        assert!(!is_accessible(0o050, 5, 15, &[], &[mapping(0, 10)]));
    }

    #[test]
    fn owner_bits_need_a_mapped_uid() {
        assert!(!is_accessible(0o500, 0, 0, &[], &[]));
        assert!(is_accessible(0o500, 0, 0, &[mapping(0, 1)], &[]));
        assert!(!is_accessible(0o200, 0, 0, &[mapping(0, 1)], &[]));
    }

    fn mounts_on(fake: &FakeMounts, target: &Path) -> Vec<Option<PathBuf>> {
        fake.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mount { source, target: t, .. } if t == target => Some(source),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn masks_directories_and_files() {
        let root = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        let proc_dir = root.path().join("proc");
        std::fs::create_dir_all(proc_dir.join("acpi")).unwrap();
        std::fs::create_dir_all(proc_dir.join("scsi")).unwrap();
        std::fs::write(proc_dir.join("kcore"), b"").unwrap();
        std::fs::set_permissions(proc_dir.join("scsi"), std::fs::Permissions::from_mode(0o755))
            .unwrap();

        let fake = FakeMounts::default();
        fake.set_flags(proc_dir.join("scsi"), FsFlags::ST_RDONLY);
        let linux = Linux {
            masked_paths: vec![
                "/proc/acpi".into(),
                "/proc/kcore".into(),
                "/proc/scsi".into(),
                "/proc/missing".into(),
            ],
            ..Linux::default()
        };
        mask_paths(&fake, root.path(), bundle.path(), &linux).expect("mask");

        let empty = bundle.path().join("empty");
        assert!(empty.is_dir());
        let acpi = mounts_on(&fake, &proc_dir.join("acpi"));
        assert_eq!(acpi.first(), Some(&Some(empty)));
        assert_eq!(
            mounts_on(&fake, &proc_dir.join("kcore")),
            vec![Some(PathBuf::from(DEV_NULL))]
        );
        assert!(mounts_on(&fake, &proc_dir.join("scsi")).is_empty());
        assert!(mounts_on(&fake, &proc_dir.join("missing")).is_empty());
    }

    #[test]
    fn read_only_directory_with_visible_content_is_masked() {
        let root = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        let dir = root.path().join("proc/keys");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("entry"), b"secret").unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        let fake = FakeMounts::default();
        fake.set_flags(&dir, FsFlags::ST_RDONLY);
        let linux = Linux {
            masked_paths: vec!["/proc/keys".into()],
            ..Linux::default()
        };
        mask_paths(&fake, root.path(), bundle.path(), &linux).expect("mask");
        assert!(!mounts_on(&fake, &dir).is_empty());
    }

    #[test]
    fn read_only_directory_hidden_from_the_container_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        let dir = root.path().join("proc/keys");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("entry"), b"secret").unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

        let fake = FakeMounts::default();
        fake.set_flags(&dir, FsFlags::ST_RDONLY);
        let linux = Linux {
            masked_paths: vec!["/proc/keys".into()],
            ..Linux::default()
        };
        mask_paths(&fake, root.path(), bundle.path(), &linux).expect("mask");
        assert!(mounts_on(&fake, &dir).is_empty());
        assert!(bundle.path().join("empty").is_dir());
    }

    #[test]
    fn no_masked_paths_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        let fake = FakeMounts::default();
        mask_paths(&fake, root.path(), bundle.path(), &Linux::default()).expect("mask");
        assert!(!bundle.path().join("empty").exists());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn empty_dir_creation_tolerates_an_existing_directory() {
        let bundle = tempfile::tempdir().unwrap();
        let first = create_empty_dir(bundle.path()).unwrap();
        let second = create_empty_dir(bundle.path()).unwrap();
        assert_eq!(first, second);
    }
}
