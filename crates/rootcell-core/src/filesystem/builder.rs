//! Construction of the bind-mount tree under the new root.

use std::fs::{DirBuilder, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use nix::errno::Errno;
use nix::mount::MsFlags;
use rootcell_common::constants::{DEV_PATH, PROC_PATH, SYS_PATH};
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::{Mount, RuntimeSpec};

use super::cleanup::CleanupHandle;
use super::masking::mask_paths;
use super::mount::{
    DEV_FLAGS, MountFlags, MountSyscalls, PROC_FLAGS, SYS_FLAGS, is_at_or_below, parse_fs_options,
};
use super::readonly::{ensure_read_only, make_paths_read_only};
use super::resolve::resolve_in_root;

/// Builds the mount tree for `spec` under `root`.
///
/// The cleanup handle is returned even when setup fails part way, so the
/// caller can detach whatever was mounted before the failure.
pub fn setup_mounts(
    ops: Rc<dyn MountSyscalls>,
    root: &Path,
    bundle_path: &Path,
    spec: &RuntimeSpec,
) -> (CleanupHandle, Result<()>) {
    let cleanup = CleanupHandle::new(Rc::clone(&ops), root);
    let builder = MountBuilder {
        ops: ops.as_ref(),
        root,
    };
    let result = builder.build(bundle_path, spec);
    (cleanup, result)
}

struct MountBuilder<'a> {
    ops: &'a dyn MountSyscalls,
    root: &'a Path,
}

impl MountBuilder<'_> {
    fn build(&self, bundle_path: &Path, spec: &RuntimeSpec) -> Result<()> {
        self.bind_root()?;

        let dev = self.bind_host(DEV_PATH, DEV_FLAGS)?;
        ensure_read_only(self.ops, &dev, DEV_FLAGS)?;
        tracing::debug!(mountpoint = %dev.display(), "bind mounted {DEV_PATH}");

        let proc = self.bind_host(PROC_PATH, PROC_FLAGS)?;
        tracing::debug!(mountpoint = %proc.display(), "bind mounted {PROC_PATH}");

        let sys = self.bind_host(SYS_PATH, SYS_FLAGS)?;
        ensure_read_only(self.ops, &sys, SYS_FLAGS)?;
        self.bind_sys_submounts()?;
        tracing::debug!(mountpoint = %sys.display(), "bind mounted {SYS_PATH}");

        for entry in &spec.mounts {
            self.mount_entry(entry)?;
        }

        let linux = spec.linux_or_default();
        make_paths_read_only(self.ops, self.root, &linux.readonly_paths)?;
        mask_paths(self.ops, self.root, bundle_path, &linux)
    }

    fn under_root(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    // Gives the teardown handle a single mountpoint to detach.
    fn bind_root(&self) -> Result<()> {
        let root = self.root;
        self.ops
            .mount(Some(root), root, None, MsFlags::MS_BIND | MsFlags::MS_REC, None)
            .map_err(|e| {
                RootcellError::mount(format!("error bind mounting {} onto itself", root.display()), e)
            })?;
        self.ops
            .mount(None, root, None, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None)
            .map_err(|e| {
                RootcellError::mount(format!("error making {} private", root.display()), e)
            })?;
        Ok(())
    }

    fn bind_host(&self, host: &str, flags: MsFlags) -> Result<PathBuf> {
        let host_path = Path::new(host);
        let target = self.under_root(host_path);
        let bind = || {
            self.ops
                .mount(Some(host_path), &target, Some("bind"), flags, None)
        };
        let result = match bind() {
            Err(Errno::ENOENT) => DirBuilder::new()
                .mode(0o755)
                .create(&target)
                .and_then(|()| bind().map_err(io::Error::from)),
            other => other.map_err(io::Error::from),
        };
        result.map_err(|e| {
            RootcellError::mount(format!("error bind mounting {host} from host into mount namespace"), e)
        })?;
        Ok(target)
    }

    fn bind_sys_submounts(&self) -> Result<()> {
        let mountpoints = match self.ops.host_mountpoints() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "unable to list host mounts");
                Vec::new()
            }
        };
        for mountpoint in mountpoints
            .iter()
            .filter(|m| is_at_or_below(m, Path::new(SYS_PATH)))
        {
            let target = self.under_root(mountpoint);
            if let Err(e) = self
                .ops
                .mount(Some(mountpoint), &target, Some("bind"), SYS_FLAGS, None)
            {
                tracing::info!(mountpoint = %mountpoint.display(), error = %e, "could not bind mount, skipping");
                continue;
            }
            ensure_read_only(self.ops, &target, SYS_FLAGS)?;
        }
        Ok(())
    }

    fn mount_entry(&self, entry: &Mount) -> Result<()> {
        let destination = Path::new("/").join(&entry.destination);
        if [DEV_PATH, PROC_PATH, SYS_PATH]
            .iter()
            .any(|fixed| is_at_or_below(&destination, Path::new(fixed)))
        {
            tracing::debug!(destination = %destination.display(), "already bind mounted");
            return Ok(());
        }
        let kind = entry.mount_type.as_deref().unwrap_or_default();
        if !matches!(kind, "bind" | "tmpfs" | "overlay") {
            tracing::debug!(kind, destination = %destination.display(), "skipping mount");
            return Ok(());
        }

        // tmpfs and overlay mountpoints are modelled on `/`, which is a directory.
        let source_is_dir = if kind == "bind" {
            let source = entry.source.as_deref().unwrap_or_else(|| Path::new(""));
            std::fs::metadata(source)
                .map_err(|e| {
                    RootcellError::mount(
                        format!("error examining {} for mounting in mount namespace", source.display()),
                        e,
                    )
                })?
                .is_dir()
        } else {
            true
        };

        let target = resolve_in_root(self.root, &destination).map_err(|e| {
            RootcellError::mount(format!("evaluating symlink {}", destination.display()), e)
        })?;
        match std::fs::metadata(&target) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => create_mountpoint(&target, source_is_dir)?,
            Err(e) => {
                return Err(RootcellError::mount(
                    format!("error examining {} for mounting in mount namespace", target.display()),
                    e,
                ));
            }
        }

        let flags = MountFlags::from_options(&entry.options);
        if kind == "bind" {
            let source = entry.source.as_deref();
            self.ops
                .mount(source, &target, None, flags.request, None)
                .map_err(|e| {
                    RootcellError::mount(
                        format!(
                            "error bind mounting {} from host to {} in mount namespace",
                            source.unwrap_or_else(|| Path::new("")).display(),
                            target.display()
                        ),
                        e,
                    )
                })?;
        } else {
            self.mount_filesystem(kind, entry, &target)?;
        }
        tracing::debug!(kind, destination = %destination.display(), mountpoint = %target.display(), "mounted");

        let actual = self.ops.statfs_flags(&target).map_err(|e| {
            RootcellError::mount(
                format!("error checking if directory {} was bound read-only", target.display()),
                e,
            )
        })?;
        if !flags.satisfied_by(actual) {
            self.ops
                .mount(
                    Some(&target),
                    &target,
                    Some("bind"),
                    flags.request | MsFlags::MS_REMOUNT,
                    None,
                )
                .map_err(|e| {
                    RootcellError::mount(
                        format!("error remounting {} in mount namespace with expected flags", target.display()),
                        e,
                    )
                })?;
        }
        Ok(())
    }

    fn mount_filesystem(&self, kind: &str, entry: &Mount, target: &Path) -> Result<()> {
        let mut options = entry.options.clone();
        options.push("private".into());
        let parsed = parse_fs_options(&options);
        let source = entry.source.as_deref().unwrap_or_else(|| Path::new(kind));
        let data = (!parsed.data.is_empty()).then_some(parsed.data.as_str());
        let fail = |e: Errno| {
            RootcellError::mount(
                format!(
                    "error mounting {kind} to {} in mount namespace ({})",
                    target.display(),
                    entry.options.join(",")
                ),
                e,
            )
        };
        self.ops
            .mount(Some(source), target, Some(kind), parsed.flags, data)
            .map_err(fail)?;
        if !parsed.propagation.is_empty() {
            self.ops
                .mount(None, target, None, parsed.propagation, None)
                .map_err(fail)?;
        }
        Ok(())
    }
}

fn create_mountpoint(target: &Path, is_dir: bool) -> Result<()> {
    let mut dirs = DirBuilder::new();
    dirs.recursive(true).mode(0o755);
    if is_dir {
        return dirs.create(target).map_err(|e| {
            RootcellError::mount(
                format!("error creating mountpoint {} in mount namespace", target.display()),
                e,
            )
        });
    }
    if let Some(parent) = target.parent() {
        dirs.create(parent).map_err(|e| {
            RootcellError::mount(
                format!("error ensuring parent of mountpoint {} is present", target.display()),
                e,
            )
        })?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o755)
        .open(target)
        .map(drop)
        .map_err(|e| {
            RootcellError::mount(
                format!("error creating mountpoint {} in mount namespace", target.display()),
                e,
            )
        })
}
