//! Verified `chroot(2)` and working-directory entry.

use std::path::{Component, Path, PathBuf};

use nix::sys::stat::stat;
use rootcell_common::error::{Result, RootcellError};

/// Device and inode of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    /// Device number.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
}

/// System calls that change the process root, directory, or hostname.
pub trait RootSyscalls {
    /// Device and inode of `path`, following symlinks.
    fn stat_identity(&self, path: &Path) -> nix::Result<FileIdentity>;
    /// `chdir(2)`.
    fn chdir(&self, path: &Path) -> nix::Result<()>;
    /// `chroot(2)`.
    fn chroot(&self, path: &Path) -> nix::Result<()>;
    /// `sethostname(2)`.
    fn sethostname(&self, name: &str) -> nix::Result<()>;
}

/// [`RootSyscalls`] backed by the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxRoot;

impl RootSyscalls for LinuxRoot {
    #[allow(clippy::useless_conversion)]
    fn stat_identity(&self, path: &Path) -> nix::Result<FileIdentity> {
        let st = stat(path)?;
        Ok(FileIdentity {
            dev: u64::from(st.st_dev),
            ino: u64::from(st.st_ino),
        })
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        nix::unistd::chdir(path)
    }

    fn chroot(&self, path: &Path) -> nix::Result<()> {
        nix::unistd::chroot(path)
    }

    fn sethostname(&self, name: &str) -> nix::Result<()> {
        nix::unistd::sethostname(name)
    }
}

/// Changes root to `root` and checks it is the directory inspected first.
///
/// # Errors
///
/// Returns [`RootcellError::Mount`] if a stat, chdir, or chroot call fails
/// and [`RootcellError::ChrootIntegrity`] if `/` afterwards is not the
/// directory recorded before the change.
pub fn enter_chroot(ops: &dyn RootSyscalls, root: &Path) -> Result<()> {
    let before = ops.stat_identity(root).map_err(|e| {
        RootcellError::mount(format!("error stat()ing intended root directory {}", root.display()), e)
    })?;
    ops.chdir(root).map_err(|e| {
        RootcellError::mount(format!("error chdir()ing to intended root directory {}", root.display()), e)
    })?;
    ops.chroot(root).map_err(|e| {
        RootcellError::mount(format!("error chroot()ing into directory {}", root.display()), e)
    })?;
    let after = ops
        .stat_identity(Path::new("/"))
        .map_err(|e| RootcellError::mount("error stat()ing current root directory", e))?;

    if before != after {
        return Err(RootcellError::ChrootIntegrity {
            root: root.to_path_buf(),
            expected_dev: before.dev,
            expected_ino: before.ino,
            actual_dev: after.dev,
            actual_ino: after.ino,
        });
    }
    tracing::debug!(root = %root.display(), "chrooted");
    Ok(())
}

/// Makes `cwd` absolute and lexically clean.
pub fn clean_working_dir(cwd: &str) -> PathBuf {
    let mut cleaned = PathBuf::from("/");
    for component in Path::new(cwd).components() {
        match component {
            Component::Normal(name) => cleaned.push(name),
            Component::ParentDir => {
                let _ = cleaned.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    cleaned
}

/// Changes to `/`, then to the cleaned `cwd`, returning the latter.
///
/// # Errors
///
/// Returns [`RootcellError::Mount`] if either `chdir(2)` fails.
pub fn enter_working_dir(ops: &dyn RootSyscalls, cwd: &str) -> Result<PathBuf> {
    let cwd = clean_working_dir(cwd);
    ops.chdir(Path::new("/"))
        .map_err(|e| RootcellError::mount("error chdir()ing into new root directory", e))?;
    ops.chdir(&cwd).map_err(|e| {
        RootcellError::mount(format!("error chdir()ing into directory {}", cwd.display()), e)
    })?;
    tracing::debug!(cwd = %cwd.display(), "changed working directory");
    Ok(cwd)
}
