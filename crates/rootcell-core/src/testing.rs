//! Recording fakes of the syscall traits.
//!
//! Each fake appends a [`Call`] to a [`Journal`] for every operation it
//! performs, failed attempts included. Fakes built with `with_journal`
//! share one journal, so ordering across traits can be asserted.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::resource::Resource;
use nix::sys::statvfs::FsFlags;
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::LinuxSeccomp;

use crate::capability::CapabilitySet;
use crate::filesystem::{FileIdentity, MountSyscalls, RootSyscalls};
use crate::identity::IdentitySyscalls;
use crate::security::SecurityPolicy;

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `mount(2)`.
    Mount {
        /// Source argument.
        source: Option<PathBuf>,
        /// Mountpoint.
        target: PathBuf,
        /// Filesystem type argument.
        fstype: Option<String>,
        /// Mount flags.
        flags: MsFlags,
        /// Filesystem data.
        data: Option<String>,
    },
    /// Lazy unmount.
    Unmount(PathBuf),
    /// `sethostname(2)`.
    SetHostname(String),
    /// `chdir(2)`.
    Chdir(PathBuf),
    /// `chroot(2)`.
    Chroot(PathBuf),
    /// `setgroups(2)`.
    SetGroups(Vec<u32>),
    /// GID change.
    SetGid(u32),
    /// UID change.
    SetUid(u32),
    /// Capability application.
    ApplyCapabilities(CapabilitySet),
    /// `setrlimit(2)`.
    SetRlimit(Resource, u64, u64),
    /// AppArmor profile request.
    AppArmor(String),
    /// SELinux exec label.
    SelinuxLabel(String),
    /// `PR_SET_NO_NEW_PRIVS`.
    NoNewPrivileges,
    /// Seccomp filter installation.
    Seccomp,
    /// Process launch.
    Exec {
        /// Argument vector.
        args: Vec<String>,
        /// Working directory.
        cwd: PathBuf,
    },
}

/// Shared, ordered record of [`Call`]s.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Call>>>);

impl Journal {
    /// Appends `call`.
    pub fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

fn ms_to_fs(flags: MsFlags) -> FsFlags {
    let mut fs = FsFlags::empty();
    for (ms, st) in [
        (MsFlags::MS_RDONLY, FsFlags::ST_RDONLY),
        (MsFlags::MS_NOSUID, FsFlags::ST_NOSUID),
        (MsFlags::MS_NODEV, FsFlags::ST_NODEV),
        (MsFlags::MS_NOEXEC, FsFlags::ST_NOEXEC),
    ] {
        fs.set(st, flags.contains(ms));
    }
    fs
}

/// In-memory [`MountSyscalls`].
///
/// Flags follow the kernel's rules closely enough for the builder: an
/// initial bind leaves them alone, while a remount or a filesystem mount
/// replaces them with the requested ones. Detaching a path that is no
/// longer mounted fails with `EINVAL`, as it does on Linux.
#[derive(Debug, Default)]
pub struct FakeMounts {
    journal: Journal,
    flags: RefCell<HashMap<PathBuf, FsFlags>>,
    missing: RefCell<HashSet<PathBuf>>,
    frozen: RefCell<HashSet<PathBuf>>,
    failures: RefCell<HashMap<PathBuf, Errno>>,
    unmount_failures: RefCell<VecDeque<Errno>>,
    detached: RefCell<HashSet<PathBuf>>,
    host_mountpoints: RefCell<Vec<PathBuf>>,
    require_targets: Cell<bool>,
}

impl FakeMounts {
    /// Creates a fake recording into `journal`.
    pub fn with_journal(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.journal.calls()
    }

    /// Forgets every recorded call.
    pub fn clear_calls(&self) {
        self.journal.clear();
    }

    /// Makes every mount on `target` fail with `errno`.
    pub fn fail_mount_on(&self, target: impl Into<PathBuf>, errno: Errno) {
        let _ = self.failures.borrow_mut().insert(target.into(), errno);
    }

    /// Makes mounts fail with `ENOENT` when the target is absent on disk.
    pub fn require_existing_targets(&self) {
        self.require_targets.set(true);
    }

    /// Sets the flags `statvfs` reports for `path`.
    pub fn set_flags(&self, path: impl Into<PathBuf>, flags: FsFlags) {
        let _ = self.flags.borrow_mut().insert(path.into(), flags);
    }

    /// Flags currently reported for `path`.
    pub fn flags_of(&self, path: impl AsRef<Path>) -> FsFlags {
        self.flags
            .borrow()
            .get(path.as_ref())
            .copied()
            .unwrap_or_else(FsFlags::empty)
    }

    /// Makes `statvfs` report `ENOENT` for `path`.
    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        let _ = self.missing.borrow_mut().insert(path.into());
    }

    /// Keeps the flags of `path` unchanged by any mount.
    pub fn ignore_flags_on(&self, path: impl Into<PathBuf>) {
        let _ = self.frozen.borrow_mut().insert(path.into());
    }

    /// Sets the host mount table.
    pub fn set_host_mountpoints(&self, mountpoints: &[&str]) {
        *self.host_mountpoints.borrow_mut() = mountpoints.iter().map(PathBuf::from).collect();
    }

    /// Queues errors returned by successive unmounts.
    pub fn fail_unmounts(&self, errors: &[Errno]) {
        self.unmount_failures.borrow_mut().extend(errors.iter().copied());
    }
}

impl MountSyscalls for FakeMounts {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> nix::Result<()> {
        self.journal.push(Call::Mount {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
            flags,
            data: data.map(str::to_string),
        });
        if let Some(errno) = self.failures.borrow().get(target) {
            return Err(*errno);
        }
        if self.require_targets.get() && !target.exists() {
            return Err(Errno::ENOENT);
        }
        let _ = self.detached.borrow_mut().remove(target);
        if self.frozen.borrow().contains(target) {
            return Ok(());
        }
        let is_bind = flags.contains(MsFlags::MS_BIND) || fstype == Some("bind");
        let replaces_flags =
            flags.contains(MsFlags::MS_REMOUNT) || (fstype.is_some() && !is_bind);
        if replaces_flags {
            let _ = self
                .flags
                .borrow_mut()
                .insert(target.to_path_buf(), ms_to_fs(flags));
        }
        Ok(())
    }

    fn unmount_detach(&self, target: &Path) -> nix::Result<()> {
        self.journal.push(Call::Unmount(target.to_path_buf()));
        if let Some(errno) = self.unmount_failures.borrow_mut().pop_front() {
            return Err(errno);
        }
        if !self.detached.borrow_mut().insert(target.to_path_buf()) {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    fn statfs_flags(&self, path: &Path) -> nix::Result<FsFlags> {
        if self.missing.borrow().contains(path) {
            return Err(Errno::ENOENT);
        }
        Ok(self.flags_of(path))
    }

    fn host_mountpoints(&self) -> Result<Vec<PathBuf>> {
        Ok(self.host_mountpoints.borrow().clone())
    }
}

/// In-memory [`RootSyscalls`].
///
/// `stat_identity` answers from a table until `chroot` has been called;
/// afterwards `/` reports the identity set with
/// [`FakeRoot::set_identity_after_chroot`].
#[derive(Debug, Default)]
pub struct FakeRoot {
    journal: Journal,
    identities: RefCell<HashMap<PathBuf, FileIdentity>>,
    after_chroot: Cell<Option<FileIdentity>>,
    chrooted: Cell<bool>,
    hostname_error: Cell<Option<Errno>>,
}

impl FakeRoot {
    /// Creates a fake recording into `journal`.
    pub fn with_journal(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.journal.calls()
    }

    /// Sets the identity reported for `path` before the chroot.
    pub fn set_identity(&self, path: impl Into<PathBuf>, identity: FileIdentity) {
        let _ = self.identities.borrow_mut().insert(path.into(), identity);
    }

    /// Sets the identity `/` reports after the chroot.
    pub fn set_identity_after_chroot(&self, identity: FileIdentity) {
        self.after_chroot.set(Some(identity));
    }

    /// Makes `sethostname` fail with `errno`.
    pub fn fail_hostname(&self, errno: Errno) {
        self.hostname_error.set(Some(errno));
    }
}

impl RootSyscalls for FakeRoot {
    fn stat_identity(&self, path: &Path) -> nix::Result<FileIdentity> {
        if self.chrooted.get() && path == Path::new("/") {
            return self.after_chroot.get().ok_or(Errno::ENOENT);
        }
        self.identities
            .borrow()
            .get(path)
            .copied()
            .ok_or(Errno::ENOENT)
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        self.journal.push(Call::Chdir(path.to_path_buf()));
        Ok(())
    }

    fn chroot(&self, path: &Path) -> nix::Result<()> {
        self.journal.push(Call::Chroot(path.to_path_buf()));
        self.chrooted.set(true);
        Ok(())
    }

    fn sethostname(&self, name: &str) -> nix::Result<()> {
        self.journal.push(Call::SetHostname(name.to_string()));
        self.hostname_error.get().map_or(Ok(()), Err)
    }
}

/// In-memory [`IdentitySyscalls`].
///
/// Resource limits default to unlimited and track what was last set.
#[derive(Debug, Default)]
pub struct FakeIdentity {
    journal: Journal,
    current: Cell<CapabilitySet>,
    applied: Cell<Option<CapabilitySet>>,
    setgroups_denied: Cell<bool>,
    gid_error: Cell<Option<Errno>>,
    rlimits: RefCell<HashMap<Resource, (u64, u64)>>,
}

impl FakeIdentity {
    /// Creates a fake recording into `journal`.
    pub fn with_journal(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.journal.calls()
    }

    /// Sets the capability sets the thread starts with.
    pub fn set_current_capabilities(&self, current: CapabilitySet) {
        self.current.set(current);
    }

    /// Capability sets last applied, if any.
    pub fn applied_capabilities(&self) -> Option<CapabilitySet> {
        self.applied.get()
    }

    /// Reports `setgroups(2)` as denied.
    pub fn deny_setgroups(&self) {
        self.setgroups_denied.set(true);
    }

    /// Makes the GID change fail with `errno`.
    pub fn fail_set_gid(&self, errno: Errno) {
        self.gid_error.set(Some(errno));
    }

    /// Sets the current limits of `resource`.
    pub fn set_current_rlimit(&self, resource: Resource, soft: u64, hard: u64) {
        let _ = self.rlimits.borrow_mut().insert(resource, (soft, hard));
    }
}

impl IdentitySyscalls for FakeIdentity {
    fn set_groups(&self, gids: &[u32]) -> nix::Result<()> {
        self.journal.push(Call::SetGroups(gids.to_vec()));
        Ok(())
    }

    fn setgroups_denied(&self) -> bool {
        self.setgroups_denied.get()
    }

    fn set_gid(&self, gid: u32) -> nix::Result<()> {
        self.journal.push(Call::SetGid(gid));
        self.gid_error.get().map_or(Ok(()), Err)
    }

    fn set_uid(&self, uid: u32) -> nix::Result<()> {
        self.journal.push(Call::SetUid(uid));
        Ok(())
    }

    fn current_capabilities(&self) -> io::Result<CapabilitySet> {
        Ok(self.current.get())
    }

    fn apply_capabilities(&self, target: &CapabilitySet) -> io::Result<()> {
        self.journal.push(Call::ApplyCapabilities(*target));
        self.applied.set(Some(*target));
        self.current.set(*target);
        Ok(())
    }

    fn getrlimit(&self, resource: Resource) -> nix::Result<(u64, u64)> {
        Ok(self
            .rlimits
            .borrow()
            .get(&resource)
            .copied()
            .unwrap_or((u64::MAX, u64::MAX)))
    }

    fn setrlimit(&self, resource: Resource, soft: u64, hard: u64) -> nix::Result<()> {
        self.journal.push(Call::SetRlimit(resource, soft, hard));
        self.set_current_rlimit(resource, soft, hard);
        Ok(())
    }
}

/// In-memory [`SecurityPolicy`].
#[derive(Debug, Default)]
pub struct FakeSecurity {
    journal: Journal,
    apparmor: Cell<bool>,
    seccomp_fails: Cell<bool>,
}

impl FakeSecurity {
    /// Creates a fake recording into `journal`.
    pub fn with_journal(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.journal.calls()
    }

    /// Reports AppArmor as enabled.
    pub fn enable_apparmor(&self) {
        self.apparmor.set(true);
    }

    /// Makes seccomp installation fail.
    pub fn fail_seccomp(&self) {
        self.seccomp_fails.set(true);
    }
}

impl SecurityPolicy for FakeSecurity {
    fn apparmor_enabled(&self) -> bool {
        self.apparmor.get()
    }

    fn apply_apparmor_profile(&self, profile: &str) -> Result<()> {
        self.journal.push(Call::AppArmor(profile.to_string()));
        Ok(())
    }

    fn apply_selinux_label(&self, label: &str) -> Result<()> {
        self.journal.push(Call::SelinuxLabel(label.to_string()));
        Ok(())
    }

    fn set_no_new_privileges(&self) -> Result<()> {
        self.journal.push(Call::NoNewPrivileges);
        Ok(())
    }

    fn apply_seccomp(&self, _seccomp: &LinuxSeccomp) -> Result<()> {
        self.journal.push(Call::Seccomp);
        if self.seccomp_fails.get() {
            return Err(RootcellError::security_policy(
                "error setting seccomp filter for process",
                io::Error::from(Errno::EINVAL),
            ));
        }
        Ok(())
    }
}
