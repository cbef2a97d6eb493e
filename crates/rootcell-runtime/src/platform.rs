//! The set of syscall backends one bootstrap runs against.

use std::fmt;
use std::rc::Rc;

use rootcell_core::filesystem::{LinuxMounts, LinuxRoot, MountSyscalls, RootSyscalls};
use rootcell_core::identity::{IdentitySyscalls, LinuxIdentity};
use rootcell_core::security::{LinuxSecurity, SecurityPolicy};

use crate::launcher::{Launcher, LinuxLauncher};

/// Every privileged seam the orchestrator drives.
///
/// [`Platform::linux`] wires the kernel-backed implementations; tests
/// substitute recording fakes field by field.
pub struct Platform {
    /// Mount, unmount, and `statvfs`.
    pub mounts: Rc<dyn MountSyscalls>,
    /// Hostname, chdir, and chroot.
    pub root: Box<dyn RootSyscalls>,
    /// Groups, IDs, capabilities, and resource limits.
    pub identity: Box<dyn IdentitySyscalls>,
    /// AppArmor, SELinux, no-new-privileges, and seccomp.
    pub security: Box<dyn SecurityPolicy>,
    /// Target process launch.
    pub launcher: Box<dyn Launcher>,
}

impl Platform {
    /// Backends that talk to the running kernel.
    #[must_use]
    pub fn linux() -> Self {
        Self {
            mounts: Rc::new(LinuxMounts),
            root: Box::new(LinuxRoot),
            identity: Box::new(LinuxIdentity),
            security: Box::new(LinuxSecurity),
            launcher: Box::new(LinuxLauncher),
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
