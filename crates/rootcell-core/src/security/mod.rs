//! Mandatory access control and syscall filtering.
//!
//! The AppArmor profile and SELinux label are exec-time attributes: they
//! take effect on the next `execve(2)`, so they can be set early. The
//! seccomp filter is installed by the privilege reducer, after the GID
//! change and before capabilities are dropped.

pub mod apparmor;
pub mod seccomp;
pub mod selinux;

use nix::sys::prctl;
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::{LinuxSeccomp, Process};

/// Security-policy operations applied to the calling thread.
pub trait SecurityPolicy {
    /// Reports whether AppArmor is enabled on the host.
    fn apparmor_enabled(&self) -> bool;

    /// Sets the AppArmor profile for the next exec.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::SecurityPolicy`] if the kernel rejects it.
    fn apply_apparmor_profile(&self, profile: &str) -> Result<()>;

    /// Sets the SELinux label for the next exec.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::SecurityPolicy`] if the kernel rejects it.
    fn apply_selinux_label(&self, label: &str) -> Result<()>;

    /// Sets `PR_SET_NO_NEW_PRIVS` on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::SecurityPolicy`] if `prctl(2)` fails.
    fn set_no_new_privileges(&self) -> Result<()>;

    /// Compiles and installs `seccomp`.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::SecurityPolicy`] if the filter cannot be
    /// built or loaded.
    fn apply_seccomp(&self, seccomp: &LinuxSeccomp) -> Result<()>;
}

/// [`SecurityPolicy`] backed by procfs, sysfs, and `seccomp(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSecurity;

impl SecurityPolicy for LinuxSecurity {
    fn apparmor_enabled(&self) -> bool {
        apparmor::is_enabled()
    }

    fn apply_apparmor_profile(&self, profile: &str) -> Result<()> {
        apparmor::apply_profile(profile).map_err(|e| {
            RootcellError::security_policy(format!("error setting AppArmor profile {profile:?}"), e)
        })
    }

    fn apply_selinux_label(&self, label: &str) -> Result<()> {
        selinux::set_exec_label(label).map_err(|e| {
            RootcellError::security_policy(format!("error setting SELinux label {label:?}"), e)
        })
    }

    fn set_no_new_privileges(&self) -> Result<()> {
        prctl::set_no_new_privs().map_err(|e| {
            RootcellError::security_policy("error setting no-new-privileges", std::io::Error::from(e))
        })
    }

    fn apply_seccomp(&self, seccomp: &LinuxSeccomp) -> Result<()> {
        seccomp::apply(seccomp)
            .map_err(|e| RootcellError::security_policy("error setting seccomp filter for process", e))
    }
}

/// Applies the AppArmor profile and SELinux label named by `process`.
///
/// The profile is applied only when AppArmor is enabled and a profile is
/// named; the label only when one is named.
///
/// # Errors
///
/// Propagates the first failure from `policy`.
pub fn apply_mac_policy(policy: &dyn SecurityPolicy, process: &Process) -> Result<()> {
    if let Some(profile) = process.apparmor_profile.as_deref().filter(|p| !p.is_empty()) {
        if policy.apparmor_enabled() {
            tracing::debug!(profile, "applying AppArmor profile");
            policy.apply_apparmor_profile(profile)?;
        } else {
            tracing::debug!(profile, "AppArmor disabled, ignoring profile");
        }
    }
    if let Some(label) = process.selinux_label.as_deref().filter(|l| !l.is_empty()) {
        tracing::debug!(label, "applying SELinux label");
        policy.apply_selinux_label(label)?;
    }
    Ok(())
}
