//! Identity and privilege reduction.
//!
//! Privileges are dropped in one fixed order: supplementary groups, GID,
//! seccomp filter, capabilities, and finally UID. Capabilities must be
//! final before the UID changes, and the UID change may itself need
//! `CAP_SETUID`, so that capability is kept transiently for non-root
//! targets.

use std::io;

use nix::sys::resource::{Resource, getrlimit, setrlimit};
use nix::unistd::{Gid, Uid, setgroups, setresgid, setresuid};
use rootcell_common::constants::SETGROUPS_PATH;
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::{LinuxSeccomp, Process};

use crate::capability::{self, CapabilitySet};
use crate::security::SecurityPolicy;

/// Identity-changing system calls used by the reducer.
pub trait IdentitySyscalls {
    /// Replaces the supplementary group list.
    fn set_groups(&self, gids: &[u32]) -> nix::Result<()>;

    /// Returns `true` when the kernel has been told to deny `setgroups(2)`.
    fn setgroups_denied(&self) -> bool;

    /// Sets the real, effective, and saved GID.
    fn set_gid(&self, gid: u32) -> nix::Result<()>;

    /// Sets the real, effective, and saved UID.
    fn set_uid(&self, uid: u32) -> nix::Result<()>;

    /// Reads the capability sets of the calling thread.
    fn current_capabilities(&self) -> io::Result<CapabilitySet>;

    /// Applies all capability sets to the calling thread.
    fn apply_capabilities(&self, target: &CapabilitySet) -> io::Result<()>;

    /// Reads the `(soft, hard)` limits of `resource`.
    fn getrlimit(&self, resource: Resource) -> nix::Result<(u64, u64)>;

    /// Sets the soft and hard limits of `resource`.
    fn setrlimit(&self, resource: Resource, soft: u64, hard: u64) -> nix::Result<()>;
}

/// [`IdentitySyscalls`] backed by the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxIdentity;

impl IdentitySyscalls for LinuxIdentity {
    fn set_groups(&self, gids: &[u32]) -> nix::Result<()> {
        let gids: Vec<Gid> = gids.iter().copied().map(Gid::from_raw).collect();
        setgroups(&gids)
    }

    fn setgroups_denied(&self) -> bool {
        std::fs::read_to_string(SETGROUPS_PATH).is_ok_and(|s| s.trim_end_matches('\n') == "deny")
    }

    fn set_gid(&self, gid: u32) -> nix::Result<()> {
        let gid = Gid::from_raw(gid);
        setresgid(gid, gid, gid)
    }

    fn set_uid(&self, uid: u32) -> nix::Result<()> {
        let uid = Uid::from_raw(uid);
        setresuid(uid, uid, uid)
    }

    fn current_capabilities(&self) -> io::Result<CapabilitySet> {
        capability::read_current()
    }

    fn apply_capabilities(&self, target: &CapabilitySet) -> io::Result<()> {
        capability::apply(target)
    }

    fn getrlimit(&self, resource: Resource) -> nix::Result<(u64, u64)> {
        getrlimit(resource)
    }

    fn setrlimit(&self, resource: Resource, soft: u64, hard: u64) -> nix::Result<()> {
        setrlimit(resource, soft, hard)
    }
}

/// Drops the calling thread to the identity described by `process`.
///
/// # Errors
///
/// Returns [`RootcellError::Privilege`] if any identity or capability call
/// fails, [`RootcellError::Configuration`] for an unknown capability name,
/// and whatever the seccomp step reports.
pub fn reduce_privileges(
    identity: &dyn IdentitySyscalls,
    security: &dyn SecurityPolicy,
    process: &Process,
    seccomp: Option<&LinuxSeccomp>,
) -> Result<()> {
    let user = &process.user;

    if user.additional_gids.is_empty() {
        if identity.setgroups_denied() {
            tracing::debug!("setgroups denied, leaving supplementary groups alone");
        } else {
            tracing::debug!("clearing supplementary groups");
            identity
                .set_groups(&[])
                .map_err(|e| RootcellError::privilege("error clearing supplemental groups list", e))?;
        }
    } else {
        tracing::debug!(gids = ?user.additional_gids, "setting supplementary groups");
        identity
            .set_groups(&user.additional_gids)
            .map_err(|e| RootcellError::privilege("error setting supplemental groups list", e))?;
    }

    tracing::debug!(gid = user.gid, "setting gid");
    identity
        .set_gid(user.gid)
        .map_err(|e| RootcellError::privilege("error setting GID", e))?;

    if process.no_new_privileges {
        security.set_no_new_privileges()?;
    }
    if let Some(seccomp) = seccomp {
        security.apply_seccomp(seccomp)?;
    }

    tracing::debug!("setting capabilities");
    let current = identity
        .current_capabilities()
        .map_err(|e| RootcellError::privilege("error reading capabilities of current process", e))?;
    let planned = capability::plan_capabilities(
        process.capabilities.as_ref(),
        capability::transient_keep(user.uid),
        &current,
    )?;
    identity
        .apply_capabilities(&planned)
        .map_err(|e| RootcellError::privilege("error setting capabilities", e))?;

    tracing::debug!(uid = user.uid, "setting uid");
    identity
        .set_uid(user.uid)
        .map_err(|e| RootcellError::privilege("error setting UID", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rootcell_common::spec::{LinuxCapabilities, SeccompAction, User};

    use super::*;
    use crate::capability::{CapKind, Capability};
    use crate::testing::{Call, FakeIdentity, FakeSecurity, Journal};

    fn process(uid: u32, gid: u32, additional_gids: Vec<u32>) -> Process {
        Process {
            user: User {
                uid,
                gid,
                additional_gids,
            },
            capabilities: Some(LinuxCapabilities {
                bounding: vec!["CAP_NET_BIND_SERVICE".into()],
                ..LinuxCapabilities::default()
            }),
            ..Process::default()
        }
    }

    fn allow_all() -> LinuxSeccomp {
        LinuxSeccomp {
            default_action: SeccompAction::Allow,
            default_errno_ret: None,
            syscalls: vec![],
        }
    }

    fn privileged(journal: &Journal) -> FakeIdentity {
        let fake = FakeIdentity::with_journal(journal);
        let mut current = CapabilitySet::default();
        for kind in CapKind::ALL {
            current.insert(kind, Capability::SETUID);
        }
        fake.set_current_capabilities(current);
        fake
    }

    #[test]
    fn reduces_in_the_safe_order() {
        let journal = Journal::default();
        let identity = privileged(&journal);
        let security = FakeSecurity::with_journal(&journal);
        reduce_privileges(&identity, &security, &process(1000, 1000, vec![]), Some(&allow_all()))
            .expect("reduce");

        let calls = journal.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], Call::SetGroups(vec![]));
        assert_eq!(calls[1], Call::SetGid(1000));
        assert_eq!(calls[2], Call::Seccomp);
        assert!(matches!(calls[3], Call::ApplyCapabilities(_)));
        assert_eq!(calls[4], Call::SetUid(1000));
    }

    #[test]
    fn non_root_target_keeps_setuid_transiently() {
        let journal = Journal::default();
        let identity = privileged(&journal);
        reduce_privileges(&identity, &FakeSecurity::default(), &process(1000, 1000, vec![]), None)
            .expect("reduce");
        let applied = identity.applied_capabilities().expect("applied");
        assert!(applied.has(CapKind::Bounding, Capability::NET_BIND_SERVICE));
        assert!(applied.has(CapKind::Bounding, Capability::SETUID));
        assert!(applied.has(CapKind::Permitted, Capability::SETUID));
        assert_eq!(applied.inheritable, 0);
    }

    #[test]
    fn root_target_keeps_nothing_extra() {
        let identity = privileged(&Journal::default());
        reduce_privileges(&identity, &FakeSecurity::default(), &process(0, 0, vec![]), None)
            .expect("reduce");
        let applied = identity.applied_capabilities().expect("applied");
        assert!(!applied.has(CapKind::Bounding, Capability::SETUID));
    }

    #[test]
    fn explicit_groups_are_set_exactly() {
        let identity = privileged(&Journal::default());
        identity.deny_setgroups();
        reduce_privileges(&identity, &FakeSecurity::default(), &process(5, 5, vec![10, 20]), None)
            .expect("reduce");
        assert_eq!(identity.calls()[0], Call::SetGroups(vec![10, 20]));
    }

    #[test]
    fn denied_setgroups_leaves_groups_alone() {
        let identity = privileged(&Journal::default());
        identity.deny_setgroups();
        reduce_privileges(&identity, &FakeSecurity::default(), &process(5, 5, vec![]), None)
            .expect("reduce");
        assert!(
            !identity
                .calls()
                .iter()
                .any(|c| matches!(c, Call::SetGroups(_)))
        );
    }

    #[test]
    fn no_new_privileges_precedes_seccomp() {
        let journal = Journal::default();
        let identity = privileged(&journal);
        let security = FakeSecurity::with_journal(&journal);
        let mut proc = process(0, 0, vec![]);
        proc.no_new_privileges = true;
        reduce_privileges(&identity, &security, &proc, Some(&allow_all())).expect("reduce");
        let calls = journal.calls();
        let nnp = calls.iter().position(|c| *c == Call::NoNewPrivileges);
        let seccomp = calls.iter().position(|c| *c == Call::Seccomp);
        assert!(nnp.is_some());
        assert!(nnp < seccomp);
    }

    #[test]
    fn failed_seccomp_keeps_capabilities_untouched() {
        let journal = Journal::default();
        let identity = privileged(&journal);
        let security = FakeSecurity::with_journal(&journal);
        security.fail_seccomp();
        let err = reduce_privileges(&identity, &security, &process(1, 1, vec![]), Some(&allow_all()))
            .expect_err("must fail");
        assert!(matches!(err, RootcellError::SecurityPolicy { .. }));
        assert!(identity.applied_capabilities().is_none());
    }

    #[test]
    fn failed_gid_change_stops_before_capabilities() {
        let identity = privileged(&Journal::default());
        identity.fail_set_gid(nix::errno::Errno::EPERM);
        let err = reduce_privileges(&identity, &FakeSecurity::default(), &process(1, 1, vec![]), None)
            .expect_err("must fail");
        assert!(matches!(err, RootcellError::Privilege { .. }));
        assert!(identity.applied_capabilities().is_none());
        assert!(!identity.calls().iter().any(|c| matches!(c, Call::SetUid(_))));
    }
}
