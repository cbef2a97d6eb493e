//! Resource limits.

use nix::sys::resource::Resource;
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::PosixRlimit;

use crate::identity::IdentitySyscalls;
use crate::lookup;

/// One resource limit to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitEntry {
    /// Kernel resource identifier.
    pub resource: Resource,
    /// Soft limit.
    pub soft: u64,
    /// Hard limit.
    pub hard: u64,
}

impl RlimitEntry {
    /// Resolves a spec entry through the resource-limit table.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::Configuration`] if the type name is unknown.
    pub fn from_spec(limit: &PosixRlimit) -> Result<Self> {
        let resource = lookup::rlimits().resolve(&limit.kind).ok_or_else(|| {
            RootcellError::config(format!("error finding limit for {:?}", limit.kind))
        })?;
        Ok(Self {
            resource,
            soft: limit.soft,
            hard: limit.hard,
        })
    }

    fn name(&self) -> &'static str {
        lookup::rlimits().name_of(self.resource).unwrap_or("RLIMIT_?")
    }
}

/// Applies `limits` in order.
///
/// With `only_lower`, entries that would raise the current hard limit are
/// skipped; with `only_raise`, entries that would lower it are skipped.
/// Only the hard limit takes part in the comparison.
///
/// # Errors
///
/// Returns [`RootcellError::Configuration`] for an unknown limit name and
/// [`RootcellError::Privilege`] if reading or setting a limit fails.
pub fn set_rlimits(
    ops: &dyn IdentitySyscalls,
    limits: &[PosixRlimit],
    only_lower: bool,
    only_raise: bool,
) -> Result<()> {
    for limit in limits {
        let entry = RlimitEntry::from_spec(limit)?;
        let (_, current_hard) = ops.getrlimit(entry.resource).map_err(|e| {
            RootcellError::privilege(format!("error reading current {}", entry.name()), e)
        })?;
        if only_lower && entry.hard > current_hard {
            tracing::debug!(limit = entry.name(), current_hard, hard = entry.hard, "not raising hard limit");
            continue;
        }
        if only_raise && entry.hard < current_hard {
            tracing::debug!(limit = entry.name(), current_hard, hard = entry.hard, "not lowering hard limit");
            continue;
        }
        ops.setrlimit(entry.resource, entry.soft, entry.hard)
            .map_err(|e| {
                RootcellError::privilege(
                    format!("error setting {} to soft={}, hard={}", entry.name(), entry.soft, entry.hard),
                    e,
                )
            })?;
        tracing::debug!(limit = entry.name(), soft = entry.soft, hard = entry.hard, "set resource limit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeIdentity};

    fn limit(kind: &str, soft: u64, hard: u64) -> PosixRlimit {
        PosixRlimit {
            kind: kind.to_string(),
            soft,
            hard,
        }
    }

    fn applied(fake: &FakeIdentity) -> Vec<(Resource, u64, u64)> {
        fake.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetRlimit(r, s, h) => Some((r, s, h)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn applies_every_limit_without_gating() {
        let fake = FakeIdentity::default();
        fake.set_current_rlimit(Resource::RLIMIT_NOFILE, 1024, 4096);
        set_rlimits(
            &fake,
            &[limit("RLIMIT_NOFILE", 8192, 8192), limit("rlimit_core", 0, 0)],
            false,
            false,
        )
        .expect("apply");
        assert_eq!(
            applied(&fake),
            vec![
                (Resource::RLIMIT_NOFILE, 8192, 8192),
                (Resource::RLIMIT_CORE, 0, 0),
            ]
        );
    }

    #[test]
    fn only_lower_skips_raising_the_hard_limit() {
        let fake = FakeIdentity::default();
        fake.set_current_rlimit(Resource::RLIMIT_NOFILE, 1024, 4096);
        set_rlimits(&fake, &[limit("RLIMIT_NOFILE", 8192, 8192)], true, false).expect("apply");
        assert!(applied(&fake).is_empty());

        set_rlimits(&fake, &[limit("RLIMIT_NOFILE", 512, 2048)], true, false).expect("apply");
        assert_eq!(applied(&fake), vec![(Resource::RLIMIT_NOFILE, 512, 2048)]);
    }

    #[test]
    fn only_raise_skips_lowering_the_hard_limit() {
        let fake = FakeIdentity::default();
        fake.set_current_rlimit(Resource::RLIMIT_NPROC, 100, 200);
        set_rlimits(&fake, &[limit("RLIMIT_NPROC", 50, 100)], false, true).expect("apply");
        assert!(applied(&fake).is_empty());
    }

    #[test]
    fn unknown_limit_name_is_fatal() {
        let fake = FakeIdentity::default();
        let err = set_rlimits(&fake, &[limit("RLIMIT_PATIENCE", 1, 1)], false, false)
            .expect_err("must fail");
        assert!(matches!(err, RootcellError::Configuration { .. }));
        assert!(err.to_string().contains("RLIMIT_PATIENCE"));
    }
}
