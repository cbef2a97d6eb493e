//! The bootstrap sequence.
//!
//! Every step after decoding is fatal on failure except the hostname,
//! which a seccomp profile may legitimately deny. Once the chroot has
//! happened the root path is no longer reachable, so the mount teardown
//! only runs for failures up to and including chroot entry; after that
//! the private mount namespace goes away with this process.

use rootcell_common::config::BootstrapConfig;
use rootcell_common::error::{Result, RootcellError};
use rootcell_core::filesystem::{self, CleanupHandle};
use rootcell_core::{identity, namespace, rlimit, security};

use crate::platform::Platform;

/// Runs one launch described by `config` and returns the exit status to
/// report.
///
/// `command` overrides `process.args` when non-empty.
///
/// # Errors
///
/// Returns the first fatal error; nothing has been executed when this
/// returns `Err`.
pub fn run(platform: &Platform, config: &BootstrapConfig, command: &[String]) -> Result<i32> {
    let (spec, process) = config.validated()?;
    let root = spec
        .root
        .as_ref()
        .map(|r| r.path.as_path())
        .ok_or_else(|| RootcellError::SpecValidation {
            message: "runtime spec has no root path".into(),
        })?;
    let linux = spec.linux_or_default();

    namespace::log_diagnostics(&linux.namespaces);

    if let Some(hostname) = spec.hostname.as_deref().filter(|h| !h.is_empty()) {
        if let Err(e) = platform.root.sethostname(hostname) {
            tracing::debug!(hostname, error = %e, "failed to set hostname for process");
        }
    }

    let (cleanup, mounted) =
        filesystem::setup_mounts(platform.mounts.clone(), root, &config.bundle_path, spec);
    mounted.map_err(|e| teardown(&cleanup, e))?;

    filesystem::enter_chroot(platform.root.as_ref(), root).map_err(|e| teardown(&cleanup, e))?;

    security::apply_mac_policy(platform.security.as_ref(), process)?;

    tracing::debug!("setting resource limits");
    rlimit::set_rlimits(platform.identity.as_ref(), &process.rlimits, false, false)?;

    let cwd = filesystem::enter_working_dir(platform.root.as_ref(), &process.cwd)?;

    identity::reduce_privileges(
        platform.identity.as_ref(),
        platform.security.as_ref(),
        process,
        linux.seccomp.as_ref(),
    )?;

    let args = if command.is_empty() {
        process.args.as_slice()
    } else {
        command
    };
    platform.launcher.launch(args, &process.env, &cwd)
}

fn teardown(cleanup: &CleanupHandle, err: RootcellError) -> RootcellError {
    if let Err(undo) = cleanup.run() {
        tracing::error!(root = %cleanup.root().display(), error = %undo, "error tearing down mounts");
    }
    err
}
