//! End-to-end tests for the bootstrap sequence.
//!
//! Every privileged seam is replaced by a recording fake sharing one
//! journal, so the tests assert the exact order of operations:
//! 1. Mount tree, then the verified chroot
//! 2. Security policy and resource limits
//! 3. Groups, GID, seccomp, capabilities, UID
//! 4. Launch and exit-status forwarding
//! 5. Teardown on early failure

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::rc::Rc;

use nix::errno::Errno;
use nix::sys::statvfs::FsFlags;
use rootcell_common::config::BootstrapConfig;
use rootcell_common::error::{Result, RootcellError};
use rootcell_core::capability::{CapKind, Capability, CapabilitySet};
use rootcell_core::filesystem::FileIdentity;
use rootcell_core::testing::{Call, FakeIdentity, FakeMounts, FakeRoot, FakeSecurity, Journal};
use rootcell_runtime::{Launcher, Platform};

const ROOT_ID: FileIdentity = FileIdentity { dev: 8, ino: 4242 };

struct FakeLauncher {
    journal: Journal,
    status: i32,
}

impl Launcher for FakeLauncher {
    fn launch(&self, args: &[String], _env: &[String], cwd: &Path) -> Result<i32> {
        self.journal.push(Call::Exec {
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        });
        Ok(self.status)
    }
}

struct Harness {
    journal: Journal,
    mounts: Rc<FakeMounts>,
    platform: Platform,
}

fn full_capabilities() -> CapabilitySet {
    CapabilitySet {
        bounding: u64::MAX,
        effective: u64::MAX,
        permitted: u64::MAX,
        inheritable: 0,
        ambient: 0,
    }
}

fn harness(root: &Path, after_chroot: FileIdentity, child_status: i32) -> Harness {
    let journal = Journal::default();
    let mounts = Rc::new(FakeMounts::with_journal(&journal));
    let chroot = FakeRoot::with_journal(&journal);
    chroot.set_identity(root, ROOT_ID);
    chroot.set_identity_after_chroot(after_chroot);
    let identity = FakeIdentity::with_journal(&journal);
    identity.set_current_capabilities(full_capabilities());
    let platform = Platform {
        mounts: mounts.clone(),
        root: Box::new(chroot),
        identity: Box::new(identity),
        security: Box::new(FakeSecurity::with_journal(&journal)),
        launcher: Box::new(FakeLauncher {
            journal: journal.clone(),
            status: child_status,
        }),
    };
    Harness {
        journal,
        mounts,
        platform,
    }
}

fn config(json: &serde_json::Value) -> BootstrapConfig {
    BootstrapConfig::from_reader(json.to_string().as_bytes()).expect("decode")
}

fn scenario() -> BootstrapConfig {
    config(&serde_json::json!({
        "Spec": {
            "root": {"path": "/rootfs"},
            "process": {
                "user": {"uid": 1000, "gid": 1000},
                "args": ["/usr/bin/server", "--port", "80"],
                "env": ["PATH=/usr/bin"],
                "cwd": "/",
                "capabilities": {"bounding": ["CAP_NET_BIND_SERVICE"]}
            },
            "linux": {"seccomp": {"defaultAction": "SCMP_ACT_ALLOW"}}
        },
        "BundlePath": "/run/bundle"
    }))
}

fn position(calls: &[Call], wanted: impl Fn(&Call) -> bool) -> usize {
    calls.iter().position(wanted).expect("call recorded")
}

// ── Full sequence ────────────────────────────────────────────────────

#[test]
fn scenario_reduces_privileges_in_order_and_forwards_exit_status() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 42);
    let status = rootcell_runtime::run(&h.platform, &scenario(), &[]).expect("bootstrap");
    assert_eq!(status, 42);

    let calls = h.journal.calls();
    let tail: Vec<_> = calls
        .iter()
        .skip_while(|c| !matches!(c, Call::SetGroups(_)))
        .cloned()
        .collect();
    assert_eq!(tail.len(), 6, "{tail:?}");
    assert_eq!(tail[0], Call::SetGroups(vec![]));
    assert_eq!(tail[1], Call::SetGid(1000));
    assert_eq!(tail[2], Call::Seccomp);
    let Call::ApplyCapabilities(applied) = tail[3] else {
        panic!("expected capabilities, got {:?}", tail[3]);
    };
    assert_eq!(tail[4], Call::SetUid(1000));
    assert_eq!(
        tail[5],
        Call::Exec {
            args: vec!["/usr/bin/server".into(), "--port".into(), "80".into()],
            cwd: PathBuf::from("/"),
        }
    );

    let bounding: Vec<_> = applied.iter(CapKind::Bounding).collect();
    assert_eq!(bounding, vec![Capability::SETUID, Capability::NET_BIND_SERVICE]);
    assert_eq!(applied.inheritable, 0);
    assert!(applied.has(CapKind::Permitted, Capability::SETUID));
}

#[test]
fn mounts_precede_chroot_which_precedes_privilege_changes() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    let _ = rootcell_runtime::run(&h.platform, &scenario(), &[]).expect("bootstrap");

    let calls = h.journal.calls();
    let first_mount = position(&calls, |c| matches!(c, Call::Mount { .. }));
    let last_mount = calls
        .iter()
        .rposition(|c| matches!(c, Call::Mount { .. }))
        .expect("mounted");
    let chroot = position(&calls, |c| *c == Call::Chroot(PathBuf::from("/rootfs")));
    let groups = position(&calls, |c| matches!(c, Call::SetGroups(_)));
    assert!(first_mount < last_mount);
    assert!(last_mount < chroot);
    assert!(chroot < groups);
    assert_eq!(calls[chroot - 1], Call::Chdir(PathBuf::from("/rootfs")));
    assert_eq!(calls[chroot + 1], Call::Chdir(PathBuf::from("/")));
}

#[test]
fn command_line_overrides_process_args() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    let command = vec!["/bin/true".to_string()];
    let _ = rootcell_runtime::run(&h.platform, &scenario(), &command).expect("bootstrap");
    let calls = h.journal.calls();
    assert!(calls.contains(&Call::Exec {
        args: command,
        cwd: PathBuf::from("/"),
    }));
}

#[test]
fn hostname_failure_is_not_fatal() {
    let journal = Journal::default();
    let chroot = FakeRoot::with_journal(&journal);
    chroot.set_identity("/rootfs", ROOT_ID);
    chroot.set_identity_after_chroot(ROOT_ID);
    chroot.fail_hostname(Errno::EPERM);
    let identity = FakeIdentity::with_journal(&journal);
    identity.set_current_capabilities(full_capabilities());
    let platform = Platform {
        mounts: Rc::new(FakeMounts::with_journal(&journal)),
        root: Box::new(chroot),
        identity: Box::new(identity),
        security: Box::new(FakeSecurity::with_journal(&journal)),
        launcher: Box::new(FakeLauncher {
            journal: journal.clone(),
            status: 0,
        }),
    };
    let mut cfg = scenario();
    if let Some(spec) = cfg.spec.as_mut() {
        spec.hostname = Some("sandbox".into());
    }
    let status = rootcell_runtime::run(&platform, &cfg, &[]).expect("bootstrap");
    assert_eq!(status, 0);
    assert_eq!(journal.calls()[0], Call::SetHostname("sandbox".into()));
}

#[test]
fn rlimits_and_policy_apply_before_privilege_reduction() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    let cfg = config(&serde_json::json!({
        "Spec": {
            "root": {"path": "/rootfs"},
            "process": {
                "user": {"uid": 0, "gid": 0},
                "args": ["/bin/sh"],
                "cwd": "srv/../work",
                "selinuxLabel": "system_u:system_r:container_t:s0",
                "rlimits": [{"type": "RLIMIT_NOFILE", "soft": 1024, "hard": 2048}]
            }
        }
    }));
    let _ = rootcell_runtime::run(&h.platform, &cfg, &[]).expect("bootstrap");

    let calls = h.journal.calls();
    let label = position(&calls, |c| matches!(c, Call::SelinuxLabel(_)));
    let rlimit = position(&calls, |c| matches!(c, Call::SetRlimit(..)));
    let cwd = position(&calls, |c| *c == Call::Chdir(PathBuf::from("/work")));
    let groups = position(&calls, |c| matches!(c, Call::SetGroups(_)));
    assert!(label < rlimit && rlimit < cwd && cwd < groups);
    assert!(!calls.contains(&Call::Seccomp));
    assert!(calls.contains(&Call::Exec {
        args: vec!["/bin/sh".into()],
        cwd: PathBuf::from("/work"),
    }));
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn replaced_root_aborts_before_any_privilege_change() {
    let h = harness(Path::new("/rootfs"), FileIdentity { dev: 8, ino: 1 }, 0);
    let err = rootcell_runtime::run(&h.platform, &scenario(), &[]).expect_err("must fail");
    assert!(matches!(err, RootcellError::ChrootIntegrity { .. }));
    assert_eq!(err.exit_code(), 1);

    let calls = h.journal.calls();
    assert!(!calls.iter().any(|c| matches!(
        c,
        Call::SetGroups(_) | Call::SetGid(_) | Call::SetUid(_) | Call::Exec { .. }
    )));
    assert_eq!(calls.last(), Some(&Call::Unmount(PathBuf::from("/rootfs"))));
}

#[test]
fn mount_failure_tears_down_and_never_chroots() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    h.mounts.fail_mount_on("/rootfs/sys", Errno::EPERM);
    let err = rootcell_runtime::run(&h.platform, &scenario(), &[]).expect_err("must fail");
    assert!(matches!(err, RootcellError::Mount { .. }));

    let calls = h.journal.calls();
    assert!(!calls.iter().any(|c| matches!(c, Call::Chroot(_))));
    assert_eq!(calls.last(), Some(&Call::Unmount(PathBuf::from("/rootfs"))));
}

#[test]
fn missing_process_is_rejected_before_any_call() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    let cfg = config(&serde_json::json!({"Spec": {"root": {"path": "/rootfs"}}}));
    let err = rootcell_runtime::run(&h.platform, &cfg, &[]).expect_err("must fail");
    assert!(matches!(err, RootcellError::SpecValidation { .. }));
    assert!(h.journal.calls().is_empty());
}

#[test]
fn unknown_capability_is_a_configuration_error() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    let cfg = config(&serde_json::json!({
        "Spec": {
            "root": {"path": "/rootfs"},
            "process": {
                "user": {"uid": 1000, "gid": 1000},
                "args": ["/bin/sh"],
                "capabilities": {"effective": ["CAP_TIME_TRAVEL"]}
            }
        }
    }));
    let err = rootcell_runtime::run(&h.platform, &cfg, &[]).expect_err("must fail");
    assert!(matches!(err, RootcellError::Configuration { .. }));
    assert!(!h.journal.calls().iter().any(|c| matches!(c, Call::SetUid(_))));
}

// ── Mount-tree properties through the orchestrator ──────────────────

#[test]
fn read_only_paths_are_idempotent_across_runs() {
    let h = harness(Path::new("/rootfs"), ROOT_ID, 0);
    let cfg = config(&serde_json::json!({
        "Spec": {
            "root": {"path": "/rootfs"},
            "process": {"args": ["/bin/sh"]},
            "linux": {"readonlyPaths": ["/proc/sys", "/proc/bus"]}
        }
    }));
    let _ = rootcell_runtime::run(&h.platform, &cfg, &[]).expect("first run");
    assert!(h.mounts.flags_of("/rootfs/proc/sys").contains(FsFlags::ST_RDONLY));

    h.journal.clear();
    let _ = rootcell_runtime::run(&h.platform, &cfg, &[]).expect("second run");
    let calls = h.journal.calls();
    let on_readonly_paths = calls.iter().filter(|c| {
        matches!(c, Call::Mount { target, .. }
            if target == Path::new("/rootfs/proc/sys") || target == Path::new("/rootfs/proc/bus"))
    });
    assert_eq!(on_readonly_paths.count(), 0);
}

#[test]
fn masked_paths_are_overmounted_inside_a_real_root() {
    let root = tempfile::tempdir().unwrap();
    let bundle = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("proc/acpi")).unwrap();
    std::fs::write(root.path().join("proc/kcore"), b"").unwrap();

    let h = harness(root.path(), ROOT_ID, 0);
    let cfg = config(&serde_json::json!({
        "Spec": {
            "root": {"path": root.path()},
            "process": {"args": ["/bin/sh"]},
            "linux": {"maskedPaths": ["/proc/acpi", "/proc/kcore"]}
        },
        "BundlePath": bundle.path()
    }));
    let _ = rootcell_runtime::run(&h.platform, &cfg, &[]).expect("bootstrap");

    let calls = h.journal.calls();
    let empty = bundle.path().join("empty");
    assert!(empty.is_dir());
    assert!(calls.iter().any(|c| matches!(c, Call::Mount { source: Some(s), target, .. }
        if *s == empty && *target == root.path().join("proc/acpi"))));
    assert!(calls.iter().any(|c| matches!(c, Call::Mount { source: Some(s), target, .. }
        if s == Path::new("/dev/null") && *target == root.path().join("proc/kcore"))));
}

#[test]
fn teardown_retries_busy_unmounts() {
    let h = harness(Path::new("/rootfs"), FileIdentity { dev: 1, ino: 1 }, 0);
    h.mounts.fail_unmounts(&[Errno::EBUSY, Errno::EBUSY, Errno::EBUSY]);
    let started = std::time::Instant::now();
    let _ = rootcell_runtime::run(&h.platform, &scenario(), &[]).expect_err("must fail");
    let unmounts = h
        .journal
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Unmount(_)))
        .count();
    assert_eq!(unmounts, 4);
    assert!(started.elapsed() >= std::time::Duration::from_millis(150));
}
