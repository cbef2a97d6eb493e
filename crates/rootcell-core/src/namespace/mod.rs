//! Namespace diagnostics.
//!
//! The bootstrap runs inside namespaces its caller already entered: a
//! fresh mount and UTS namespace, and possibly a user namespace. It can
//! neither create nor join any other kind, so requests for them are
//! reported rather than honored.

use rootcell_common::spec::{LinuxNamespace, NamespaceType};

fn label(kind: NamespaceType) -> &'static str {
    match kind {
        NamespaceType::Pid => "PID",
        NamespaceType::Network => "network",
        NamespaceType::Mount => "mount",
        NamespaceType::Ipc => "IPC",
        NamespaceType::Uts => "UTS",
        NamespaceType::User => "user",
        NamespaceType::Cgroup => "cgroup",
        NamespaceType::Time => "time",
    }
}

/// Describes every way the requested `namespaces` differ from the ones
/// actually in effect.
#[must_use]
pub fn diagnose(namespaces: &[LinuxNamespace]) -> Vec<String> {
    let mut notes = Vec::new();
    let mut saw_mount = false;
    let mut saw_uts = false;

    for ns in namespaces {
        let name = label(ns.ns_type);
        match (ns.ns_type, ns.path.as_deref()) {
            (NamespaceType::Mount | NamespaceType::Uts, path) => {
                if ns.ns_type == NamespaceType::Mount {
                    saw_mount = true;
                } else {
                    saw_uts = true;
                }
                if let Some(path) = path {
                    notes.push(format!(
                        "unable to join {name} namespace {:?}, creating a new one",
                        path.display().to_string()
                    ));
                }
            }
            (NamespaceType::User, Some(_)) => {
                notes.push(format!("unable to join {name} namespace"));
            }
            (NamespaceType::User, None) => {}
            (_, Some(_)) => notes.push(format!("unable to join {name} namespace")),
            (_, None) => notes.push(format!("unable to create {name} namespace")),
        }
    }

    if !saw_mount {
        notes.push("mount namespace not requested, but creating a new one anyway".to_string());
    }
    if !saw_uts {
        notes.push("UTS namespace not requested, but creating a new one anyway".to_string());
    }
    notes
}

/// Logs [`diagnose`] output at debug level.
pub fn log_diagnostics(namespaces: &[LinuxNamespace]) {
    for note in diagnose(namespaces) {
        tracing::debug!("{note}");
    }
}
