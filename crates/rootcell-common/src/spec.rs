//! The runtime specification consumed by the bootstrap.
//!
//! Field names follow the OCI runtime-spec `config.json` layout. The
//! bootstrap treats the decoded value as already validated: only the
//! fields it acts on are modelled, unknown fields are ignored.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level runtime specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    /// Root filesystem of the container.
    #[serde(default)]
    pub root: Option<Root>,
    /// The process to launch.
    #[serde(default)]
    pub process: Option<Process>,
    /// Hostname assigned inside the UTS namespace.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Ordered mount entries.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// Linux-specific configuration.
    #[serde(default)]
    pub linux: Option<Linux>,
}

impl RuntimeSpec {
    /// Returns the Linux section, or an empty one when absent.
    #[must_use]
    pub fn linux_or_default(&self) -> std::borrow::Cow<'_, Linux> {
        self.linux
            .as_ref()
            .map_or_else(|| std::borrow::Cow::Owned(Linux::default()), std::borrow::Cow::Borrowed)
    }
}

/// Root filesystem description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Root {
    /// Path to the root directory on the host.
    pub path: PathBuf,
}

/// Process descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Target identity.
    #[serde(default)]
    pub user: User,
    /// Command and arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` strings.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory inside the root.
    #[serde(default)]
    pub cwd: String,
    /// Capability sets.
    #[serde(default)]
    pub capabilities: Option<LinuxCapabilities>,
    /// Resource limits.
    #[serde(default)]
    pub rlimits: Vec<PosixRlimit>,
    /// AppArmor profile name.
    #[serde(default)]
    pub apparmor_profile: Option<String>,
    /// SELinux process label.
    #[serde(default)]
    pub selinux_label: Option<String>,
    /// Whether `no_new_privs` was requested.
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// Target user identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Target user ID.
    #[serde(default)]
    pub uid: u32,
    /// Target group ID.
    #[serde(default)]
    pub gid: u32,
    /// Supplementary group IDs.
    #[serde(default)]
    pub additional_gids: Vec<u32>,
}

/// Named capability lists, one per capability set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxCapabilities {
    /// Bounding set.
    #[serde(default)]
    pub bounding: Vec<String>,
    /// Effective set.
    #[serde(default)]
    pub effective: Vec<String>,
    /// Inheritable set. Ignored: the bootstrap always clears it.
    #[serde(default)]
    pub inheritable: Vec<String>,
    /// Permitted set.
    #[serde(default)]
    pub permitted: Vec<String>,
    /// Ambient set.
    #[serde(default)]
    pub ambient: Vec<String>,
}

/// A single POSIX resource limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixRlimit {
    /// Limit name, e.g. `RLIMIT_NOFILE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Hard limit.
    pub hard: u64,
    /// Soft limit.
    pub soft: u64,
}

/// A mount entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Absolute destination inside the root.
    pub destination: PathBuf,
    /// Filesystem type (`bind`, `tmpfs`, `overlay`, ...).
    #[serde(rename = "type", default)]
    pub mount_type: Option<String>,
    /// Source path or device.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Mount option tokens.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Linux-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// User ID mappings for the user namespace.
    #[serde(default)]
    pub uid_mappings: Vec<LinuxIdMapping>,
    /// Group ID mappings for the user namespace.
    #[serde(default)]
    pub gid_mappings: Vec<LinuxIdMapping>,
    /// Requested namespaces.
    #[serde(default)]
    pub namespaces: Vec<LinuxNamespace>,
    /// Syscall filter.
    #[serde(default)]
    pub seccomp: Option<LinuxSeccomp>,
    /// Paths to make read-only.
    #[serde(default)]
    pub readonly_paths: Vec<PathBuf>,
    /// Paths to mask.
    #[serde(default)]
    pub masked_paths: Vec<PathBuf>,
}

/// A contiguous ID mapping range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxIdMapping {
    /// First ID inside the container.
    #[serde(rename = "containerID")]
    pub container_id: u32,
    /// First ID on the host.
    #[serde(rename = "hostID")]
    pub host_id: u32,
    /// Number of IDs in the range.
    pub size: u32,
}

impl LinuxIdMapping {
    /// Returns `true` when `id` falls inside the container side of the range.
    #[must_use]
    pub fn contains_container_id(&self, id: u32) -> bool {
        id >= self.container_id && u64::from(id) < u64::from(self.container_id) + u64::from(self.size)
    }
}

/// Namespace kinds named by the runtime spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// Mount namespace.
    Mount,
    /// IPC namespace.
    Ipc,
    /// UTS namespace.
    Uts,
    /// User namespace.
    User,
    /// Cgroup namespace.
    Cgroup,
    /// Time namespace.
    Time,
}

/// A requested namespace, optionally joined by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxNamespace {
    /// Namespace kind.
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
    /// Path of an existing namespace to join.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Seccomp section of the runtime spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxSeccomp {
    /// Action for syscalls not matched by any rule.
    pub default_action: SeccompAction,
    /// Errno returned by `SCMP_ACT_ERRNO` default actions.
    #[serde(default)]
    pub default_errno_ret: Option<u32>,
    /// Per-syscall rules.
    #[serde(default)]
    pub syscalls: Vec<LinuxSyscall>,
}

/// A seccomp rule for a group of syscalls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxSyscall {
    /// Syscall names.
    pub names: Vec<String>,
    /// Action when matched.
    pub action: SeccompAction,
    /// Errno returned by `SCMP_ACT_ERRNO`.
    #[serde(default)]
    pub errno_ret: Option<u32>,
    /// Argument conditions, all of which must hold.
    #[serde(default)]
    pub args: Vec<LinuxSeccompArg>,
}

/// Seccomp actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeccompAction {
    /// Kill the calling thread.
    #[serde(rename = "SCMP_ACT_KILL")]
    Kill,
    /// Kill the whole process.
    #[serde(rename = "SCMP_ACT_KILL_PROCESS")]
    KillProcess,
    /// Kill the calling thread.
    #[serde(rename = "SCMP_ACT_KILL_THREAD")]
    KillThread,
    /// Deliver `SIGSYS`.
    #[serde(rename = "SCMP_ACT_TRAP")]
    Trap,
    /// Fail with an errno.
    #[serde(rename = "SCMP_ACT_ERRNO")]
    Errno,
    /// Notify a tracer.
    #[serde(rename = "SCMP_ACT_TRACE")]
    Trace,
    /// Allow the syscall.
    #[serde(rename = "SCMP_ACT_ALLOW")]
    Allow,
    /// Allow and log.
    #[serde(rename = "SCMP_ACT_LOG")]
    Log,
    /// Forward to a user-space supervisor.
    #[serde(rename = "SCMP_ACT_NOTIFY")]
    Notify,
}

/// A seccomp argument condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxSeccompArg {
    /// Argument index (0-5).
    pub index: u8,
    /// Value compared against.
    pub value: u64,
    /// Second value, used as the mask by `SCMP_CMP_MASKED_EQ`.
    #[serde(default)]
    pub value_two: u64,
    /// Comparison operator.
    pub op: SeccompOperator,
}

/// Seccomp comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeccompOperator {
    /// Not equal.
    #[serde(rename = "SCMP_CMP_NE")]
    NotEqual,
    /// Less than.
    #[serde(rename = "SCMP_CMP_LT")]
    LessThan,
    /// Less than or equal.
    #[serde(rename = "SCMP_CMP_LE")]
    LessOrEqual,
    /// Equal.
    #[serde(rename = "SCMP_CMP_EQ")]
    Equal,
    /// Greater than or equal.
    #[serde(rename = "SCMP_CMP_GE")]
    GreaterOrEqual,
    /// Greater than.
    #[serde(rename = "SCMP_CMP_GT")]
    GreaterThan,
    /// Equal after masking with `value_two`.
    #[serde(rename = "SCMP_CMP_MASKED_EQ")]
    MaskedEqual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_oci_field_names() {
        let json = r#"{
            "root": {"path": "/rootfs"},
            "process": {
                "user": {"uid": 1000, "gid": 1000, "additionalGids": [10]},
                "cwd": "work",
                "env": ["PATH=/bin"],
                "capabilities": {"bounding": ["CAP_NET_BIND_SERVICE"]},
                "rlimits": [{"type": "RLIMIT_NOFILE", "hard": 1024, "soft": 512}],
                "apparmorProfile": "container-default"
            },
            "mounts": [{"destination": "/tmp", "type": "tmpfs", "source": "tmpfs", "options": ["nosuid"]}],
            "linux": {
                "uidMappings": [{"containerID": 0, "hostID": 100000, "size": 65536}],
                "namespaces": [{"type": "mount"}, {"type": "network", "path": "/proc/1/ns/net"}],
                "maskedPaths": ["/proc/kcore"],
                "readonlyPaths": ["/proc/sys"],
                "seccomp": {
                    "defaultAction": "SCMP_ACT_ERRNO",
                    "syscalls": [{"names": ["ptrace"], "action": "SCMP_ACT_KILL_PROCESS",
                                  "args": [{"index": 0, "value": 16, "op": "SCMP_CMP_EQ"}]}]
                }
            }
        }"#;
        let spec: RuntimeSpec = serde_json::from_str(json).expect("decode");
        let process = spec.process.as_ref().expect("process");
        assert_eq!(process.user.additional_gids, vec![10]);
        assert_eq!(process.rlimits[0].kind, "RLIMIT_NOFILE");
        assert_eq!(process.apparmor_profile.as_deref(), Some("container-default"));
        assert_eq!(spec.mounts[0].mount_type.as_deref(), Some("tmpfs"));

        let linux = spec.linux.as_ref().expect("linux");
        assert_eq!(linux.uid_mappings[0].host_id, 100_000);
        assert_eq!(linux.namespaces[1].ns_type, NamespaceType::Network);
        let seccomp = linux.seccomp.as_ref().expect("seccomp");
        assert_eq!(seccomp.default_action, SeccompAction::Errno);
        assert_eq!(seccomp.syscalls[0].args[0].op, SeccompOperator::Equal);
    }

    #[test]
    fn fields_outside_the_bootstrap_are_ignored() {
        let json = r#"{
            "ociVersion": "1.0.2",
            "root": {"path": "/rootfs", "readonly": true},
            "process": {"terminal": true, "user": {"uid": 0, "gid": 0}, "cwd": "/"},
            "annotations": {"io.example": "x"},
            "linux": {"seccomp": {"defaultAction": "SCMP_ACT_ALLOW",
                                  "architectures": ["SCMP_ARCH_X86_64"]}}
        }"#;
        let spec: RuntimeSpec = serde_json::from_str(json).expect("decode");
        assert_eq!(spec.root.as_ref().expect("root").path, PathBuf::from("/rootfs"));
        let seccomp = spec.linux_or_default().into_owned().seccomp.expect("seccomp");
        assert_eq!(seccomp.default_action, SeccompAction::Allow);
        assert!(seccomp.syscalls.is_empty());
    }

    #[test]
    fn id_mapping_range_is_half_open() {
        let mapping = LinuxIdMapping {
            container_id: 1000,
            host_id: 0,
            size: 10,
        };
        assert!(mapping.contains_container_id(1000));
        assert!(mapping.contains_container_id(1009));
        assert!(!mapping.contains_container_id(1010));
        assert!(!mapping.contains_container_id(999));
    }

    #[test]
    fn missing_linux_section_defaults_to_empty() {
        let spec = RuntimeSpec::default();
        assert!(spec.linux_or_default().masked_paths.is_empty());
    }
}
