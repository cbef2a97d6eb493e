//! Static name-to-identifier tables for capabilities and resource limits.
//!
//! Both tables are built once on first use and never mutated. Names are
//! matched case-insensitively.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::OnceLock;

use nix::sys::resource::Resource;

use crate::capability::Capability;

/// Immutable bidirectional mapping between names and kernel identifiers.
#[derive(Debug)]
pub struct LookupTable<V> {
    by_name: HashMap<String, V>,
    by_value: HashMap<V, &'static str>,
}

impl<V: Copy + Eq + Hash> LookupTable<V> {
    fn new(entries: &[(&'static str, V)]) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_value = HashMap::with_capacity(entries.len());
        for &(name, value) in entries {
            let _ = by_name.insert(name.to_ascii_uppercase(), value);
            let _ = by_value.insert(value, name);
        }
        Self { by_name, by_value }
    }

    /// Resolves a name, ignoring ASCII case.
    pub fn resolve(&self, name: &str) -> Option<V> {
        self.by_name.get(&name.to_ascii_uppercase()).copied()
    }

    /// Returns the canonical name of an identifier.
    pub fn name_of(&self, value: V) -> Option<&'static str> {
        self.by_value.get(&value).copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

const CAPABILITY_NAMES: [&str; 41] = [
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// Highest capability number in the capability table.
#[allow(clippy::cast_possible_truncation)]
pub const LAST_KNOWN_CAPABILITY: u8 = (CAPABILITY_NAMES.len() - 1) as u8;

/// Returns the capability table.
pub fn capabilities() -> &'static LookupTable<Capability> {
    static TABLE: OnceLock<LookupTable<Capability>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries: Vec<_> = (0..=LAST_KNOWN_CAPABILITY)
            .map(|n| (CAPABILITY_NAMES[usize::from(n)], Capability::from_raw(n)))
            .collect();
        LookupTable::new(&entries)
    })
}

/// Returns the resource-limit table.
pub fn rlimits() -> &'static LookupTable<Resource> {
    static TABLE: OnceLock<LookupTable<Resource>> = OnceLock::new();
    TABLE.get_or_init(|| {
        LookupTable::new(&[
            ("RLIMIT_AS", Resource::RLIMIT_AS),
            ("RLIMIT_CORE", Resource::RLIMIT_CORE),
            ("RLIMIT_CPU", Resource::RLIMIT_CPU),
            ("RLIMIT_DATA", Resource::RLIMIT_DATA),
            ("RLIMIT_FSIZE", Resource::RLIMIT_FSIZE),
            ("RLIMIT_LOCKS", Resource::RLIMIT_LOCKS),
            ("RLIMIT_MEMLOCK", Resource::RLIMIT_MEMLOCK),
            ("RLIMIT_MSGQUEUE", Resource::RLIMIT_MSGQUEUE),
            ("RLIMIT_NICE", Resource::RLIMIT_NICE),
            ("RLIMIT_NOFILE", Resource::RLIMIT_NOFILE),
            ("RLIMIT_NPROC", Resource::RLIMIT_NPROC),
            ("RLIMIT_RSS", Resource::RLIMIT_RSS),
            ("RLIMIT_RTPRIO", Resource::RLIMIT_RTPRIO),
            ("RLIMIT_RTTIME", Resource::RLIMIT_RTTIME),
            ("RLIMIT_SIGPENDING", Resource::RLIMIT_SIGPENDING),
            ("RLIMIT_STACK", Resource::RLIMIT_STACK),
        ])
    })
}
