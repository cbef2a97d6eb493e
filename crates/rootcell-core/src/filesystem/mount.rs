//! Mount primitives: the syscall seam, flag translation, and host mount
//! enumeration.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};
use nix::sys::statvfs::FsFlags;
use rootcell_common::constants::MOUNTINFO_PATH;
use rootcell_common::error::{Result, RootcellError};

/// Shared by every bind the builder performs.
pub const COMMON_FLAGS: MsFlags = MsFlags::MS_BIND
    .union(MsFlags::MS_REC)
    .union(MsFlags::MS_PRIVATE);

/// Starting request flags for caller-specified mounts.
pub const BIND_FLAGS: MsFlags = COMMON_FLAGS.union(MsFlags::MS_NODEV);

/// Flags for the host `/dev` bind.
pub const DEV_FLAGS: MsFlags = COMMON_FLAGS
    .union(MsFlags::MS_NOEXEC)
    .union(MsFlags::MS_NOSUID)
    .union(MsFlags::MS_RDONLY);

/// Flags for the host `/proc` bind.
pub const PROC_FLAGS: MsFlags = DEV_FLAGS.union(MsFlags::MS_NODEV);

/// Flags for the host `/sys` bind and its submounts.
pub const SYS_FLAGS: MsFlags = DEV_FLAGS.union(MsFlags::MS_NODEV);

/// Flags used to make a path read-only in place.
pub const READ_ONLY_FLAGS: MsFlags = MsFlags::MS_NODEV
    .union(MsFlags::MS_NOEXEC)
    .union(MsFlags::MS_NOSUID)
    .union(MsFlags::MS_RDONLY);

/// Mount-related system calls used by the builder and the teardown handle.
pub trait MountSyscalls {
    /// `mount(2)`.
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> nix::Result<()>;

    /// `umount2(2)` with `MNT_DETACH`.
    fn unmount_detach(&self, target: &Path) -> nix::Result<()>;

    /// Mount flags reported by `statvfs(3)` for `path`.
    fn statfs_flags(&self, path: &Path) -> nix::Result<FsFlags>;

    /// Mountpoints of the host mount table.
    fn host_mountpoints(&self) -> Result<Vec<PathBuf>>;
}

/// [`MountSyscalls`] backed by the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxMounts;

impl MountSyscalls for LinuxMounts {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> nix::Result<()> {
        nix::mount::mount(source, target, fstype, flags, data)
    }

    fn unmount_detach(&self, target: &Path) -> nix::Result<()> {
        nix::mount::umount2(target, MntFlags::MNT_DETACH)
    }

    fn statfs_flags(&self, path: &Path) -> nix::Result<FsFlags> {
        nix::sys::statvfs::statvfs(path).map(|st| st.flags())
    }

    fn host_mountpoints(&self) -> Result<Vec<PathBuf>> {
        let content = std::fs::read_to_string(MOUNTINFO_PATH)
            .map_err(|e| RootcellError::mount(format!("error reading {MOUNTINFO_PATH}"), e))?;
        Ok(parse_mountinfo(&content))
    }
}

/// Request flags paired with the `statvfs` flags they should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountFlags {
    /// Flags passed to `mount(2)`.
    pub request: MsFlags,
    /// Flags that must be visible through `statvfs(3)` afterwards.
    pub expected: FsFlags,
}

impl MountFlags {
    /// Translates option tokens, starting from [`BIND_FLAGS`].
    ///
    /// Only the `nodev`, `noexec`, `nosuid`, and `ro` axes are recognized;
    /// the last token on each axis wins.
    pub fn from_options<S: AsRef<str>>(options: &[S]) -> Self {
        let mut flags = Self {
            request: BIND_FLAGS,
            expected: FsFlags::empty(),
        };
        for option in options {
            let (set, ms, st) = match option.as_ref() {
                "nodev" => (true, MsFlags::MS_NODEV, FsFlags::ST_NODEV),
                "dev" => (false, MsFlags::MS_NODEV, FsFlags::ST_NODEV),
                "noexec" => (true, MsFlags::MS_NOEXEC, FsFlags::ST_NOEXEC),
                "exec" => (false, MsFlags::MS_NOEXEC, FsFlags::ST_NOEXEC),
                "nosuid" => (true, MsFlags::MS_NOSUID, FsFlags::ST_NOSUID),
                "suid" => (false, MsFlags::MS_NOSUID, FsFlags::ST_NOSUID),
                "ro" => (true, MsFlags::MS_RDONLY, FsFlags::ST_RDONLY),
                "rw" => (false, MsFlags::MS_RDONLY, FsFlags::ST_RDONLY),
                _ => continue,
            };
            flags.request.set(ms, set);
            flags.expected.set(st, set);
        }
        flags
    }

    /// Returns `true` when `actual` carries every expected flag.
    #[must_use]
    pub const fn satisfied_by(&self, actual: FsFlags) -> bool {
        actual.contains(self.expected)
    }
}

/// Filesystem mount options split the way `mount(8)` splits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsOptions {
    /// Flags for the mount call itself.
    pub flags: MsFlags,
    /// Propagation change applied by a second call.
    pub propagation: MsFlags,
    /// Filesystem-specific data, comma separated.
    pub data: String,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            flags: MsFlags::empty(),
            propagation: MsFlags::empty(),
            data: String::new(),
        }
    }
}

const FLAG_OPTIONS: &[(&str, bool, MsFlags)] = &[
    ("defaults", false, MsFlags::empty()),
    ("ro", false, MsFlags::MS_RDONLY),
    ("rw", true, MsFlags::MS_RDONLY),
    ("suid", true, MsFlags::MS_NOSUID),
    ("nosuid", false, MsFlags::MS_NOSUID),
    ("dev", true, MsFlags::MS_NODEV),
    ("nodev", false, MsFlags::MS_NODEV),
    ("exec", true, MsFlags::MS_NOEXEC),
    ("noexec", false, MsFlags::MS_NOEXEC),
    ("sync", false, MsFlags::MS_SYNCHRONOUS),
    ("async", true, MsFlags::MS_SYNCHRONOUS),
    ("dirsync", false, MsFlags::MS_DIRSYNC),
    ("remount", false, MsFlags::MS_REMOUNT),
    ("mand", false, MsFlags::MS_MANDLOCK),
    ("nomand", true, MsFlags::MS_MANDLOCK),
    ("atime", true, MsFlags::MS_NOATIME),
    ("noatime", false, MsFlags::MS_NOATIME),
    ("diratime", true, MsFlags::MS_NODIRATIME),
    ("nodiratime", false, MsFlags::MS_NODIRATIME),
    ("bind", false, MsFlags::MS_BIND),
    ("rbind", false, MsFlags::MS_BIND.union(MsFlags::MS_REC)),
    ("relatime", false, MsFlags::MS_RELATIME),
    ("norelatime", true, MsFlags::MS_RELATIME),
    ("strictatime", false, MsFlags::MS_STRICTATIME),
    ("nostrictatime", true, MsFlags::MS_STRICTATIME),
];

const PROPAGATION_OPTIONS: &[(&str, MsFlags)] = &[
    ("private", MsFlags::MS_PRIVATE),
    ("rprivate", MsFlags::MS_PRIVATE.union(MsFlags::MS_REC)),
    ("shared", MsFlags::MS_SHARED),
    ("rshared", MsFlags::MS_SHARED.union(MsFlags::MS_REC)),
    ("slave", MsFlags::MS_SLAVE),
    ("rslave", MsFlags::MS_SLAVE.union(MsFlags::MS_REC)),
    ("unbindable", MsFlags::MS_UNBINDABLE),
    ("runbindable", MsFlags::MS_UNBINDABLE.union(MsFlags::MS_REC)),
];

/// Splits `options` into mount flags, propagation flags, and data.
///
/// Unrecognized tokens (`size=64m`, `lowerdir=...`) become data.
pub fn parse_fs_options<S: AsRef<str>>(options: &[S]) -> FsOptions {
    let mut parsed = FsOptions::default();
    let mut data = Vec::new();
    for option in options {
        let option = option.as_ref();
        if let Some(&(_, clear, flag)) = FLAG_OPTIONS.iter().find(|(name, ..)| *name == option) {
            parsed.flags.set(flag, !clear);
        } else if let Some(&(_, flag)) = PROPAGATION_OPTIONS.iter().find(|(name, _)| *name == option)
        {
            parsed.propagation |= flag;
        } else if !option.is_empty() {
            data.push(option);
        }
    }
    parsed.data = data.join(",");
    parsed
}

/// Extracts mountpoints from `/proc/self/mountinfo` content.
pub fn parse_mountinfo(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

// mountinfo escapes space, tab, newline, and backslash as \ooo.
fn unescape_octal(field: &str) -> OsString {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    OsString::from_vec(out)
}

/// Returns `true` for `prefix` itself and any path below it.
pub fn is_at_or_below(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}
