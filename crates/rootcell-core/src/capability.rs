//! Linux capability planning and application.
//!
//! The target sets are computed strictly from the runtime spec. Extra
//! "keep" capabilities can be folded in to survive the final UID change,
//! but only those the current process already holds: planning never
//! grants authority, it only preserves it.

use std::fmt;
use std::io;

use rootcell_common::constants::CAP_LAST_CAP_PATH;
use rootcell_common::error::{Result, RootcellError};
use rootcell_common::spec::LinuxCapabilities;

use crate::lookup::{self, LAST_KNOWN_CAPABILITY};

/// A Linux capability number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(u8);

impl Capability {
    /// Allow changing user IDs.
    pub const SETUID: Self = Self(7);
    /// Allow modifying capability bounding sets.
    pub const SETPCAP: Self = Self(8);
    /// Allow binding to privileged ports (< 1024).
    pub const NET_BIND_SERVICE: Self = Self(10);
    /// Allow the full set of administrative operations.
    pub const SYS_ADMIN: Self = Self(21);

    /// Wraps a raw capability number.
    #[must_use]
    pub const fn from_raw(n: u8) -> Self {
        Self(n)
    }

    /// Raw capability number.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    const fn bit(self) -> u64 {
        1 << self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match lookup::capabilities().name_of(*self) {
            Some(name) => f.write_str(name),
            None => write!(f, "cap_{}", self.0),
        }
    }
}

/// The five capability sets of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapKind {
    /// Bounding set.
    Bounding,
    /// Effective set.
    Effective,
    /// Permitted set.
    Permitted,
    /// Inheritable set.
    Inheritable,
    /// Ambient set.
    Ambient,
}

impl CapKind {
    /// All kinds, in application order.
    pub const ALL: [Self; 5] = [
        Self::Bounding,
        Self::Effective,
        Self::Permitted,
        Self::Inheritable,
        Self::Ambient,
    ];
}

/// Bitmask snapshot of all five capability sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    /// Bounding set.
    pub bounding: u64,
    /// Effective set.
    pub effective: u64,
    /// Permitted set.
    pub permitted: u64,
    /// Inheritable set.
    pub inheritable: u64,
    /// Ambient set.
    pub ambient: u64,
}

impl CapabilitySet {
    const fn mask(&self, kind: CapKind) -> u64 {
        match kind {
            CapKind::Bounding => self.bounding,
            CapKind::Effective => self.effective,
            CapKind::Permitted => self.permitted,
            CapKind::Inheritable => self.inheritable,
            CapKind::Ambient => self.ambient,
        }
    }

    const fn mask_mut(&mut self, kind: CapKind) -> &mut u64 {
        match kind {
            CapKind::Bounding => &mut self.bounding,
            CapKind::Effective => &mut self.effective,
            CapKind::Permitted => &mut self.permitted,
            CapKind::Inheritable => &mut self.inheritable,
            CapKind::Ambient => &mut self.ambient,
        }
    }

    /// Returns `true` if `cap` is in the `kind` set.
    #[must_use]
    pub const fn has(&self, kind: CapKind, cap: Capability) -> bool {
        self.mask(kind) & cap.bit() != 0
    }

    /// Adds `cap` to the `kind` set.
    pub const fn insert(&mut self, kind: CapKind, cap: Capability) {
        *self.mask_mut(kind) |= cap.bit();
    }

    /// Capabilities present in the `kind` set, in ascending order.
    pub fn iter(&self, kind: CapKind) -> impl Iterator<Item = Capability> + '_ {
        (0..64u8)
            .map(Capability)
            .filter(move |cap| self.has(kind, *cap))
    }
}

/// Capabilities that must survive the final UID change.
///
/// Dropping to a non-zero UID needs `CAP_SETUID` for the `setresuid(2)`
/// call itself.
#[must_use]
pub fn transient_keep(target_uid: u32) -> &'static [&'static str] {
    if target_uid == 0 { &[] } else { &["CAP_SETUID"] }
}

fn resolve(name: &str) -> Result<Capability> {
    lookup::capabilities()
        .resolve(name)
        .ok_or_else(|| RootcellError::config(format!("error mapping capability {name:?} to a number")))
}

/// Computes the capability sets to apply.
///
/// Bounding, effective, permitted, and ambient come from `requested`;
/// inheritable is always empty. Each `keep` capability is added to a set
/// only when `current` already holds it in that same set.
///
/// # Errors
///
/// Returns [`RootcellError::Configuration`] for any name missing from the
/// capability table.
pub fn plan_capabilities(
    requested: Option<&LinuxCapabilities>,
    keep: &[&str],
    current: &CapabilitySet,
) -> Result<CapabilitySet> {
    let empty = LinuxCapabilities::default();
    let requested = requested.unwrap_or(&empty);
    let keep = keep.iter().map(|name| resolve(name)).collect::<Result<Vec<_>>>()?;

    let mut planned = CapabilitySet::default();
    for kind in CapKind::ALL {
        let names: &[String] = match kind {
            CapKind::Bounding => &requested.bounding,
            CapKind::Effective => &requested.effective,
            CapKind::Permitted => &requested.permitted,
            CapKind::Ambient => &requested.ambient,
            CapKind::Inheritable => continue,
        };
        for name in names {
            planned.insert(kind, resolve(name)?);
        }
        for &cap in &keep {
            if current.has(kind, cap) {
                planned.insert(kind, cap);
            }
        }
    }
    Ok(planned)
}

/// Highest capability number supported by the running kernel.
pub fn last_capability() -> Capability {
    let from_kernel = std::fs::read_to_string(CAP_LAST_CAP_PATH)
        .ok()
        .and_then(|s| s.trim().parse::<u8>().ok())
        .filter(|&n| n < 64);
    Capability(from_kernel.unwrap_or(LAST_KNOWN_CAPABILITY))
}

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

#[allow(clippy::cast_possible_truncation)]
const fn split(mask: u64) -> (u32, u32) {
    (mask as u32, (mask >> 32) as u32)
}

const fn join(low: u32, high: u32) -> u64 {
    (low as u64) | ((high as u64) << 32)
}

fn prctl(option: libc::c_int, arg2: libc::c_ulong, arg3: libc::c_ulong) -> io::Result<libc::c_int> {
    // SAFETY: the capability prctl options read or modify only the calling
    // thread's credentials and take integer arguments.
    let ret = unsafe { libc::prctl(option, arg2, arg3, 0 as libc::c_ulong, 0 as libc::c_ulong) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Reads all five capability sets of the calling thread.
///
/// # Errors
///
/// Returns the system error if `capget(2)` fails.
pub fn read_current() -> io::Result<CapabilitySet> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];
    // SAFETY: header and data are valid for the kernel to read and write;
    // version 3 expects exactly two data elements.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &raw mut header,
            data.as_mut_ptr(),
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut set = CapabilitySet {
        effective: join(data[0].effective, data[1].effective),
        permitted: join(data[0].permitted, data[1].permitted),
        inheritable: join(data[0].inheritable, data[1].inheritable),
        ..CapabilitySet::default()
    };
    read_per_capability(last_capability(), &mut set, prctl)?;
    Ok(set)
}

type Prctl = fn(libc::c_int, libc::c_ulong, libc::c_ulong) -> io::Result<libc::c_int>;

// The first EINVAL from PR_CAPBSET_READ marks the end of what the running
// kernel knows, which can be below `last` when cap_last_cap is unreadable.
fn read_per_capability(last: Capability, set: &mut CapabilitySet, prctl: Prctl) -> io::Result<()> {
    for n in 0..=last.raw() {
        let cap = Capability(n);
        match prctl(libc::PR_CAPBSET_READ, libc::c_ulong::from(n), 0) {
            Ok(1) => set.insert(CapKind::Bounding, cap),
            Ok(_) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => break,
            Err(e) => return Err(e),
        }
        let ambient = prctl(
            libc::PR_CAP_AMBIENT,
            libc::PR_CAP_AMBIENT_IS_SET as libc::c_ulong,
            libc::c_ulong::from(n),
        );
        if matches!(ambient, Ok(1)) {
            set.insert(CapKind::Ambient, cap);
        }
    }
    Ok(())
}

fn ignore_einval(result: io::Result<libc::c_int>) -> io::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Applies bounding, effective/permitted/inheritable, and ambient sets.
///
/// Bounding capabilities are dropped only when the thread currently holds
/// `CAP_SETPCAP`. Capabilities unknown to the running kernel (`EINVAL`)
/// are skipped.
///
/// # Errors
///
/// Returns the first system error from `prctl(2)` or `capset(2)`.
pub fn apply(target: &CapabilitySet) -> io::Result<()> {
    let current = read_current()?;
    let last = last_capability().raw();

    if current.has(CapKind::Effective, Capability::SETPCAP) {
        for n in 0..=last {
            if !target.has(CapKind::Bounding, Capability(n)) {
                ignore_einval(prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(n), 0))?;
            }
        }
    }

    let (eff_lo, eff_hi) = split(target.effective);
    let (prm_lo, prm_hi) = split(target.permitted);
    let (inh_lo, inh_hi) = split(target.inheritable);
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = [
        CapUserData {
            effective: eff_lo,
            permitted: prm_lo,
            inheritable: inh_lo,
        },
        CapUserData {
            effective: eff_hi,
            permitted: prm_hi,
            inheritable: inh_hi,
        },
    ];
    // SAFETY: header and data are valid, properly sized version-3 buffers.
    let ret = unsafe { libc::syscall(libc::SYS_capset, &raw mut header, data.as_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    for n in 0..=last {
        let action = if target.has(CapKind::Ambient, Capability(n)) {
            libc::PR_CAP_AMBIENT_RAISE
        } else {
            libc::PR_CAP_AMBIENT_LOWER
        };
        ignore_einval(prctl(
            libc::PR_CAP_AMBIENT,
            action as libc::c_ulong,
            libc::c_ulong::from(n),
        ))?;
    }
    Ok(())
}
