//! System-wide constants and well-known paths.

use std::time::Duration;

/// Descriptor on which the configuration object is inherited.
pub const CONFIG_FD: i32 = 3;

/// Environment variable carrying the integer log verbosity.
pub const LOG_LEVEL_ENV: &str = "LOGLEVEL";

/// Host null device used to mask files.
pub const DEV_NULL: &str = "/dev/null";

/// Name of the empty masking directory created inside the bundle.
pub const EMPTY_DIR_NAME: &str = "empty";

/// Host paths bound into every root by dedicated steps.
pub const DEV_PATH: &str = "/dev";
/// See [`DEV_PATH`].
pub const PROC_PATH: &str = "/proc";
/// See [`DEV_PATH`].
pub const SYS_PATH: &str = "/sys";

/// Mount table of the calling process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Kernel switch consulted before clearing supplementary groups.
pub const SETGROUPS_PATH: &str = "/proc/self/setgroups";

/// Highest capability number known to the running kernel.
pub const CAP_LAST_CAP_PATH: &str = "/proc/sys/kernel/cap_last_cap";

/// AppArmor module state.
pub const APPARMOR_ENABLED_PATH: &str = "/sys/module/apparmor/parameters/enabled";

/// SELinux enforcement switch; present only when SELinux is enabled.
pub const SELINUX_ENFORCE_PATH: &str = "/sys/fs/selinux/enforce";

/// Maximum number of teardown unmount retries on `EBUSY`/`EAGAIN`.
pub const UNMOUNT_MAX_RETRIES: u32 = 50;

/// Delay between teardown unmount retries.
pub const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Capacity of the termination-signal queue.
pub const SIGNAL_QUEUE_CAPACITY: usize = 100;

/// Symlink hops allowed while resolving a path inside the root.
pub const MAX_SYMLINK_HOPS: usize = 255;

/// Binary name.
pub const BIN_NAME: &str = "rootcell-exec";
