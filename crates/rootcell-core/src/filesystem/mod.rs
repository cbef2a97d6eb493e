//! Filesystem isolation for the new root.
//!
//! Builds the bind-mount tree (host `/dev`, `/proc`, `/sys`, caller
//! mounts, read-only paths, masked paths), returns the teardown handle
//! for it, and performs the verified `chroot(2)`.

pub mod builder;
pub mod chroot;
pub mod cleanup;
pub mod masking;
pub mod mount;
pub mod readonly;
pub mod resolve;

pub use builder::setup_mounts;
pub use chroot::{FileIdentity, LinuxRoot, RootSyscalls, enter_chroot, enter_working_dir};
pub use cleanup::CleanupHandle;
pub use mount::{LinuxMounts, MountFlags, MountSyscalls};
