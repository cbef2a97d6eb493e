//! # rootcell-core
//!
//! Low-level Linux isolation primitives for the rootcell bootstrap.
//!
//! This crate provides:
//! - **Lookup tables**: capability and resource-limit names to kernel identifiers.
//! - **Filesystem**: the bind-mount tree under the new root, read-only
//!   enforcement, path masking, teardown, and the verified `chroot(2)`.
//! - **Identity**: supplementary groups, GID, capabilities, and UID in the
//!   one safe order, plus resource limits.
//! - **Security**: AppArmor profiles, SELinux labels, and seccomp filters.
//! - **Namespaces**: diagnostics for namespace requests that cannot be honored.
//!
//! Every privileged call goes through a small syscall trait so the
//! sequencing can be exercised without privileges. The `Linux*` types
//! implement those traits with real system calls.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod filesystem;
pub mod identity;
pub mod lookup;
pub mod namespace;
pub mod rlimit;
pub mod security;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
