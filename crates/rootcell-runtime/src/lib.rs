//! # rootcell-runtime
//!
//! Sequences one bootstrap: the mount tree, the verified chroot, security
//! policy, resource limits, privilege reduction, and finally the
//! supervised launch of the target command.
//!
//! The whole sequence runs on the calling thread. The launcher starts a
//! current-thread async runtime only to wait on the child and relay
//! termination signals to it.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod launcher;
pub mod platform;

pub use bootstrap::run;
pub use launcher::{Launcher, LinuxLauncher, translate_exit};
pub use platform::Platform;
