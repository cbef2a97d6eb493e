//! # rootcell-common
//!
//! Shared error definitions, the consumed runtime-spec model, the bootstrap
//! configuration envelope, and constants used across the rootcell workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and performs no privileged operation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod spec;
