//! Unified error taxonomy for the rootcell workspace.
//!
//! Every variant is fatal for the bootstrap: there is no recovery path
//! during setup, so callers propagate with `?` until the binary prints
//! one diagnostic line and exits.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RootcellError {
    /// The configuration channel could not be read or held invalid values.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the failure.
        message: String,
    },

    /// The configuration channel held malformed JSON.
    #[error("error decoding options: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: serde_json::Error,
    },

    /// A required field of the runtime spec is missing.
    #[error("invalid runtime spec: {message}")]
    SpecValidation {
        /// Description of the missing or invalid field.
        message: String,
    },

    /// The root seen after `chroot(2)` is not the directory inspected before it.
    #[error(
        "root {} changed during chroot: expected dev={expected_dev} ino={expected_ino}, \
         found dev={actual_dev} ino={actual_ino}",
        root.display()
    )]
    ChrootIntegrity {
        /// Intended root directory.
        root: PathBuf,
        /// Device recorded before the transition.
        expected_dev: u64,
        /// Inode recorded before the transition.
        expected_ino: u64,
        /// Device of `/` after the transition.
        actual_dev: u64,
        /// Inode of `/` after the transition.
        actual_ino: u64,
    },

    /// A bind, mkdir, remount, or statfs step failed.
    #[error("{operation}: {source}")]
    Mount {
        /// The operation that failed.
        operation: String,
        /// Underlying system error.
        source: io::Error,
    },

    /// A path could not be verified read-only after remounting it.
    #[error("error verifying that {} was remounted read-only", path.display())]
    ReadOnlyEnforcement {
        /// Path that stayed writable.
        path: PathBuf,
    },

    /// Creating or mounting a masking overlay failed.
    #[error("{operation}: {source}")]
    Masking {
        /// The operation that failed.
        operation: String,
        /// Underlying system error.
        source: io::Error,
    },

    /// A capability, rlimit, or identity change failed.
    #[error("{operation}: {source}")]
    Privilege {
        /// The operation that failed.
        operation: String,
        /// Underlying system error.
        source: io::Error,
    },

    /// A profile, label, or syscall filter could not be applied.
    #[error("{operation}: {source}")]
    SecurityPolicy {
        /// The operation that failed.
        operation: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Starting or waiting for the target command failed.
    #[error("{operation}: {source}")]
    Launch {
        /// The operation that failed.
        operation: String,
        /// Underlying system error.
        source: io::Error,
    },
}

impl RootcellError {
    /// Builds a [`RootcellError::Mount`] from any error convertible to `io::Error`.
    pub fn mount(operation: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Mount {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Builds a [`RootcellError::Masking`].
    pub fn masking(operation: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Masking {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Builds a [`RootcellError::Privilege`].
    pub fn privilege(operation: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Privilege {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Builds a [`RootcellError::SecurityPolicy`].
    pub fn security_policy(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SecurityPolicy {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Builds a [`RootcellError::Launch`].
    pub fn launch(operation: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Launch {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Builds a [`RootcellError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` when the underlying system error reports a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Mount { source, .. }
            | Self::Masking { source, .. }
            | Self::Privilege { source, .. }
            | Self::Launch { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Self::SecurityPolicy { source, .. } => source
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::NotFound),
            _ => false,
        }
    }

    /// Process exit status reported for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RootcellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected_through_errno() {
        let err = RootcellError::mount("stat", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
    }

    #[test]
    fn other_errors_are_not_not_found() {
        let err = RootcellError::privilege(
            "setresuid",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!err.is_not_found());
        assert!(!RootcellError::config("bad").is_not_found());
    }

    #[test]
    fn every_failure_maps_to_status_one() {
        let err = RootcellError::ReadOnlyEnforcement {
            path: PathBuf::from("/rootfs/proc/sys"),
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.to_string(),
            "error verifying that /rootfs/proc/sys was remounted read-only"
        );
    }

    #[test]
    fn message_names_operation_and_cause() {
        let err = RootcellError::mount(
            "error bind mounting /dev from host into mount namespace",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("error bind mounting /dev"));
        assert!(msg.contains("permission denied"));
    }
}
