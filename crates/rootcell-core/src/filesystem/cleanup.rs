//! One-shot teardown of the mount tree.

use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use nix::errno::Errno;
use rootcell_common::constants::{UNMOUNT_MAX_RETRIES, UNMOUNT_RETRY_DELAY};
use rootcell_common::error::{Result, RootcellError};

use super::mount::MountSyscalls;

/// Detaches everything mounted under one root.
///
/// The handle can be run any number of times. Runs keep attempting the
/// unmount until one succeeds; later runs issue nothing. The result is
/// always the first real error any run observed, never a later one.
pub struct CleanupHandle {
    ops: Rc<dyn MountSyscalls>,
    root: PathBuf,
    retry_delay: Duration,
    detached: Cell<bool>,
    first_error: Cell<Option<Errno>>,
}

impl fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupHandle")
            .field("root", &self.root)
            .field("detached", &self.detached.get())
            .field("first_error", &self.first_error.get())
            .finish_non_exhaustive()
    }
}

impl CleanupHandle {
    /// Creates a handle bound to `root`.
    pub fn new(ops: Rc<dyn MountSyscalls>, root: impl Into<PathBuf>) -> Self {
        Self {
            ops,
            root: root.into(),
            retry_delay: UNMOUNT_RETRY_DELAY,
            detached: Cell::new(false),
            first_error: Cell::new(None),
        }
    }

    /// Overrides the delay between busy retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Root path this handle tears down.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Detaches the root, retrying while the kernel reports it busy.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::Mount`] carrying the first unmount error
    /// seen by this or any earlier run.
    pub fn run(&self) -> Result<()> {
        if !self.detached.get() {
            self.detach();
        }
        match self.first_error.get() {
            Some(errno) => Err(RootcellError::mount(
                format!("error unmounting {}", self.root.display()),
                errno,
            )),
            None => Ok(()),
        }
    }

    fn detach(&self) {
        let mut result = self.ops.unmount_detach(&self.root);
        let mut retries = 0;
        while let Err(Errno::EBUSY | Errno::EAGAIN) = result {
            if retries >= UNMOUNT_MAX_RETRIES {
                break;
            }
            std::thread::sleep(self.retry_delay);
            result = self.ops.unmount_detach(&self.root);
            retries += 1;
        }
        if let Err(errno) = result {
            tracing::warn!(root = %self.root.display(), retries, error = %errno, "error unmounting root");
            if self.first_error.get().is_none() {
                self.first_error.set(Some(errno));
            }
        } else {
            tracing::debug!(root = %self.root.display(), retries, "unmounted root");
            self.detached.set(true);
        }
    }
}
