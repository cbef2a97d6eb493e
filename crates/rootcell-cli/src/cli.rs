//! Command-line arguments and the configuration channel.

use std::fs::File;
use std::io::BufReader;
use std::os::fd::{BorrowedFd, FromRawFd, RawFd};

use clap::Parser;
use nix::fcntl::{FcntlArg, fcntl};
use rootcell_common::config::BootstrapConfig;
use rootcell_common::constants::{BIN_NAME, CONFIG_FD};
use rootcell_common::error::{Result, RootcellError};

/// Launches a command inside a chroot described by a runtime spec read
/// from an inherited descriptor.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Descriptor carrying the JSON bootstrap configuration.
    #[arg(long, default_value_t = CONFIG_FD)]
    pub config_fd: RawFd,

    /// Command to run; defaults to `process.args` from the configuration.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Decodes the configuration from `fd` and closes it.
///
/// # Errors
///
/// Returns [`RootcellError::Configuration`] if `fd` is not open and
/// [`RootcellError::Decode`] if its content is not a configuration object.
#[allow(unsafe_code)]
pub fn read_config(fd: RawFd) -> Result<BootstrapConfig> {
    // SAFETY: the borrow ends with this call and F_GETFD only inspects
    // the descriptor table.
    let _ = fcntl(unsafe { BorrowedFd::borrow_raw(fd) }, FcntlArg::F_GETFD)
        .map_err(|e| RootcellError::config(format!("error reading options pipe: {e}")))?;
    // SAFETY: the descriptor is open and inherited for our exclusive use;
    // the `File` takes ownership and closes it when dropped.
    let pipe = unsafe { File::from_raw_fd(fd) };
    BootstrapConfig::from_reader(BufReader::new(pipe))
}
