//! # rootcell-exec
//!
//! Privileged chroot bootstrap. Reads one JSON configuration object from
//! an inherited descriptor, builds the mount tree, enters the chroot,
//! drops to the target identity, and runs the target command, exiting
//! with its status.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod cli;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use rootcell_common::error::RootcellError;
use rootcell_runtime::Platform;

use crate::cli::Cli;

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = cli::read_config(cli.config_fd)?;
    let status = rootcell_runtime::run(&Platform::linux(), &config, &cli.command)?;
    Ok(status)
}

// Every workspace error already renders its source, so only the top
// message is printed.
fn report(e: &anyhow::Error) -> (String, u8) {
    let code = e
        .downcast_ref::<RootcellError>()
        .map_or(1, RootcellError::exit_code);
    (e.to_string(), u8::try_from(code).unwrap_or(1))
}

#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    let level = logging::take_log_level();
    logging::init(level);

    let cli = Cli::parse();
    match run(&cli) {
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(1)),
        Err(e) => {
            let (message, code) = report(&e);
            eprintln!("{message}");
            ExitCode::from(code)
        }
    }
}
