//! Process launch, signal relay, and exit-status translation.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rootcell_common::constants::SIGNAL_QUEUE_CAPACITY;
use rootcell_common::error::{Result, RootcellError};
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

/// Starts the target command and waits for it.
pub trait Launcher {
    /// Runs `args` with exactly `env` in `cwd` and returns the status the
    /// bootstrap should exit with.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::Launch`] if the command cannot be started.
    fn launch(&self, args: &[String], env: &[String], cwd: &Path) -> Result<i32>;
}

/// [`Launcher`] that spawns a real child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxLauncher;

impl Launcher for LinuxLauncher {
    fn launch(&self, args: &[String], env: &[String], cwd: &Path) -> Result<i32> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RootcellError::launch("error starting process supervisor", e))?;
        runtime.block_on(supervise(args, env, cwd))
    }
}

fn command(args: &[String], env: &[String], cwd: &Path) -> Result<Command> {
    let (program, rest) = args.split_first().ok_or_else(|| {
        RootcellError::launch(
            "error starting process",
            io::Error::new(io::ErrorKind::InvalidInput, "no command specified"),
        )
    })?;
    let mut cmd = Command::new(program);
    let _ = cmd.args(rest).env_clear().current_dir(cwd);
    for entry in env {
        match entry.split_once('=') {
            Some((key, value)) => {
                let _ = cmd.env(key, value);
            }
            None => tracing::warn!(entry = %entry, "ignoring environment entry without '='"),
        }
    }
    // SAFETY: prctl(2) is async-signal-safe and touches no parent state.
    unsafe {
        let _ = cmd.pre_exec(|| {
            nix::sys::prctl::set_pdeathsig(Signal::SIGKILL).map_err(io::Error::from)
        });
    }
    Ok(cmd)
}

async fn supervise(args: &[String], env: &[String], cwd: &Path) -> Result<i32> {
    let mut hangup = signal(SignalKind::hangup())
        .map_err(|e| RootcellError::launch("error subscribing to SIGHUP", e))?;
    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| RootcellError::launch("error subscribing to SIGINT", e))?;
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| RootcellError::launch("error subscribing to SIGTERM", e))?;

    let mut child = command(args, env, cwd)?
        .spawn()
        .map_err(|e| RootcellError::launch(format!("error starting process {:?}", args[0]), e))?;
    let pid = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .map(Pid::from_raw);
    tracing::debug!(?args, cwd = %cwd.display(), ?pid, "started process");

    let (tx, mut rx) = mpsc::channel::<SignalKind>(SIGNAL_QUEUE_CAPACITY);
    let subscription = tokio::spawn(async move {
        loop {
            let kind = tokio::select! {
                Some(()) = hangup.recv() => SignalKind::hangup(),
                Some(()) = interrupt.recv() => SignalKind::interrupt(),
                Some(()) = terminate.recv() => SignalKind::terminate(),
                else => break,
            };
            if tx.send(kind).await.is_err() {
                break;
            }
        }
    });
    let relay = tokio::spawn(async move {
        while let Some(kind) = rx.recv().await {
            let Some(pid) = pid else { continue };
            tracing::debug!(signal = kind.as_raw_value(), "forwarding as SIGKILL");
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                tracing::info!(error = %e, "while attempting to send SIGKILL to child process");
            }
        }
    });

    let status = child.wait().await;
    subscription.abort();
    let _ = subscription.await;
    let _ = relay.await;
    Ok(translate_exit(status))
}

/// Maps the child's wait result to the bootstrap's exit status.
///
/// A normal exit forwards the child's status; death by signal and wait
/// failures map to 1.
pub fn translate_exit(status: io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => {
            if let Some(code) = status.code() {
                if code != 0 {
                    tracing::error!(code, "subprocess exited with status {code}");
                }
                code
            } else if let Some(signal) = status.signal() {
                let name = Signal::try_from(signal).map_or("unknown signal", Signal::as_str);
                tracing::error!(signal, "subprocess exited on {name}");
                1
            } else {
                tracing::error!(%status, "subprocess exited abnormally");
                1
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "process exited with error");
            1
        }
    }
}
