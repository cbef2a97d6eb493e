//! SELinux exec-label switching.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use rootcell_common::constants::SELINUX_ENFORCE_PATH;

const EXEC_ATTR_PATH: &str = "/proc/thread-self/attr/exec";

/// Reports whether SELinux is enabled on the host.
pub fn is_enabled() -> bool {
    Path::new(SELINUX_ENFORCE_PATH).exists()
}

/// Sets `label` as the context of the next exec of the calling thread.
///
/// A no-op when SELinux is disabled.
///
/// # Errors
///
/// Returns the I/O error from writing the attribute.
pub fn set_exec_label(label: &str) -> io::Result<()> {
    if !is_enabled() {
        tracing::debug!(label, "SELinux disabled, ignoring label");
        return Ok(());
    }
    write_label(Path::new(EXEC_ATTR_PATH), label)
}

fn write_label(path: &Path, label: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(label.as_bytes())
}
