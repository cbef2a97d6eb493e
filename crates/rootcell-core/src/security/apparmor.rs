//! AppArmor exec-profile switching.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use rootcell_common::constants::APPARMOR_ENABLED_PATH;

const EXEC_ATTR_PATH: &str = "/proc/thread-self/attr/apparmor/exec";
const LEGACY_EXEC_ATTR_PATH: &str = "/proc/thread-self/attr/exec";

/// Reports whether the AppArmor module is loaded and enabled.
pub fn is_enabled() -> bool {
    is_enabled_at(Path::new(APPARMOR_ENABLED_PATH))
}

/// Reports whether the module parameter at `path` reads `Y`.
pub fn is_enabled_at(path: &Path) -> bool {
    std::fs::read(path).is_ok_and(|content| content.first() == Some(&b'Y'))
}

/// Requests `profile` for the next exec of the calling thread.
///
/// Prefers the AppArmor-specific attribute file and falls back to the
/// shared LSM one on kernels that lack it.
///
/// # Errors
///
/// Returns the I/O error from writing the attribute.
pub fn apply_profile(profile: &str) -> io::Result<()> {
    apply_profile_at(
        Path::new(EXEC_ATTR_PATH),
        Path::new(LEGACY_EXEC_ATTR_PATH),
        profile,
    )
}

fn apply_profile_at(primary: &Path, fallback: &Path, profile: &str) -> io::Result<()> {
    let command = format!("exec {profile}");
    match write_attr(primary, &command) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => write_attr(fallback, &command),
        other => other,
    }
}

fn write_attr(path: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(value.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn enabled_flag_is_read_from_first_byte() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("enabled");
        fs::write(&path, "Y\n").expect("write");
        assert!(is_enabled_at(&path));
        fs::write(&path, "N\n").expect("write");
        assert!(!is_enabled_at(&path));
        assert!(!is_enabled_at(&dir.path().join("missing")));
    }

    #[test]
    fn profile_written_to_primary_attribute() {
        let dir = tempfile::tempdir().expect("tempdir");
        let primary = dir.path().join("apparmor-exec");
        let fallback = dir.path().join("exec");
        fs::write(&primary, "").expect("create");
        apply_profile_at(&primary, &fallback, "rootcell-default").expect("apply");
        assert_eq!(fs::read_to_string(&primary).expect("read"), "exec rootcell-default");
        assert!(!fallback.exists());
    }

    #[test]
    fn missing_primary_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let primary = dir.path().join("absent");
        let fallback = dir.path().join("exec");
        fs::write(&fallback, "").expect("create");
        apply_profile_at(&primary, &fallback, "p").expect("apply");
        assert_eq!(fs::read_to_string(&fallback).expect("read"), "exec p");
    }
}
