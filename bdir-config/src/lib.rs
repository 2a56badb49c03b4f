pub mod director;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Error;

use proxmox_sys::fs::CreateOptions;

/// Default configuration directory
pub const BDIR_CONFIG_DIR: &str = "/etc/bdir";

/// Directory of the configuration files, `BDIR_CONFIG_DIR` in the
/// environment overrides the default.
pub fn config_dir() -> PathBuf {
    match std::env::var_os("BDIR_CONFIG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(BDIR_CONFIG_DIR),
    }
}

pub struct ConfigLockGuard(Option<std::fs::File>);

#[doc(hidden)]
/// Note: do not use for production code, this is only intended for tests
pub unsafe fn create_mocked_lock() -> ConfigLockGuard {
    ConfigLockGuard(None)
}

/// Open or create a lock file and lock it.
///
/// File mode is 0660. Default timeout is 10 seconds.
pub fn open_config_lockfile<P: AsRef<Path>>(
    path: P,
    timeout: Option<Duration>,
    exclusive: bool,
) -> Result<ConfigLockGuard, Error> {
    let options =
        CreateOptions::new().perm(nix::sys::stat::Mode::from_bits_truncate(0o660));

    let timeout = timeout.unwrap_or(Duration::new(10, 0));

    let file = proxmox_sys::fs::open_file_locked(&path, timeout, exclusive, options)?;
    Ok(ConfigLockGuard(Some(file)))
}

/// Atomically write a configuration file with permission "0640"
///
/// The file holds the daemon passwords.
pub fn replace_config<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<(), Error> {
    let mode = nix::sys::stat::Mode::from_bits_truncate(0o0640);
    let options = CreateOptions::new().perm(mode);

    proxmox_sys::fs::replace_file(path, data, options, true)?;

    Ok(())
}
