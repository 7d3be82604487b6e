//! Centralised hishtory user-directory resolution.
//!
//! Every piece of per-user state (config, local cache, log, hook scripts and
//! the installed binary) lives in one directory:
//!   1. `HISHTORY_HOME` env var (if set and non-empty)
//!   2. `~/.hishtory` (platform home directory)

use std::path::PathBuf;

pub const CONFIG_FILE: &str = "config.json";
pub const DB_FILE: &str = ".hishtory.db";
pub const LOG_FILE: &str = "hishtory.log";
pub const BINARY_FILE: &str = "hishtory";

/// Return the `HISHTORY_HOME` path when set and non-empty, otherwise fall
/// through to `home_fallback`.
fn resolve_user_path(home_fallback: Option<PathBuf>) -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HISHTORY_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    home_fallback.map(|h| h.join(".hishtory"))
}

/// Returns the hishtory user-level directory.
pub fn user_dir() -> Option<PathBuf> {
    resolve_user_path(dirs::home_dir())
}

pub fn config_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join(CONFIG_FILE))
}

pub fn db_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join(DB_FILE))
}

pub fn log_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join(LOG_FILE))
}

/// Where `install` places the binary when none is found on `$PATH`, and the
/// path `update` replaces.
pub fn installed_binary_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join(BINARY_FILE))
}
