//! Append-only diagnostic log (`hishtory.log`).
//!
//! A [`LogSink`] is built once per process and handed to every component that
//! reports timings. The file is opened on the first write and the handle is
//! kept for the rest of the process; it is never closed explicitly because a
//! hishtory invocation is short-lived. Nothing written here can fail the
//! caller: open and write errors are downgraded to `tracing` warnings.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};

pub struct LogSink {
    path: Option<PathBuf>,
    file: OnceLock<Option<Mutex<File>>>,
}

impl LogSink {
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            file: OnceLock::new(),
        }
    }

    /// A sink that drops every record. Used when no user directory exists.
    pub const fn disabled() -> Self {
        Self {
            path: None,
            file: OnceLock::new(),
        }
    }

    /// Sink at the default location, or a disabled sink if the home
    /// directory cannot be determined.
    pub fn from_env() -> Self {
        crate::paths::log_path().map_or_else(Self::disabled, Self::new)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn handle(&self) -> Option<&Mutex<File>> {
        self.file
            .get_or_init(|| {
                let path = self.path.as_ref()?;
                if let Some(parent) = path.parent()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::warn!("cannot create log dir {}: {e}", parent.display());
                    return None;
                }
                match OpenOptions::new().create(true).append(true).open(path) {
                    Ok(f) => Some(Mutex::new(f)),
                    Err(e) => {
                        tracing::warn!("cannot open {}: {e}", path.display());
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Append one timestamped line.
    pub fn record(&self, message: &str) {
        let Some(handle) = self.handle() else {
            return;
        };
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let Ok(mut file) = handle.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{ts} {message}") {
            tracing::warn!("cannot write hishtory.log: {e}");
        }
    }

    /// Record how long `op` on `target` took.
    pub fn timing(&self, op: &str, target: &str, elapsed: Duration) {
        tracing::debug!(op, target, elapsed_ms = elapsed.as_millis(), "timed call");
        self.record(&format!("{op}({target:?}): {elapsed:?}"));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hishtory.log");
        let sink = LogSink::new(path.clone());

        sink.record("first");
        sink.timing("ApiGet", "/api/v1/download", Duration::from_millis(12));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].contains("ApiGet(\"/api/v1/download\")"));
    }

    #[test]
    fn existing_log_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hishtory.log");
        std::fs::write(&path, "old line\n").unwrap();

        LogSink::new(path.clone()).record("new line");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("old line\n"));
        assert!(content.contains("new line"));
    }

    #[test]
    fn unwritable_location_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for append.
        let sink = LogSink::new(dir.path().to_path_buf());
        sink.record("dropped");
        sink.record("dropped again");
    }

    #[test]
    fn disabled_sink_is_silent() {
        let sink = LogSink::disabled();
        assert!(sink.path().is_none());
        sink.record("nothing");
    }
}
