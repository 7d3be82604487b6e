//! Turning a shell hook invocation into a [`HistoryEntry`].
//!
//! The hook calls `hishtory saveHistoryEntry <shell> <exit code> <raw line>
//! <start secs>`. A `None` result means "nothing to save" (a command typed
//! with a leading space, or bash re-delivering the previous line) and is not
//! an error.

use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};

use crate::config::ConfigStore;
use crate::history::HistoryEntry;

/// Arguments passed by the shell hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookArgs {
    pub shell: String,
    pub exit_code: String,
    pub raw_line: String,
    pub start_time: String,
}

/// Machine facts stamped onto every entry.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    pub username: String,
    pub hostname: String,
    pub cwd: String,
    pub now: DateTime<Utc>,
}

impl CaptureContext {
    /// Read user, host and working directory from the running process.
    ///
    /// # Errors
    ///
    /// Returns an error if the cwd or home directory cannot be determined.
    pub fn from_process() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("failed to get cwd for last command")?;
        let home = dirs::home_dir().context("failed to get user's home directory")?;
        Ok(Self {
            username: current_username(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            cwd: format_cwd(&cwd, &home),
            now: Utc::now(),
        })
    }
}

fn current_username() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Abbreviate the home directory as `~`. The home directory itself renders as
/// `~/`; paths outside home are returned unchanged.
pub fn format_cwd(cwd: &Path, home: &Path) -> String {
    if cwd == home {
        return "~/".to_owned();
    }
    match cwd.strip_prefix(home) {
        Ok(rest) => format!("~/{}", rest.display()),
        Err(_) => cwd.display().to_string(),
    }
}

/// Parse a unix-seconds timestamp, tolerating the trailing `N` left by
/// `date +%s%N` on platforms without nanosecond support.
///
/// # Errors
///
/// Returns an error if the value is not an integer number of seconds.
pub fn parse_start_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let trimmed = raw.trim().trim_end_matches('N');
    let secs: i64 = trimmed
        .parse()
        .with_context(|| format!("failed to parse start time {raw:?} as int"))?;
    DateTime::from_timestamp(secs, 0).with_context(|| format!("start time {secs} out of range"))
}

/// Extract the command from a `history 1` line such as `  123  git status`.
fn bash_command(raw_line: &str) -> Option<&str> {
    let trimmed = raw_line.trim_start();
    let (number, rest) = trimmed.split_once(' ')?;
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // bash pads the history number with two spaces before the command; keep a
    // third space if the user typed one.
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_end_matches('\n'))
}

/// Build the entry for one hook invocation, or `None` if it must be skipped.
///
/// For bash the raw line is compared against the config's last-line marker
/// (and the marker updated) so a prompt redraw without a new command does not
/// record a duplicate.
///
/// # Errors
///
/// Returns an error for an unsupported shell, unparsable numbers, or a config
/// that cannot be read or written.
pub fn build_entry(
    args: &HookArgs,
    ctx: &CaptureContext,
    config: &ConfigStore,
) -> anyhow::Result<Option<HistoryEntry>> {
    let exit_code: i32 = args
        .exit_code
        .trim()
        .parse()
        .with_context(|| format!("failed to parse exit code {:?}", args.exit_code))?;
    let start_time = parse_start_time(&args.start_time)?;

    let command = match args.shell.as_str() {
        "bash" => {
            let cmd = bash_command(&args.raw_line).with_context(|| {
                format!("unexpected bash history line {:?}", args.raw_line)
            })?;
            if !config.advance_last_line(&args.raw_line)? {
                return Ok(None);
            }
            cmd.to_owned()
        }
        "zsh" => {
            let line = args.raw_line.strip_suffix('\n').unwrap_or(&args.raw_line);
            line.strip_suffix(' ').unwrap_or(line).to_owned()
        }
        other => anyhow::bail!("tried to save a hishtory entry from an unsupported shell={other:?}"),
    };
    if command.starts_with(' ') || command.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(HistoryEntry {
        local_username: ctx.username.clone(),
        hostname: ctx.hostname.clone(),
        command,
        current_working_directory: ctx.cwd.clone(),
        exit_code,
        start_time,
        end_time: ctx.now,
    }))
}
