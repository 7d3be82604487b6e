use chrono::{DateTime, Local, Utc};

use hishtory::capture::{self, CaptureContext, HookArgs};
use hishtory::crypto::AesGcmCipher;
use hishtory::history::{HistoryEntry, HistoryQuery};
use hishtory::sync::Syncer;

use crate::App;

/// Record one command. Skipped commands and a disabled config still exit 0
/// so the shell prompt is never disturbed.
pub fn cmd_save(app: &App, args: HookArgs) -> anyhow::Result<i32> {
    if !app.config.is_enabled()? {
        return Ok(0);
    }
    let ctx = CaptureContext::from_process()?;
    let Some(entry) = capture::build_entry(&args, &ctx, &app.config)? else {
        return Ok(0);
    };

    let cache = app.cache()?;
    let client = app.client()?;
    let syncer = Syncer {
        config: &app.config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &app.log,
    };
    let outcome = syncer.record(&entry)?;
    tracing::debug!(
        inserted = outcome.inserted,
        pushed = outcome.pushed,
        "saved history entry"
    );
    Ok(0)
}

/// Search history, merging anything queued by other devices first.
pub fn cmd_query(app: &App, terms: &[String], limit: usize) -> anyhow::Result<i32> {
    let cache = app.cache()?;
    let client = app.light_client()?;
    let syncer = Syncer {
        config: &app.config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &app.log,
    };
    // Offline queries still work against the local cache.
    if let Err(e) = syncer.pull() {
        tracing::warn!("failed to retrieve new history entries: {e:#}");
    }

    let entries = cache.query(&HistoryQuery::parse(terms).with_limit(limit))?;
    println!("Hostname\tCWD\tTimestamp\tRuntime\tExit Code\tCommand");
    for entry in &entries {
        println!("{}", format_row(entry));
    }
    Ok(0)
}

pub fn cmd_export(app: &App) -> anyhow::Result<i32> {
    let cache = app.cache()?;
    let mut entries = cache.query(&HistoryQuery::default())?;
    entries.reverse();
    for entry in entries {
        println!("{}", entry.command);
    }
    Ok(0)
}

fn format_row(entry: &HistoryEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        entry.hostname,
        entry.current_working_directory,
        format_timestamp(entry.start_time),
        format_runtime(entry.start_time, entry.end_time),
        entry.exit_code,
        entry.command
    )
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%b %d %Y %H:%M:%S %Z").to_string()
}

fn format_runtime(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let secs = (end - start).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{}s", s / 60, s % 60),
        s => format!("{}h{}m{}s", s / 3600, (s % 3600) / 60, s % 60),
    }
}
