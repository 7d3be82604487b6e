use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension as _};

use super::types::{HistoryEntry, HistoryQuery, QueryAtom, decode_time, encode_time};

const COLUMNS: &str = "local_username, hostname, command, current_working_directory,
                       exit_code, start_time, end_time";

pub(super) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history_entries (
            local_username            TEXT    NOT NULL,
            hostname                  TEXT    NOT NULL,
            command                   TEXT    NOT NULL,
            current_working_directory TEXT    NOT NULL,
            exit_code                 INTEGER NOT NULL,
            start_time                TEXT    NOT NULL,
            end_time                  TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_entries_end_time
            ON history_entries(end_time DESC);
        CREATE INDEX IF NOT EXISTS idx_history_entries_identity
            ON history_entries(start_time, command);",
    )
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let time = |idx: usize| -> rusqlite::Result<_> {
        let raw: String = row.get(idx)?;
        decode_time(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    Ok(HistoryEntry {
        local_username: row.get(0)?,
        hostname: row.get(1)?,
        command: row.get(2)?,
        current_working_directory: row.get(3)?,
        exit_code: row.get(4)?,
        start_time: time(5)?,
        end_time: time(6)?,
    })
}

/// Look for a row equal to `entry` in all seven fields.
pub(super) fn find_identical(
    conn: &Connection,
    entry: &HistoryEntry,
) -> rusqlite::Result<Option<HistoryEntry>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM history_entries
             WHERE local_username = ?1
               AND hostname = ?2
               AND command = ?3
               AND current_working_directory = ?4
               AND exit_code = ?5
               AND start_time = ?6
               AND end_time = ?7
             LIMIT 1"
        ),
        rusqlite::params![
            entry.local_username,
            entry.hostname,
            entry.command,
            entry.current_working_directory,
            entry.exit_code,
            encode_time(&entry.start_time),
            encode_time(&entry.end_time),
        ],
        map_row,
    )
    .optional()
}

/// Insert `entry` unless an identical row already exists. The existence check
/// and the insert run as one statement so concurrent writers cannot both
/// insert the same event.
pub(super) fn insert_if_absent(conn: &Connection, entry: &HistoryEntry) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "INSERT INTO history_entries ({COLUMNS})
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
             WHERE NOT EXISTS (
                 SELECT 1 FROM history_entries
                 WHERE local_username = ?1
                   AND hostname = ?2
                   AND command = ?3
                   AND current_working_directory = ?4
                   AND exit_code = ?5
                   AND start_time = ?6
                   AND end_time = ?7
                 LIMIT 1
             )"
        ),
        rusqlite::params![
            entry.local_username,
            entry.hostname,
            entry.command,
            entry.current_working_directory,
            entry.exit_code,
            encode_time(&entry.start_time),
            encode_time(&entry.end_time),
        ],
    )?;
    Ok(changed == 1)
}

/// Build the WHERE clause and positional parameters for `query`.
fn build_filter(query: &HistoryQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for atom in &query.atoms {
        let n = params.len() + 1;
        match atom {
            QueryAtom::Text(t) => {
                clauses.push(format!(
                    "(instr(command, ?{n}) > 0 OR instr(hostname, ?{n}) > 0 \
                     OR instr(current_working_directory, ?{n}) > 0)"
                ));
                params.push(Value::Text(t.clone()));
            }
            QueryAtom::Hostname(h) => {
                clauses.push(format!("hostname = ?{n}"));
                params.push(Value::Text(h.clone()));
            }
            QueryAtom::User(u) => {
                clauses.push(format!("local_username = ?{n}"));
                params.push(Value::Text(u.clone()));
            }
            QueryAtom::Cwd(c) => {
                clauses.push(format!("instr(current_working_directory, ?{n}) > 0"));
                params.push(Value::Text(c.clone()));
            }
            QueryAtom::ExitCode(code) => {
                clauses.push(format!("exit_code = ?{n}"));
                params.push(Value::Integer(i64::from(*code)));
            }
        }
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, params)
}

pub(super) fn query(conn: &Connection, query: &HistoryQuery) -> rusqlite::Result<Vec<HistoryEntry>> {
    let (where_sql, mut params) = build_filter(query);
    // SQLite treats a negative LIMIT as "no limit".
    #[allow(clippy::cast_possible_wrap)]
    let limit = query.limit.map_or(-1, |l| l as i64);
    let limit_idx = params.len() + 1;
    params.push(Value::Integer(limit));

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM history_entries
         {where_sql}
         ORDER BY end_time DESC, rowid DESC
         LIMIT ?{limit_idx}"
    ))?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), map_row)?;
    rows.collect()
}

pub(super) fn count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM history_entries", [], |r| r.get(0))
}

pub(super) fn clear(conn: &Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM history_entries", [])?;
    tx.commit()
}
