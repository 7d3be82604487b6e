use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One executed shell command.
///
/// There is no surrogate id: two entries equal in all seven fields are the
/// same event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub local_username: String,
    pub hostname: String,
    pub command: String,
    pub current_working_directory: String,
    pub exit_code: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Canonical text form used for the time columns. Fixed-width nanoseconds keep
/// equality exact and make lexical order match chronological order.
pub fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Filter for the search path.
///
/// Each whitespace-separated term must match. Plain terms are substring
/// matches against command, hostname or cwd; `hostname:`, `user:`, `cwd:` and
/// `exit_code:` atoms restrict a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub atoms: Vec<QueryAtom>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAtom {
    Text(String),
    Hostname(String),
    User(String),
    Cwd(String),
    ExitCode(i32),
}

impl HistoryQuery {
    /// Parse query terms. A malformed `exit_code:` value is kept as free text.
    pub fn parse<S: AsRef<str>>(terms: &[S]) -> Self {
        let atoms = terms
            .iter()
            .flat_map(|t| t.as_ref().split_whitespace().map(str::to_owned).collect::<Vec<_>>())
            .map(|t| parse_atom(&t))
            .collect();
        Self { atoms, limit: None }
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

fn parse_atom(term: &str) -> QueryAtom {
    let Some((key, value)) = term.split_once(':') else {
        return QueryAtom::Text(term.to_owned());
    };
    match key {
        "hostname" => QueryAtom::Hostname(value.to_owned()),
        "user" => QueryAtom::User(value.to_owned()),
        "cwd" => QueryAtom::Cwd(value.to_owned()),
        "exit_code" => value
            .parse()
            .map_or_else(|_| QueryAtom::Text(term.to_owned()), QueryAtom::ExitCode),
        _ => QueryAtom::Text(term.to_owned()),
    }
}
