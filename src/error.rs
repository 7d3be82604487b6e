use std::fmt;
use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reading or writing the per-device config record.
#[derive(Debug)]
pub enum ConfigError {
    /// No config file exists: the device has not been set up yet.
    NotFound { path: PathBuf },
    NoHomeDir,
    IoFailure {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    ParseFailure {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(
                f,
                "no config at {}; run `hishtory install` first",
                path.display()
            ),
            Self::NoHomeDir => write!(f, "cannot determine the hishtory directory"),
            Self::IoFailure { op, path, .. } => write!(f, "could not {op} {}", path.display()),
            Self::ParseFailure { path, .. } => {
                write!(f, "could not parse config file {}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoFailure { source, .. } => Some(source),
            Self::ParseFailure { source, .. } => Some(source),
            Self::NotFound { .. } | Self::NoHomeDir => None,
        }
    }
}

/// Failures of the local history cache.
#[derive(Debug)]
pub enum StorageError {
    OpenFailure { path: PathBuf, source: BoxError },
    SchemaFailure { source: rusqlite::Error },
    QueryFailure {
        op: &'static str,
        source: rusqlite::Error,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailure { path, .. } => {
                write!(f, "could not open history db at {}", path.display())
            }
            Self::SchemaFailure { .. } => write!(f, "could not initialize history schema"),
            Self::QueryFailure { op, .. } => write!(f, "history db: {op} failed"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OpenFailure { source, .. } => Some(source.as_ref()),
            Self::SchemaFailure { source } | Self::QueryFailure { source, .. } => Some(source),
        }
    }
}

/// Failures talking to the sync server.
#[derive(Debug)]
pub enum NetworkError {
    /// Connection-level failure (DNS, TLS, timeout, unreadable body).
    Transport {
        method: &'static str,
        url: String,
        source: reqwest::Error,
    },
    /// Any non-2xx status; 4xx and 5xx are not distinguished.
    BadStatus {
        method: &'static str,
        url: String,
        status: u16,
    },
    /// The body was not the JSON shape the endpoint promises.
    Decode {
        url: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { method, url, .. } => write!(f, "could not {method} {url}"),
            Self::BadStatus {
                method,
                url,
                status,
            } => write!(f, "{method} {url}: server returned HTTP {status}"),
            Self::Decode { url, .. } => write!(f, "invalid response from {url}"),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::Decode { source, .. } => Some(source),
            Self::BadStatus { .. } => None,
        }
    }
}

/// Failures of the encryption capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    DecryptFailure(String),
    EncryptFailure(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecryptFailure(msg) => write!(f, "failed to decrypt history entry: {msg}"),
            Self::EncryptFailure(msg) => write!(f, "failed to encrypt history entry: {msg}"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Failures of the self-update flow.
#[derive(Debug)]
pub enum UpdateError {
    BadUpdateInfo(String),
    UnsupportedPlatform {
        os: &'static str,
        arch: &'static str,
    },
    DownloadFailure { url: String, source: BoxError },
    /// The downloaded binary's provenance could not be established. Nothing
    /// on disk outside the scratch location has been touched.
    VerificationFailure(String),
    InstallFailure { step: String, source: Option<BoxError> },
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadUpdateInfo(msg) => write!(f, "invalid update info: {msg}"),
            Self::UnsupportedPlatform { os, arch } => {
                write!(f, "no update available for os={os}, arch={arch}")
            }
            Self::DownloadFailure { url, .. } => write!(f, "failed to download {url}"),
            Self::VerificationFailure(msg) => write!(
                f,
                "failed to verify provenance of the updated binary, aborting update: {msg}"
            ),
            Self::InstallFailure { step, .. } => write!(f, "failed to install update: {step}"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DownloadFailure { source, .. } => Some(source.as_ref()),
            Self::InstallFailure {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_not_found_is_detectable() {
        let err = ConfigError::NotFound {
            path: PathBuf::from("/x/config.json"),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/x/config.json"));
        assert!(!ConfigError::NoHomeDir.is_not_found());
    }

    #[test]
    fn not_found_survives_anyhow_wrapping() {
        let err: anyhow::Error = ConfigError::NotFound {
            path: PathBuf::from("c"),
        }
        .into();
        let err = err.context("loading config");
        let found = err
            .downcast_ref::<ConfigError>()
            .is_some_and(ConfigError::is_not_found);
        assert!(found);
    }

    #[test]
    fn bad_status_mentions_method_and_code() {
        let err = NetworkError::BadStatus {
            method: "GET",
            url: "http://h/api/v1/download".to_string(),
            status: 503,
        };
        let msg = err.to_string();
        assert!(msg.contains("GET"));
        assert!(msg.contains("503"));
    }
}
