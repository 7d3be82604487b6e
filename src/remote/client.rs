use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;

use super::http;
use crate::error::NetworkError;
use crate::logging::LogSink;

/// Blocking client for the hishtory sync server.
///
/// Every call is timed and logged to the [`LogSink`]. The base URL is either
/// fixed at construction or re-read from `HISHTORY_SERVER` on every call.
pub struct SyncClient {
    base_url: Option<String>,
    http: reqwest::blocking::Client,
    timeout_secs: u64,
    log: Arc<LogSink>,
}

impl SyncClient {
    /// Client that resolves the server from the environment on each call.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Transport`] if the HTTP client cannot be built.
    pub fn new(log: Arc<LogSink>) -> Result<Self, NetworkError> {
        Self::build(None, http::HEAVY_TIMEOUT_SECS, log)
    }

    /// Like [`SyncClient::new`] with the short timeout, for calls an
    /// interactive command waits on before answering from the local cache.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Transport`] if the HTTP client cannot be built.
    pub fn light(log: Arc<LogSink>) -> Result<Self, NetworkError> {
        Self::build(None, http::LIGHT_TIMEOUT_SECS, log)
    }

    /// Client pinned to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Transport`] if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str, log: Arc<LogSink>) -> Result<Self, NetworkError> {
        Self::build(
            Some(base_url.trim_end_matches('/').to_owned()),
            http::HEAVY_TIMEOUT_SECS,
            log,
        )
    }

    fn build(
        base_url: Option<String>,
        timeout_secs: u64,
        log: Arc<LogSink>,
    ) -> Result<Self, NetworkError> {
        let http = http::build_client(timeout_secs).map_err(|source| {
            NetworkError::Transport {
                method: "build client for",
                url: base_url.clone().unwrap_or_else(http::server_url),
                source,
            }
        })?;
        Ok(Self {
            base_url,
            http,
            timeout_secs,
            log,
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(http::server_url)
    }

    pub const fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// `GET {base}{path}` and return the body.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Transport`] on connection failure,
    /// [`NetworkError::BadStatus`] on any non-2xx status.
    pub fn get(&self, path: &str) -> Result<Vec<u8>, NetworkError> {
        let url = format!("{}{path}", self.base_url());
        self.send("ApiGet", path, "GET", &url, self.http.get(&url))
    }

    /// `POST {base}{path}` with the given content type and body.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Transport`] on connection failure,
    /// [`NetworkError::BadStatus`] on any non-2xx status.
    pub fn post(&self, path: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        let url = format!("{}{path}", self.base_url());
        let req = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.send("ApiPost", path, "POST", &url, req)
    }

    /// GET an absolute URL (release assets live outside the API host).
    ///
    /// # Errors
    ///
    /// Same as [`SyncClient::get`].
    pub fn download(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        self.send("Download", url, "GET", url, self.http.get(url))
    }

    /// GET `path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`SyncClient::get`], plus [`NetworkError::Decode`] for a body
    /// that is not the expected JSON.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let body = self.get(path)?;
        serde_json::from_slice(&body).map_err(|source| NetworkError::Decode {
            url: path.to_owned(),
            source,
        })
    }

    /// Execute `req`, logging its duration as `op(target)` whatever the
    /// outcome.
    fn send(
        &self,
        op: &str,
        target: &str,
        method: &'static str,
        url: &str,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<Vec<u8>, NetworkError> {
        let start = Instant::now();
        let result = Self::execute(method, url, req);
        self.log.timing(op, target, start.elapsed());
        if let Err(e) = &result {
            self.log.record(&format!("{op}({target:?}) failed: {e}"));
        }
        result
    }

    fn execute(
        method: &'static str,
        url: &str,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<Vec<u8>, NetworkError> {
        let transport = |source| NetworkError::Transport {
            method,
            url: url.to_owned(),
            source,
        };
        let resp = req.send().map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetworkError::BadStatus {
                method,
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        resp.bytes().map(|b| b.to_vec()).map_err(transport)
    }
}
