use super::client::SyncClient;
use crate::crypto::EncHistoryEntry;
use crate::error::NetworkError;

impl SyncClient {
    /// Register this device under `user_id` via `GET /api/v1/eregister`.
    /// The response body is ignored. Failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or returns a non-2xx status.
    pub fn register_device(&self, user_id: &str, device_id: &str) -> Result<(), NetworkError> {
        self.get(&format!(
            "/api/v1/eregister?user_id={user_id}&device_id={device_id}"
        ))
        .map(drop)
    }

    /// Fetch every entry previously synced for `user_id` via
    /// `GET /api/v1/ebootstrap`. An empty array is a valid answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable, returns a non-2xx status,
    /// or the body is not a JSON array of encrypted entries.
    pub fn bootstrap(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Vec<EncHistoryEntry>, NetworkError> {
        self.get_json(&format!(
            "/api/v1/ebootstrap?user_id={user_id}&device_id={device_id}"
        ))
    }

    /// Fetch entries queued for this device via `GET /api/v1/equery`.
    ///
    /// # Errors
    ///
    /// Same as [`SyncClient::bootstrap`].
    pub fn pending_entries(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Vec<EncHistoryEntry>, NetworkError> {
        self.get_json(&format!(
            "/api/v1/equery?device_id={device_id}&user_id={user_id}"
        ))
    }

    /// Upload encrypted entries via `POST /api/v1/esubmit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or returns a non-2xx status.
    pub fn submit(&self, entries: &[EncHistoryEntry]) -> Result<(), NetworkError> {
        let body = serde_json::to_vec(entries).map_err(|source| NetworkError::Decode {
            url: "/api/v1/esubmit".to_owned(),
            source,
        })?;
        self.post("/api/v1/esubmit", "application/json", body)
            .map(drop)
    }
}
