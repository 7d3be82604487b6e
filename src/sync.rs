//! Orchestrations built on the config store, local cache and sync client.
//!
//! - [`Syncer::setup`] registers a device and bootstraps its cache.
//! - [`Syncer::record`] saves a captured entry locally, then pushes it.
//! - [`Syncer::pull`] merges entries other devices queued for this one.

use anyhow::Context as _;

use crate::config::{ClientConfig, ConfigStore};
use crate::crypto::{self, Cipher, EncHistoryEntry};
use crate::history::{HistoryEntry, LocalCache};
use crate::logging::LogSink;
use crate::remote::SyncClient;

/// Outcome of a successful [`Syncer::setup`].
#[derive(Debug)]
pub struct SetupReport {
    pub user_secret: String,
    pub device_id: String,
    pub bootstrapped: usize,
}

/// Outcome of [`Syncer::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub inserted: bool,
    pub pushed: bool,
}

pub struct Syncer<'a> {
    pub config: &'a ConfigStore,
    pub cache: &'a LocalCache,
    pub client: &'a SyncClient,
    pub cipher: &'a dyn Cipher,
    pub log: &'a LogSink,
}

impl Syncer<'_> {
    /// Set this device up under `secret` (or a freshly generated one).
    ///
    /// Persists a new config with a new device id, drops every cached entry,
    /// registers the device and re-imports the user's synced history. Safe to
    /// re-run: the cache is cleared first and inserts are deduplicated.
    ///
    /// # Errors
    ///
    /// Fails on any config, storage or network error. A single entry that
    /// cannot be decrypted aborts the whole setup before anything is
    /// imported, since it most likely means the secret is wrong.
    pub fn setup(&self, secret: Option<&str>) -> anyhow::Result<SetupReport> {
        let user_secret = secret
            .filter(|s| !s.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), ToOwned::to_owned);
        let config = ClientConfig::new(user_secret.clone());
        self.config
            .set(&config)
            .context("failed to persist config to disk")?;

        self.cache.clear().context("failed to clear local history")?;

        let user_id = crypto::user_id(&user_secret);
        self.client
            .register_device(&user_id, &config.device_id)
            .context("failed to register device with backend")?;
        let retrieved = self
            .client
            .bootstrap(&user_id, &config.device_id)
            .context("failed to bootstrap device from the backend")?;

        let entries = decrypt_all(self.cipher, &user_secret, &retrieved)
            .context("failed to decrypt history entry from server")?;
        for entry in &entries {
            self.cache.insert_if_new(entry)?;
        }
        self.log.record(&format!(
            "setup: device {} bootstrapped {} entries",
            config.device_id,
            entries.len()
        ));

        Ok(SetupReport {
            user_secret,
            device_id: config.device_id,
            bootstrapped: entries.len(),
        })
    }

    /// Save a captured entry locally, then try to upload it.
    ///
    /// The local insert never depends on the network: an encryption or upload
    /// failure is logged and reported as `pushed: false`. Duplicates are not
    /// re-uploaded.
    ///
    /// # Errors
    ///
    /// Fails only if the config cannot be read or the local insert fails.
    pub fn record(&self, entry: &HistoryEntry) -> anyhow::Result<RecordOutcome> {
        let config = self.config.get()?;
        let inserted = self.cache.insert_if_new(entry)?;
        if !inserted {
            return Ok(RecordOutcome {
                inserted,
                pushed: false,
            });
        }
        let pushed = match self.push(&config, entry) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("failed to sync history entry: {e:#}");
                self.log.record(&format!("push failed: {e:#}"));
                false
            }
        };
        Ok(RecordOutcome { inserted, pushed })
    }

    fn push(&self, config: &ClientConfig, entry: &HistoryEntry) -> anyhow::Result<()> {
        let enc = self
            .cipher
            .encrypt(&config.user_secret, entry, &config.device_id)?;
        self.client.submit(&[enc])?;
        Ok(())
    }

    /// Merge entries queued for this device into the cache. Returns how many
    /// were new.
    ///
    /// # Errors
    ///
    /// Fails on config, network or storage errors; like setup, one
    /// undecryptable entry aborts the pull before anything is inserted.
    pub fn pull(&self) -> anyhow::Result<usize> {
        let config = self.config.get()?;
        let user_id = crypto::user_id(&config.user_secret);
        let retrieved = self
            .client
            .pending_entries(&user_id, &config.device_id)
            .context("failed to retrieve new history entries")?;
        let entries = decrypt_all(self.cipher, &config.user_secret, &retrieved)
            .context("failed to decrypt history entry from server")?;
        let mut added = 0;
        for entry in &entries {
            if self.cache.insert_if_new(entry)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

fn decrypt_all(
    cipher: &dyn Cipher,
    secret: &str,
    entries: &[EncHistoryEntry],
) -> Result<Vec<HistoryEntry>, crate::error::CryptoError> {
    entries.iter().map(|e| cipher.decrypt(secret, e)).collect()
}
