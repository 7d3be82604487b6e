//! End-to-end encryption of history entries.
//!
//! The sync core only depends on the [`Cipher`] trait; [`AesGcmCipher`] is the
//! production implementation. Both the user id sent to the server and the
//! encryption key are derived from the user secret with HMAC-SHA256 under
//! different labels, so the server never learns the key.

use aes_gcm::aead::{Aead, OsRng, Payload, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::history::HistoryEntry;

const NONCE_SIZE: usize = 12;

/// Wire form of a [`HistoryEntry`] after encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncHistoryEntry {
    /// Base64 ciphertext (includes the GCM tag).
    pub enc_data: String,
    /// Base64 nonce.
    pub nonce: String,
    pub device_id: String,
    pub user_id: String,
    pub date: DateTime<Utc>,
    pub encrypted_id: String,
    #[serde(default)]
    pub read_count: i32,
}

/// The encryption capability used by sync.
pub trait Cipher {
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptFailure`] if the entry cannot be sealed.
    fn encrypt(
        &self,
        secret: &str,
        entry: &HistoryEntry,
        device_id: &str,
    ) -> Result<EncHistoryEntry, CryptoError>;

    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptFailure`] if the entry was sealed under a
    /// different secret, was tampered with, or is malformed.
    fn decrypt(&self, secret: &str, entry: &EncHistoryEntry) -> Result<HistoryEntry, CryptoError>;
}

fn hmac_sha256(secret: &str, label: &str) -> [u8; 32] {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(label.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Server-visible identity derived from the user secret.
pub fn user_id(secret: &str) -> String {
    hex::encode(hmac_sha256(secret, "user_id"))
}

fn encryption_key(secret: &str) -> [u8; 32] {
    hmac_sha256(secret, "encryption_key")
}

/// AES-256-GCM with a random nonce per entry; the user id is bound as AAD.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    fn encrypt(
        &self,
        secret: &str,
        entry: &HistoryEntry,
        device_id: &str,
    ) -> Result<EncHistoryEntry, CryptoError> {
        let plaintext =
            serde_json::to_vec(entry).map_err(|e| CryptoError::EncryptFailure(e.to_string()))?;
        let uid = user_id(secret);

        let cipher = Aes256Gcm::new_from_slice(&encryption_key(secret))
            .map_err(|e| CryptoError::EncryptFailure(format!("cipher init failed: {e}")))?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: uid.as_bytes(),
                },
            )
            .map_err(|e| CryptoError::EncryptFailure(e.to_string()))?;

        Ok(EncHistoryEntry {
            enc_data: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            device_id: device_id.to_owned(),
            user_id: uid,
            date: entry.end_time,
            encrypted_id: uuid::Uuid::new_v4().to_string(),
            read_count: 0,
        })
    }

    fn decrypt(&self, secret: &str, entry: &EncHistoryEntry) -> Result<HistoryEntry, CryptoError> {
        let uid = user_id(secret);
        if entry.user_id != uid {
            return Err(CryptoError::DecryptFailure(
                "entry belongs to a different user id".to_owned(),
            ));
        }
        let nonce_bytes = BASE64
            .decode(&entry.nonce)
            .map_err(|e| CryptoError::DecryptFailure(format!("bad nonce encoding: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::DecryptFailure(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&entry.enc_data)
            .map_err(|e| CryptoError::DecryptFailure(format!("bad ciphertext encoding: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&encryption_key(secret))
            .map_err(|e| CryptoError::DecryptFailure(format!("cipher init failed: {e}")))?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: uid.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptFailure("authentication failed".to_owned()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::DecryptFailure(format!("invalid entry payload: {e}")))
    }
}
