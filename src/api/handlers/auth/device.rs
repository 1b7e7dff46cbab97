//! Registered devices: a browser identifier bound to an encrypted credential.
//!
//! Flow Overview:
//! 1) The device presents the raw credential once, at registration.
//! 2) The credential is encrypted with a key derived from the device id and
//!    stored alongside the registration.
//! 3) Later requests present only the device id; validation decrypts the
//!    stored credential and re-checks it against the credential store.
//!
//! Security boundaries: the derived key is recoverable by anyone who knows
//! the device id, but the decrypted payload is only useful while it still
//! matches the *current* admin credential. Rotating the credential silently
//! invalidates every device without touching device records.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::credential::CredentialStore;
use super::storage;
use super::types::RequestContext;
use super::utils::encode_record_key;

/// Caller-supplied device ids shorter than this are rejected outright.
pub(crate) const MIN_DEVICE_ID_LEN: usize = 16;

const KEY_NAMESPACE: &[u8] = b"gardisto/device-credential-key/v1";
const NONCE_LEN: usize = 12;

/// One registered device, persisted as a JSON record keyed by device id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub encrypted_credential: String,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl DeviceRegistration {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a registration attempt.
#[derive(Debug)]
pub enum RegisterOutcome {
    Registered(Box<DeviceRegistration>),
    IdTooShort,
    InvalidCredential,
}

/// In-memory registry over the device record directory.
pub struct DeviceRegistry {
    dir: PathBuf,
    credentials: Arc<CredentialStore>,
    ttl: Duration,
    cache: Mutex<HashMap<String, DeviceRegistration>>,
}

impl DeviceRegistry {
    /// Load existing registrations from the record directory.
    ///
    /// # Errors
    /// Returns an error if the record directory cannot be created or listed.
    pub async fn open(
        dir: PathBuf,
        credentials: Arc<CredentialStore>,
        ttl_days: i64,
    ) -> Result<Self> {
        let records: Vec<DeviceRegistration> = storage::load_dir(&dir).await?;
        let cache = records
            .into_iter()
            .map(|record| (record.device_id.clone(), record))
            .collect();
        Ok(Self {
            dir,
            credentials,
            ttl: Duration::days(ttl_days),
            cache: Mutex::new(cache),
        })
    }

    /// Register a device after checking the presented credential.
    ///
    /// # Errors
    /// Returns an error only for storage failures; bad input is an outcome,
    /// not an error.
    pub async fn register(
        &self,
        device_id: &str,
        credential: &str,
        context: &RequestContext,
        device_name: Option<String>,
    ) -> Result<RegisterOutcome> {
        if device_id.len() < MIN_DEVICE_ID_LEN {
            return Ok(RegisterOutcome::IdTooShort);
        }
        if !self.credentials.validate(credential).await {
            return Ok(RegisterOutcome::InvalidCredential);
        }

        let now = OffsetDateTime::now_utc();
        let registration = DeviceRegistration {
            device_id: device_id.to_string(),
            encrypted_credential: encrypt_credential(device_id, credential)?,
            registered_at: now,
            expires_at: now + self.ttl,
            device_name,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
        };

        let mut cache = self.cache.lock().await;
        storage::write_json(&self.record_path(device_id), &registration).await?;
        cache.insert(device_id.to_string(), registration.clone());
        debug!(device_id, "Device registered");

        Ok(RegisterOutcome::Registered(Box::new(registration)))
    }

    /// Check whether a device id maps to a registration whose embedded
    /// credential still matches the current admin credential.
    ///
    /// Lookup, decryption, or storage failures all read as "not validated".
    pub async fn validate(&self, device_id: &str) -> bool {
        let Some(registration) = self.lookup(device_id).await else {
            return false;
        };
        if registration.is_expired(OffsetDateTime::now_utc()) {
            return false;
        }
        let Some(embedded) = decrypt_credential(device_id, &registration.encrypted_credential)
        else {
            warn!(device_id, "Device credential failed to decrypt");
            return false;
        };
        self.credentials.validate(&embedded).await
    }

    /// Remove one registration. Returns whether anything was removed.
    ///
    /// # Errors
    /// Returns an error if the record file cannot be deleted.
    pub async fn revoke(&self, device_id: &str) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        let removed_file = storage::remove(&self.record_path(device_id)).await?;
        let removed_cached = cache.remove(device_id).is_some();
        Ok(removed_file || removed_cached)
    }

    /// Remove every registration. Returns how many were removed.
    ///
    /// # Errors
    /// Returns an error if a record file cannot be deleted.
    pub async fn revoke_all(&self) -> Result<usize> {
        let mut cache = self.cache.lock().await;
        let ids: Vec<String> = cache.keys().cloned().collect();
        for id in &ids {
            storage::remove(&self.record_path(id)).await?;
        }
        cache.clear();
        Ok(ids.len())
    }

    /// Non-expired registrations, for the dashboard listing.
    pub async fn list(&self) -> Vec<DeviceRegistration> {
        let now = OffsetDateTime::now_utc();
        let cache = self.cache.lock().await;
        let mut registrations: Vec<DeviceRegistration> = cache
            .values()
            .filter(|registration| !registration.is_expired(now))
            .cloned()
            .collect();
        registrations.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        registrations
    }

    async fn lookup(&self, device_id: &str) -> Option<DeviceRegistration> {
        let mut cache = self.cache.lock().await;
        if let Some(registration) = cache.get(device_id) {
            return Some(registration.clone());
        }
        // Cache miss: another process may have written the record.
        match storage::read_json::<DeviceRegistration>(&self.record_path(device_id)).await {
            Ok(Some(registration)) => {
                cache.insert(device_id.to_string(), registration.clone());
                Some(registration)
            }
            Ok(None) => None,
            Err(err) => {
                error!(device_id, "Failed to read device record: {err:#}");
                None
            }
        }
    }

    fn record_path(&self, device_id: &str) -> PathBuf {
        storage::record_path(&self.dir, &encode_record_key(device_id))
    }
}

/// Derive the per-device AES-256 key from a fixed namespace and the device id.
fn derive_device_key(device_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_NAMESPACE);
    hasher.update(device_id.as_bytes());
    hasher.finalize().into()
}

/// Encrypt the credential with a fresh random nonce.
/// Stored form: base64url(nonce || ciphertext).
fn encrypt_credential(device_id: &str, credential: &str) -> Result<String> {
    let key = derive_device_key(device_id);
    let cipher = Aes256Gcm::new_from_slice(&key).context("device key length")?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .context("failed to generate device nonce")?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, credential.as_bytes())
        .map_err(|_| anyhow::anyhow!("failed to encrypt device credential"))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(payload))
}

/// Decrypt a stored payload. Any malformed input reads as `None`.
fn decrypt_credential(device_id: &str, payload: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    if bytes.len() < NONCE_LEN {
        return None;
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);

    let key = derive_device_key(device_id);
    let cipher = Aes256Gcm::new_from_slice(&key).ok()?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .ok()?;
    String::from_utf8(plaintext).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::credential::CredentialTier;

    const DEVICE_ID: &str = "browser-device-0123456789abcdef";

    async fn registry(dir: &tempfile::TempDir) -> Result<(DeviceRegistry, String)> {
        let credentials = Arc::new(CredentialStore::new(
            dir.path().join("credential.key"),
            CredentialTier::Primary,
        ));
        let credential = credentials.get_or_create().await?;
        let registry =
            DeviceRegistry::open(dir.path().join("devices"), credentials, 7300).await?;
        Ok((registry, credential))
    }

    #[test]
    fn encrypt_decrypt_round_trip() -> Result<()> {
        let encrypted = encrypt_credential(DEVICE_ID, "lm_secret")?;
        assert_eq!(
            decrypt_credential(DEVICE_ID, &encrypted).as_deref(),
            Some("lm_secret")
        );
        // A different device id derives a different key.
        assert_eq!(
            decrypt_credential("other-device-0123456789abcdef", &encrypted),
            None
        );
        assert_eq!(decrypt_credential(DEVICE_ID, "not-base64!"), None);
        Ok(())
    }

    #[tokio::test]
    async fn register_then_validate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (registry, credential) = registry(&dir).await?;

        let outcome = registry
            .register(
                DEVICE_ID,
                &credential,
                &RequestContext::default(),
                Some("living room".to_string()),
            )
            .await?;
        assert!(matches!(outcome, RegisterOutcome::Registered(_)));
        assert!(registry.validate(DEVICE_ID).await);
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_short_id_and_bad_credential() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (registry, credential) = registry(&dir).await?;

        let outcome = registry
            .register("short", &credential, &RequestContext::default(), None)
            .await?;
        assert!(matches!(outcome, RegisterOutcome::IdTooShort));

        let outcome = registry
            .register(DEVICE_ID, "lm_wrong", &RequestContext::default(), None)
            .await?;
        assert!(matches!(outcome, RegisterOutcome::InvalidCredential));

        assert!(!registry.validate(DEVICE_ID).await);
        Ok(())
    }

    #[tokio::test]
    async fn credential_rotation_invalidates_devices() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let credentials = Arc::new(CredentialStore::new(
            dir.path().join("credential.key"),
            CredentialTier::Primary,
        ));
        let credential = credentials.get_or_create().await?;
        let registry =
            DeviceRegistry::open(dir.path().join("devices"), credentials.clone(), 7300).await?;

        registry
            .register(DEVICE_ID, &credential, &RequestContext::default(), None)
            .await?;
        assert!(registry.validate(DEVICE_ID).await);

        credentials.force_regenerate().await?;

        // Registration record untouched, validation now fails.
        assert!(!registry.validate(DEVICE_ID).await);
        assert_eq!(registry.list().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_and_revoke_all() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (registry, credential) = registry(&dir).await?;

        registry
            .register(DEVICE_ID, &credential, &RequestContext::default(), None)
            .await?;
        let second_id = "second-device-0123456789abcdef";
        registry
            .register(second_id, &credential, &RequestContext::default(), None)
            .await?;

        assert!(registry.revoke(DEVICE_ID).await?);
        assert!(!registry.revoke(DEVICE_ID).await?);
        assert!(!registry.validate(DEVICE_ID).await);
        assert!(registry.validate(second_id).await);

        assert_eq!(registry.revoke_all().await?, 1);
        assert!(registry.list().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn registrations_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (registry, credential) = registry(&dir).await?;
        registry
            .register(DEVICE_ID, &credential, &RequestContext::default(), None)
            .await?;
        drop(registry);

        let credentials = Arc::new(CredentialStore::new(
            dir.path().join("credential.key"),
            CredentialTier::Primary,
        ));
        let reopened =
            DeviceRegistry::open(dir.path().join("devices"), credentials, 7300).await?;
        assert!(reopened.validate(DEVICE_ID).await);
        Ok(())
    }
}
