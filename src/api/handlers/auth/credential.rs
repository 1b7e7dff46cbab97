//! Long-lived admin credential: generation, persistence, validation.
//!
//! The credential is the root of trust for the whole arbitration chain.
//! Device registrations and admin sessions validate against the *current*
//! value on every check, so `force_regenerate` cuts them all off at once
//! without touching their records.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{error, info};
use utoipa::ToSchema;

use super::storage;
use super::utils::constant_time_eq;

/// Prefix identifying dashboard credentials in key files and logs.
pub(crate) const CREDENTIAL_PREFIX: &str = "lm_";

const CREDENTIAL_BYTES: usize = 32;

/// Privilege tier attached to a validated credential.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialTier {
    /// Full administrative access.
    Primary,
    /// Secondary credential with reduced privileges.
    Limited,
}

/// One durable credential (primary or limited), cached in memory.
///
/// A single mutex guards the cache and the durable write together, so
/// concurrent validators never observe a half-written key file.
pub struct CredentialStore {
    path: PathBuf,
    tier: CredentialTier,
    cached: Mutex<Option<SecretString>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(path: PathBuf, tier: CredentialTier) -> Self {
        Self {
            path,
            tier,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn tier(&self) -> CredentialTier {
        self.tier
    }

    /// Return the current credential, generating and persisting one if absent.
    ///
    /// A credential that cannot be persisted stays usable from the in-memory
    /// cache for the rest of the process lifetime; a restart will mint a new
    /// one. That risk is logged, not masked.
    ///
    /// # Errors
    /// Returns an error only if random generation itself fails.
    pub async fn get_or_create(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            return Ok(current.expose_secret().to_string());
        }

        match storage::read_scalar(&self.path).await {
            Ok(Some(existing)) => {
                *cached = Some(SecretString::from(existing.clone()));
                return Ok(existing);
            }
            Ok(None) => {}
            Err(err) => {
                // Unreadable key file: fall through and mint a fresh value.
                error!("Failed to read credential file: {err:#}");
            }
        }

        let fresh = generate_credential()?;
        if let Err(err) = storage::write_scalar(&self.path, &fresh).await {
            error!("Failed to persist credential, keeping in-memory copy: {err:#}");
        } else {
            info!(tier = ?self.tier, "Credential materialized at {}", self.path.display());
        }
        *cached = Some(SecretString::from(fresh.clone()));
        Ok(fresh)
    }

    /// Constant-time check of a candidate against the current credential.
    ///
    /// Absent or unreadable state counts as "not valid", never as an error
    /// that aborts request handling.
    pub async fn validate(&self, candidate: &str) -> bool {
        let mut cached = self.cached.lock().await;
        let current = match cached.as_ref() {
            Some(current) => current.expose_secret().to_string(),
            None => match storage::read_scalar(&self.path).await {
                Ok(Some(existing)) => {
                    *cached = Some(SecretString::from(existing.clone()));
                    existing
                }
                Ok(None) => return false,
                Err(err) => {
                    error!("Failed to read credential file: {err:#}");
                    return false;
                }
            },
        };
        constant_time_eq(candidate, &current)
    }

    /// Replace the credential wholesale, returning `(old, new)`.
    ///
    /// Holds the store mutex across the whole read-modify-write so in-flight
    /// validators see either the old or the new value, never neither.
    ///
    /// # Errors
    /// Returns an error if generation fails or the new value cannot be
    /// persisted (the old credential then stays in force).
    pub async fn force_regenerate(&self) -> Result<(String, String)> {
        let mut cached = self.cached.lock().await;

        let old = match cached.as_ref() {
            Some(current) => current.expose_secret().to_string(),
            None => match storage::read_scalar(&self.path).await {
                Ok(Some(existing)) => existing,
                Ok(None) => generate_credential()?,
                Err(err) => {
                    error!("Failed to read credential file before regenerate: {err:#}");
                    generate_credential()?
                }
            },
        };

        // Loop until the fresh value differs; 256 bits of randomness makes a
        // repeat effectively impossible, but the invariant is explicit.
        let mut fresh = generate_credential()?;
        while fresh == old {
            fresh = generate_credential()?;
        }

        storage::write_scalar(&self.path, &fresh)
            .await
            .context("failed to persist regenerated credential")?;
        *cached = Some(SecretString::from(fresh.clone()));
        info!(tier = ?self.tier, "Credential regenerated");

        Ok((old, fresh))
    }
}

fn generate_credential() -> Result<String> {
    let mut bytes = [0u8; CREDENTIAL_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate credential")?;
    Ok(format!("{CREDENTIAL_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes)))
}
