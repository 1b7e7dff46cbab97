//! Arbitration state and configuration.
//!
//! One long-lived `AuthState` is constructed at process start and injected
//! into every handler. Each component guards its own cache with its own
//! mutex; cross-component calls are read-only validations, so there is no
//! lock ordering to get wrong.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use super::credential::{CredentialStore, CredentialTier};
use super::device::DeviceRegistry;
use super::guest::{GuestSessionRegistry, GuestSettings};
use super::session::{SessionManager, SessionSettings};

const PRIMARY_CREDENTIAL_FILE: &str = "credential.key";
const LIMITED_CREDENTIAL_FILE: &str = "credential_limited.key";
const DEFAULT_DEVICE_TTL_DAYS: i64 = 7300;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    data_dir: PathBuf,
    auth_enabled: bool,
    guest_locked: bool,
    limited_credential: bool,
    guest_session_hours: i64,
    guest_prefill_hours: i64,
    device_ttl_days: i64,
    cleanup_interval_seconds: u64,
    session_settings: SessionSettings,
}

impl AuthConfig {
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            auth_enabled: true,
            guest_locked: false,
            limited_credential: false,
            guest_session_hours: 6,
            guest_prefill_hours: 6,
            device_ttl_days: DEFAULT_DEVICE_TTL_DAYS,
            cleanup_interval_seconds: 3600,
            session_settings: SessionSettings::default(),
        }
    }

    #[must_use]
    pub fn with_auth_enabled(mut self, enabled: bool) -> Self {
        self.auth_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_guest_locked(mut self, locked: bool) -> Self {
        self.guest_locked = locked;
        self
    }

    #[must_use]
    pub fn with_limited_credential(mut self, enabled: bool) -> Self {
        self.limited_credential = enabled;
        self
    }

    #[must_use]
    pub fn with_guest_session_hours(mut self, hours: i64) -> Self {
        self.guest_session_hours = hours;
        self
    }

    #[must_use]
    pub fn with_guest_prefill_hours(mut self, hours: i64) -> Self {
        self.guest_prefill_hours = hours;
        self
    }

    #[must_use]
    pub fn with_device_ttl_days(mut self, days: i64) -> Self {
        self.device_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_cleanup_interval_seconds(mut self, seconds: u64) -> Self {
        self.cleanup_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_settings(mut self, settings: SessionSettings) -> Self {
        self.session_settings = settings;
        self
    }

    #[must_use]
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        self.auth_enabled
    }

    #[must_use]
    pub fn guest_locked(&self) -> bool {
        self.guest_locked
    }

    #[must_use]
    pub fn cleanup_interval_seconds(&self) -> u64 {
        self.cleanup_interval_seconds
    }

    #[must_use]
    pub fn session_settings(&self) -> &SessionSettings {
        &self.session_settings
    }
}

/// Long-lived arbitration state: credential store(s), device registry,
/// session manager, and guest registry over one data directory.
pub struct AuthState {
    config: AuthConfig,
    credentials: Arc<CredentialStore>,
    limited_credentials: Option<Arc<CredentialStore>>,
    devices: DeviceRegistry,
    sessions: SessionManager,
    guests: GuestSessionRegistry,
}

impl AuthState {
    /// Open all component stores under the configured data directory and
    /// materialize the credential(s) so operators can read them off disk.
    ///
    /// # Errors
    /// Returns an error if a store cannot be opened or a configured duration
    /// is out of bounds.
    pub async fn open(config: AuthConfig) -> Result<Self> {
        let data_dir = config.data_dir.clone();

        let credentials = Arc::new(CredentialStore::new(
            data_dir.join(PRIMARY_CREDENTIAL_FILE),
            CredentialTier::Primary,
        ));
        credentials
            .get_or_create()
            .await
            .context("failed to materialize primary credential")?;

        let limited_credentials = if config.limited_credential {
            let store = Arc::new(CredentialStore::new(
                data_dir.join(LIMITED_CREDENTIAL_FILE),
                CredentialTier::Limited,
            ));
            store
                .get_or_create()
                .await
                .context("failed to materialize limited credential")?;
            Some(store)
        } else {
            None
        };

        let devices = DeviceRegistry::open(
            data_dir.join("devices"),
            credentials.clone(),
            config.device_ttl_days,
        )
        .await?;

        let sessions = SessionManager::open(
            data_dir.join("sessions"),
            credentials.clone(),
            config.session_settings.clone(),
        )
        .await?;

        let guests = GuestSessionRegistry::open(
            data_dir.join("guests"),
            GuestSettings::default()
                .with_session_hours(config.guest_session_hours)
                .with_prefill_hours(config.guest_prefill_hours),
        )
        .await?;

        Ok(Self {
            config,
            credentials,
            limited_credentials,
            devices,
            sessions,
            guests,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    #[must_use]
    pub fn limited_credentials(&self) -> Option<&Arc<CredentialStore>> {
        self.limited_credentials.as_ref()
    }

    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn guests(&self) -> &GuestSessionRegistry {
        &self.guests
    }

    /// Check a candidate against the primary credential, then the limited
    /// one when configured. Returns the matched tier.
    pub async fn validate_credential(&self, candidate: &str) -> Option<CredentialTier> {
        if self.credentials.validate(candidate).await {
            return Some(CredentialTier::Primary);
        }
        if let Some(limited) = &self.limited_credentials {
            if limited.validate(candidate).await {
                return Some(CredentialTier::Limited);
            }
        }
        None
    }
}
