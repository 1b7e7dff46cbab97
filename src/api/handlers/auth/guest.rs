//! Guest sessions: time-boxed, unauthenticated access grants.
//!
//! A guest is identified by a client-generated fingerprint that doubles as
//! its device identity; there is no separate device table for guests and no
//! tie to the admin credential. Revocation and expiry are reported with
//! distinct machine-readable codes so clients can react differently
//! (restart guest mode vs. show a modal).

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use super::storage;
use super::types::RequestContext;
use super::utils::encode_record_key;

/// Inclusive bounds for guest durations, in hours.
pub(crate) const MIN_GUEST_HOURS: i64 = 1;
pub(crate) const MAX_GUEST_HOURS: i64 = 168;

/// Why a known guest session failed validation.
///
/// Unknown ids produce no reason at all; callers use that distinction to
/// avoid logging noise for stale or garbage identifiers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GuestInvalidReason {
    Revoked,
    Expired,
}

impl GuestInvalidReason {
    /// Stable wire code; clients key recovery flows off these values.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Revoked => "GUEST_SESSION_REVOKED",
            Self::Expired => "GUEST_SESSION_EXPIRED",
        }
    }
}

/// Client-supplied descriptive metadata captured at guest-mode entry.
#[derive(Clone, Debug, Default)]
pub struct GuestMetadata {
    pub device_name: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
}

/// One guest session, persisted as a JSON record keyed by fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuestSessionRecord {
    pub session_id: String,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    pub is_revoked: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    pub revoked_by: Option<String>,
    pub prefill_enabled: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub prefill_expires_at: Option<OffsetDateTime>,
}

impl GuestSessionRecord {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Prefill is usable only while the grant *and* the session are live;
    /// an expired session overrides an active grant.
    #[must_use]
    pub fn prefill_active(&self, now: OffsetDateTime) -> bool {
        if self.is_revoked || self.is_expired(now) {
            return false;
        }
        self.prefill_enabled
            && self
                .prefill_expires_at
                .is_some_and(|expiry| now < expiry)
    }
}

/// Tunable durations for the guest lifecycle.
#[derive(Debug)]
pub struct GuestSettings {
    /// Runtime-adjustable via the config endpoint, hence atomic.
    session_hours: AtomicI64,
    prefill_hours: i64,
    sweep_slack: Duration,
    last_seen_throttle: Duration,
}

impl Default for GuestSettings {
    fn default() -> Self {
        Self {
            session_hours: AtomicI64::new(6),
            prefill_hours: 6,
            sweep_slack: Duration::hours(24),
            last_seen_throttle: Duration::seconds(60),
        }
    }
}

impl GuestSettings {
    #[must_use]
    pub fn with_session_hours(self, hours: i64) -> Self {
        self.session_hours.store(hours, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn with_prefill_hours(mut self, hours: i64) -> Self {
        self.prefill_hours = hours;
        self
    }

    #[must_use]
    pub fn with_sweep_slack(mut self, slack: Duration) -> Self {
        self.sweep_slack = slack;
        self
    }

    #[must_use]
    pub fn with_last_seen_throttle(mut self, throttle: Duration) -> Self {
        self.last_seen_throttle = throttle;
        self
    }
}

/// Whether an hour count is an acceptable guest duration.
#[must_use]
pub fn duration_in_bounds(hours: i64) -> bool {
    (MIN_GUEST_HOURS..=MAX_GUEST_HOURS).contains(&hours)
}

/// In-memory registry over the guest record directory.
pub struct GuestSessionRegistry {
    dir: PathBuf,
    settings: GuestSettings,
    cache: Mutex<HashMap<String, GuestSessionRecord>>,
}

impl GuestSessionRegistry {
    /// Load existing guest records from the record directory.
    ///
    /// # Errors
    /// Returns an error if the configured durations are out of bounds or the
    /// record directory cannot be created or listed.
    pub async fn open(dir: PathBuf, settings: GuestSettings) -> Result<Self> {
        let hours = settings.session_hours.load(Ordering::Relaxed);
        if !duration_in_bounds(hours) {
            bail!("guest session duration must be between {MIN_GUEST_HOURS} and {MAX_GUEST_HOURS} hours, got {hours}");
        }
        if !duration_in_bounds(settings.prefill_hours) {
            bail!(
                "guest prefill duration must be between {MIN_GUEST_HOURS} and {MAX_GUEST_HOURS} hours, got {}",
                settings.prefill_hours
            );
        }

        let records: Vec<GuestSessionRecord> = storage::load_dir(&dir).await?;
        let cache = records
            .into_iter()
            .map(|record| (record.session_id.clone(), record))
            .collect();
        Ok(Self {
            dir,
            settings,
            cache: Mutex::new(cache),
        })
    }

    #[must_use]
    pub fn session_duration_hours(&self) -> i64 {
        self.settings.session_hours.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn prefill_duration_hours(&self) -> i64 {
        self.settings.prefill_hours
    }

    /// Change the guest session duration at runtime.
    ///
    /// # Errors
    /// Out-of-range values are rejected, never clamped.
    pub fn set_session_duration_hours(&self, hours: i64) -> Result<()> {
        if !duration_in_bounds(hours) {
            bail!("guest session duration must be between {MIN_GUEST_HOURS} and {MAX_GUEST_HOURS} hours, got {hours}");
        }
        self.settings.session_hours.store(hours, Ordering::Relaxed);
        info!(hours, "Guest session duration updated");
        Ok(())
    }

    /// Create (or re-create) a guest session for the given fingerprint.
    ///
    /// # Errors
    /// Returns an error for an empty fingerprint or a storage failure.
    pub async fn create(
        &self,
        session_id: &str,
        metadata: GuestMetadata,
        context: &RequestContext,
    ) -> Result<GuestSessionRecord> {
        if session_id.trim().is_empty() {
            bail!("guest session id must not be empty");
        }

        let now = OffsetDateTime::now_utc();
        let record = GuestSessionRecord {
            session_id: session_id.to_string(),
            device_name: metadata.device_name,
            ip_address: context.ip_address.clone(),
            os: metadata.os,
            browser: metadata.browser,
            created_at: now,
            expires_at: now + Duration::hours(self.session_duration_hours()),
            last_seen_at: now,
            is_revoked: false,
            revoked_at: None,
            revoked_by: None,
            prefill_enabled: false,
            prefill_expires_at: None,
        };

        let mut cache = self.cache.lock().await;
        storage::write_json(&self.record_path(session_id), &record).await?;
        cache.insert(session_id.to_string(), record.clone());
        debug!(session_id, "Guest session created");
        Ok(record)
    }

    /// Validate a guest fingerprint.
    ///
    /// `(true, None)` for a live session; `(false, Some(reason))` for a
    /// known-but-invalid one; `(false, None)` when nothing is on file.
    /// Refreshes the activity stamp only when a real record is found.
    pub async fn validate_with_reason(
        &self,
        session_id: &str,
    ) -> (bool, Option<GuestInvalidReason>) {
        let now = OffsetDateTime::now_utc();
        let mut cache = self.cache.lock().await;

        let Some(record) = self.lookup(&mut cache, session_id).await else {
            return (false, None);
        };

        if record.is_revoked {
            return (false, Some(GuestInvalidReason::Revoked));
        }
        if record.is_expired(now) {
            return (false, Some(GuestInvalidReason::Expired));
        }

        if now - record.last_seen_at >= self.settings.last_seen_throttle {
            if let Some(live) = cache.get_mut(session_id) {
                live.last_seen_at = now;
                if let Err(err) = storage::write_json(&self.record_path(session_id), live).await {
                    error!(session_id, "Failed to stamp guest activity: {err:#}");
                }
            }
        }

        (true, None)
    }

    /// Mark a guest session revoked, keeping the record so later requests
    /// get the explicit revoked code instead of a silent fall-through.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn revoke(&self, session_id: &str, revoked_by: Option<String>) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        if self.lookup(&mut cache, session_id).await.is_none() {
            return Ok(false);
        }
        let Some(record) = cache.get_mut(session_id) else {
            return Ok(false);
        };
        record.is_revoked = true;
        record.revoked_at = Some(OffsetDateTime::now_utc());
        record.revoked_by = revoked_by;
        storage::write_json(&self.record_path(session_id), record).await?;
        info!(session_id, "Guest session revoked");
        Ok(true)
    }

    /// Remove a guest record entirely.
    ///
    /// # Errors
    /// Returns an error if the record file cannot be deleted.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        let removed_file = storage::remove(&self.record_path(session_id)).await?;
        let removed_cached = cache.remove(session_id).is_some();
        Ok(removed_file || removed_cached)
    }

    /// Enable prefill for `duration_hours` (validated by the caller against
    /// the configured bounds). Returns `false` for unknown fingerprints.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn enable_prefill(&self, session_id: &str, duration_hours: i64) -> Result<bool> {
        if !duration_in_bounds(duration_hours) {
            bail!("guest prefill duration must be between {MIN_GUEST_HOURS} and {MAX_GUEST_HOURS} hours, got {duration_hours}");
        }
        let mut cache = self.cache.lock().await;
        if self.lookup(&mut cache, session_id).await.is_none() {
            return Ok(false);
        }
        let Some(record) = cache.get_mut(session_id) else {
            return Ok(false);
        };
        record.prefill_enabled = true;
        record.prefill_expires_at =
            Some(OffsetDateTime::now_utc() + Duration::hours(duration_hours));
        storage::write_json(&self.record_path(session_id), record).await?;
        Ok(true)
    }

    /// Disable prefill, clearing its expiry.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn disable_prefill(&self, session_id: &str) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        if self.lookup(&mut cache, session_id).await.is_none() {
            return Ok(false);
        }
        let Some(record) = cache.get_mut(session_id) else {
            return Ok(false);
        };
        record.prefill_enabled = false;
        record.prefill_expires_at = None;
        storage::write_json(&self.record_path(session_id), record).await?;
        Ok(true)
    }

    /// Remove records whose expiry is further in the past than the sweep
    /// slack. Run at startup and then periodically; idempotent.
    ///
    /// # Errors
    /// Returns an error if a record file cannot be deleted.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        let mut cache = self.cache.lock().await;

        let stale: Vec<String> = cache
            .values()
            .filter(|record| now - record.expires_at > self.settings.sweep_slack)
            .map(|record| record.session_id.clone())
            .collect();

        for id in &stale {
            storage::remove(&self.record_path(id)).await?;
            cache.remove(id);
        }
        Ok(stale.len())
    }

    /// All guest records, newest first, for the dashboard listing.
    pub async fn list(&self) -> Vec<GuestSessionRecord> {
        let cache = self.cache.lock().await;
        let mut records: Vec<GuestSessionRecord> = cache.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub async fn get(&self, session_id: &str) -> Option<GuestSessionRecord> {
        let mut cache = self.cache.lock().await;
        self.lookup(&mut cache, session_id).await
    }

    async fn lookup(
        &self,
        cache: &mut HashMap<String, GuestSessionRecord>,
        session_id: &str,
    ) -> Option<GuestSessionRecord> {
        if let Some(record) = cache.get(session_id) {
            return Some(record.clone());
        }
        match storage::read_json::<GuestSessionRecord>(&self.record_path(session_id)).await {
            Ok(Some(record)) => {
                cache.insert(session_id.to_string(), record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(err) => {
                error!(session_id, "Failed to read guest record: {err:#}");
                None
            }
        }
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        storage::record_path(&self.dir, &encode_record_key(session_id))
    }
}
