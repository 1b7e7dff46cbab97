//! Cookie sessions: opaque hashed bearer tokens with silent rotation.
//!
//! Flow Overview:
//! - Admin login or guest-mode entry mints 64 random bytes; only the SHA-256
//!   hash is persisted, the raw value travels in the cookie.
//! - Rotation demotes the current hash to "previous" for a short grace
//!   window, so concurrent in-flight requests with the old token keep
//!   working while the cookie update propagates.
//! - Admin sessions carry a fingerprint of the credential that minted them;
//!   regenerating the credential invalidates them without touching records.

use anyhow::Result;
use axum::http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, error};
use utoipa::ToSchema;
use uuid::Uuid;

use super::credential::CredentialStore;
use super::storage;
use super::types::RequestContext;
use super::utils::{credential_fingerprint, generate_session_token, hash_session_token};

pub(crate) const SESSION_COOKIE_NAME: &str = "gardisto_session";

/// Query-parameter fallback for transports that cannot carry cookies.
pub(crate) const TOKEN_QUERY_PARAM: &str = "access_token";

/// What a session grants: full dashboard access or the guest subset.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Admin,
    Guest,
}

/// Prefill capabilities that can be granted per session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrefillService {
    Steam,
    Epic,
}

/// Per-session feature expiries, independent of the session's own expiry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ScopedGrants {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub steam_prefill_expires_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub epic_prefill_expires_at: Option<OffsetDateTime>,
}

impl ScopedGrants {
    fn slot(&mut self, service: PrefillService) -> &mut Option<OffsetDateTime> {
        match service {
            PrefillService::Steam => &mut self.steam_prefill_expires_at,
            PrefillService::Epic => &mut self.epic_prefill_expires_at,
        }
    }

    #[must_use]
    pub fn expires_at(&self, service: PrefillService) -> Option<OffsetDateTime> {
        match service {
            PrefillService::Steam => self.steam_prefill_expires_at,
            PrefillService::Epic => self.epic_prefill_expires_at,
        }
    }

    #[must_use]
    pub fn is_active(&self, service: PrefillService, now: OffsetDateTime) -> bool {
        self.expires_at(service).is_some_and(|expiry| now < expiry)
    }
}

/// One cookie session, persisted as a JSON record keyed by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub previous_token_hash: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub previous_token_valid_until: Option<OffsetDateTime>,
    pub kind: SessionKind,
    /// Fingerprint of the credential that minted an admin session.
    pub credential_fingerprint: Option<String>,
    /// Guest fingerprint for guest-kind sessions, used to find the guest
    /// record when the browser sends no device header.
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_rotated_at: Option<OffsetDateTime>,
    pub is_revoked: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub scoped_grants: ScopedGrants,
}

impl SessionRecord {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// Tunable windows for the session lifecycle.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    admin_ttl: Duration,
    guest_ttl: Duration,
    rotation_grace: Duration,
    rotation_min_interval: Duration,
    last_seen_throttle: Duration,
    retention: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            admin_ttl: Duration::days(30),
            guest_ttl: Duration::hours(6),
            rotation_grace: Duration::seconds(30),
            rotation_min_interval: Duration::seconds(30),
            last_seen_throttle: Duration::seconds(60),
            retention: Duration::days(7),
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn with_admin_ttl(mut self, ttl: Duration) -> Self {
        self.admin_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_guest_ttl(mut self, ttl: Duration) -> Self {
        self.guest_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_rotation_grace(mut self, grace: Duration) -> Self {
        self.rotation_grace = grace;
        self
    }

    #[must_use]
    pub fn with_rotation_min_interval(mut self, interval: Duration) -> Self {
        self.rotation_min_interval = interval;
        self
    }

    #[must_use]
    pub fn with_last_seen_throttle(mut self, throttle: Duration) -> Self {
        self.last_seen_throttle = throttle;
        self
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn admin_ttl_seconds(&self) -> i64 {
        self.admin_ttl.whole_seconds()
    }
}

/// In-memory session table over the session record directory.
pub struct SessionManager {
    dir: PathBuf,
    credentials: Arc<CredentialStore>,
    settings: SessionSettings,
    cache: Mutex<HashMap<Uuid, SessionRecord>>,
}

impl SessionManager {
    /// Load existing sessions from the record directory.
    ///
    /// # Errors
    /// Returns an error if the record directory cannot be created or listed.
    pub async fn open(
        dir: PathBuf,
        credentials: Arc<CredentialStore>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let records: Vec<SessionRecord> = storage::load_dir(&dir).await?;
        let cache = records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        Ok(Self {
            dir,
            credentials,
            settings,
            cache: Mutex::new(cache),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Mint an admin session after validating the presented credential.
    /// Returns `None` when the credential does not check out.
    ///
    /// # Errors
    /// Returns an error for token generation or storage failures.
    pub async fn create_admin_session(
        &self,
        credential: &str,
        context: &RequestContext,
    ) -> Result<Option<(String, SessionRecord)>> {
        if !self.credentials.validate(credential).await {
            return Ok(None);
        }
        let session = self
            .insert_session(
                SessionKind::Admin,
                self.settings.admin_ttl,
                Some(credential_fingerprint(credential)),
                None,
                context,
            )
            .await?;
        Ok(Some(session))
    }

    /// Mint a guest session bound to the given guest fingerprint.
    ///
    /// # Errors
    /// Returns an error for token generation or storage failures.
    pub async fn create_guest_session(
        &self,
        guest_id: &str,
        context: &RequestContext,
    ) -> Result<(String, SessionRecord)> {
        self.insert_session(
            SessionKind::Guest,
            self.settings.guest_ttl,
            None,
            Some(guest_id.to_string()),
            context,
        )
        .await
    }

    /// Resolve a raw token into a live session.
    ///
    /// Accepts the current hash, or the previous hash while its grace window
    /// is open. Revoked and expired sessions resolve to `None`, as do admin
    /// sessions whose minting credential is no longer current.
    pub async fn validate(&self, raw_token: &str) -> Option<SessionRecord> {
        let token_hash = hash_session_token(raw_token);
        let now = OffsetDateTime::now_utc();

        let mut cache = self.cache.lock().await;
        let record = find_by_hash(&cache, &token_hash, now)?.clone();

        if record.is_revoked || record.is_expired(now) {
            return None;
        }
        if record.kind == SessionKind::Admin && !self.fingerprint_current(&record).await {
            return None;
        }

        // Throttled activity stamp; bounds write volume, not correctness.
        if now - record.last_seen_at >= self.settings.last_seen_throttle {
            if let Some(live) = cache.get_mut(&record.id) {
                live.last_seen_at = now;
                let path = storage::record_path(&self.dir, &live.id.to_string());
                if let Err(err) = storage::write_json(&path, live).await {
                    error!(session_id = %record.id, "Failed to stamp session activity: {err:#}");
                }
            }
        }

        cache.get(&record.id).cloned()
    }

    /// Resolve a raw token to its record without any validity checks.
    /// Used only to recover the stored guest fingerprint of a stale cookie.
    pub async fn peek(&self, raw_token: &str) -> Option<SessionRecord> {
        let token_hash = hash_session_token(raw_token);
        let cache = self.cache.lock().await;
        cache
            .values()
            .find(|record| {
                record.token_hash == token_hash
                    || record.previous_token_hash.as_deref() == Some(token_hash.as_str())
            })
            .cloned()
    }

    /// Rotate a session's token, returning the new raw value.
    ///
    /// Skipped (`None`) when a rotation already happened inside the minimum
    /// interval, so concurrent traffic cannot trigger rotation storms. The
    /// outgoing hash stays valid for the grace window.
    ///
    /// # Errors
    /// Returns an error for token generation or storage failures.
    pub async fn rotate(&self, session_id: Uuid) -> Result<Option<String>> {
        let now = OffsetDateTime::now_utc();
        let mut cache = self.cache.lock().await;
        let Some(record) = cache.get_mut(&session_id) else {
            return Ok(None);
        };
        if record.is_revoked || record.is_expired(now) {
            return Ok(None);
        }
        if record
            .last_rotated_at
            .is_some_and(|at| now - at < self.settings.rotation_min_interval)
        {
            return Ok(None);
        }

        let raw = generate_session_token()?;
        record.previous_token_hash = Some(std::mem::replace(
            &mut record.token_hash,
            hash_session_token(&raw),
        ));
        record.previous_token_valid_until = Some(now + self.settings.rotation_grace);
        record.last_rotated_at = Some(now);

        let path = storage::record_path(&self.dir, &record.id.to_string());
        storage::write_json(&path, record).await?;
        debug!(session_id = %session_id, "Session token rotated");
        Ok(Some(raw))
    }

    /// Mark a session revoked. The record stays until the retention sweep.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn revoke(&self, session_id: Uuid) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut cache = self.cache.lock().await;
        let Some(record) = cache.get_mut(&session_id) else {
            return Ok(false);
        };
        if record.is_revoked {
            return Ok(true);
        }
        record.is_revoked = true;
        record.revoked_at = Some(now);
        let path = storage::record_path(&self.dir, &record.id.to_string());
        storage::write_json(&path, record).await?;
        Ok(true)
    }

    /// Revoke whatever session a raw token resolves to (logout path).
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn revoke_by_token(&self, raw_token: &str) -> Result<bool> {
        let session_id = {
            let token_hash = hash_session_token(raw_token);
            let cache = self.cache.lock().await;
            find_by_hash(&cache, &token_hash, OffsetDateTime::now_utc()).map(|record| record.id)
        };
        match session_id {
            Some(id) => self.revoke(id).await,
            None => Ok(false),
        }
    }

    /// Revoke every session bound to a guest fingerprint, so revoking the
    /// guest record also cuts off its browser cookie.
    ///
    /// # Errors
    /// Returns an error if a record cannot be persisted.
    pub async fn revoke_by_device(&self, device_id: &str) -> Result<usize> {
        let ids: Vec<Uuid> = {
            let cache = self.cache.lock().await;
            cache
                .values()
                .filter(|record| {
                    !record.is_revoked && record.device_id.as_deref() == Some(device_id)
                })
                .map(|record| record.id)
                .collect()
        };
        let mut revoked = 0;
        for id in &ids {
            if self.revoke(*id).await? {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Set a scoped feature expiry `duration_hours` ahead of now.
    /// Returns `false` when the session does not exist.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn grant_scoped_feature(
        &self,
        session_id: Uuid,
        service: PrefillService,
        duration_hours: i64,
    ) -> Result<bool> {
        self.update_scoped_feature(
            session_id,
            service,
            Some(OffsetDateTime::now_utc() + Duration::hours(duration_hours)),
        )
        .await
    }

    /// Clear a scoped feature expiry.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    pub async fn revoke_scoped_feature(
        &self,
        session_id: Uuid,
        service: PrefillService,
    ) -> Result<bool> {
        self.update_scoped_feature(session_id, service, None).await
    }

    /// Delete sessions expired or revoked longer than the retention window.
    /// Idempotent; safe to run concurrently with live validation.
    ///
    /// # Errors
    /// Returns an error if a record file cannot be deleted.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        let retention = self.settings.retention;
        let mut cache = self.cache.lock().await;

        let stale: Vec<Uuid> = cache
            .values()
            .filter(|record| {
                let expired_long_ago = now - record.expires_at > retention;
                let revoked_long_ago = record
                    .revoked_at
                    .is_some_and(|revoked_at| now - revoked_at > retention);
                expired_long_ago || revoked_long_ago
            })
            .map(|record| record.id)
            .collect();

        for id in &stale {
            storage::remove(&storage::record_path(&self.dir, &id.to_string())).await?;
            cache.remove(id);
        }
        Ok(stale.len())
    }

    /// All sessions, newest first, for the dashboard listing.
    pub async fn list(&self) -> Vec<SessionRecord> {
        let cache = self.cache.lock().await;
        let mut records: Vec<SessionRecord> = cache.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub async fn get(&self, session_id: Uuid) -> Option<SessionRecord> {
        let cache = self.cache.lock().await;
        cache.get(&session_id).cloned()
    }

    async fn insert_session(
        &self,
        kind: SessionKind,
        ttl: Duration,
        fingerprint: Option<String>,
        device_id: Option<String>,
        context: &RequestContext,
    ) -> Result<(String, SessionRecord)> {
        let raw = generate_session_token()?;
        let now = OffsetDateTime::now_utc();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            token_hash: hash_session_token(&raw),
            previous_token_hash: None,
            previous_token_valid_until: None,
            kind,
            credential_fingerprint: fingerprint,
            device_id,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            created_at: now,
            expires_at: now + ttl,
            last_seen_at: now,
            last_rotated_at: None,
            is_revoked: false,
            revoked_at: None,
            scoped_grants: ScopedGrants::default(),
        };

        let mut cache = self.cache.lock().await;
        let path = storage::record_path(&self.dir, &record.id.to_string());
        storage::write_json(&path, &record).await?;
        cache.insert(record.id, record.clone());
        debug!(session_id = %record.id, kind = ?kind, "Session created");
        Ok((raw, record))
    }

    async fn update_scoped_feature(
        &self,
        session_id: Uuid,
        service: PrefillService,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<bool> {
        let mut cache = self.cache.lock().await;
        let Some(record) = cache.get_mut(&session_id) else {
            return Ok(false);
        };
        *record.scoped_grants.slot(service) = expires_at;
        let path = storage::record_path(&self.dir, &record.id.to_string());
        storage::write_json(&path, record).await?;
        Ok(true)
    }

    async fn fingerprint_current(&self, record: &SessionRecord) -> bool {
        let Some(stored) = record.credential_fingerprint.as_deref() else {
            return false;
        };
        let Ok(current) = self.credentials.get_or_create().await else {
            return false;
        };
        stored == credential_fingerprint(&current)
    }
}

fn find_by_hash<'a>(
    cache: &'a HashMap<Uuid, SessionRecord>,
    token_hash: &str,
    now: OffsetDateTime,
) -> Option<&'a SessionRecord> {
    cache.values().find(|record| {
        if record.token_hash == token_hash {
            return true;
        }
        // Previous hash only counts while its grace window is open.
        record.previous_token_hash.as_deref() == Some(token_hash)
            && record
                .previous_token_valid_until
                .is_some_and(|until| now < until)
    })
}

/// Build a secure `HttpOnly` cookie carrying the session token.
pub(crate) fn session_cookie(
    token: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the session token from the cookie, falling back to the
/// `access_token` query parameter for cookie-less transports.
pub(crate) fn extract_session_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(header) = headers.get(axum::http::header::COOKIE) {
        if let Ok(value) = header.to_str() {
            for pair in value.split(';') {
                let trimmed = pair.trim();
                let mut parts = trimmed.splitn(2, '=');
                let key = parts.next()?.trim();
                let val = parts.next().unwrap_or("").trim();
                if key == SESSION_COOKIE_NAME && !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
    }
    super::utils::query_param(query, TOKEN_QUERY_PARAM)
}

/// Whether the request arrived over a secure transport.
/// Checked so the `Secure` cookie attribute mirrors the actual channel.
pub(crate) fn request_is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::credential::CredentialTier;
    use axum::http::HeaderValue as HttpHeaderValue;

    async fn manager(
        dir: &tempfile::TempDir,
        settings: SessionSettings,
    ) -> Result<(SessionManager, Arc<CredentialStore>, String)> {
        let credentials = Arc::new(CredentialStore::new(
            dir.path().join("credential.key"),
            CredentialTier::Primary,
        ));
        let credential = credentials.get_or_create().await?;
        let manager =
            SessionManager::open(dir.path().join("sessions"), credentials.clone(), settings)
                .await?;
        Ok((manager, credentials, credential))
    }

    #[tokio::test]
    async fn admin_login_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, _, credential) = manager(&dir, SessionSettings::default()).await?;

        assert!(
            manager
                .create_admin_session("lm_wrong", &RequestContext::default())
                .await?
                .is_none()
        );

        let (raw, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("valid credential should mint a session");
        assert_eq!(record.kind, SessionKind::Admin);

        let validated = manager.validate(&raw).await.expect("token should validate");
        assert_eq!(validated.id, record.id);
        assert!(manager.validate("bogus-token").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rotation_keeps_old_token_during_grace() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, _, credential) = manager(&dir, SessionSettings::default()).await?;
        let (old_raw, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        let new_raw = manager.rotate(record.id).await?.expect("first rotation");
        assert_ne!(old_raw, new_raw);

        // Inside the grace window both tokens resolve to the same session.
        assert_eq!(manager.validate(&old_raw).await.map(|s| s.id), Some(record.id));
        assert_eq!(manager.validate(&new_raw).await.map(|s| s.id), Some(record.id));

        // A second rotation inside the minimum interval is skipped.
        assert!(manager.rotate(record.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rotation_grace_expiry_drops_old_token() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = SessionSettings::default()
            .with_rotation_grace(Duration::ZERO)
            .with_rotation_min_interval(Duration::ZERO);
        let (manager, _, credential) = manager(&dir, settings).await?;
        let (old_raw, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        let new_raw = manager.rotate(record.id).await?.expect("rotation");
        // Grace window of zero: the old token is dead immediately.
        assert!(manager.validate(&old_raw).await.is_none());
        assert!(manager.validate(&new_raw).await.is_some());

        // With no minimum interval the next rotation goes through.
        assert!(manager.rotate(record.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn credential_regeneration_invalidates_admin_sessions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, credentials, credential) =
            manager(&dir, SessionSettings::default()).await?;
        let (admin_raw, _) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");
        let (guest_raw, _) = manager
            .create_guest_session("guest-fingerprint-1234", &RequestContext::default())
            .await?;

        credentials.force_regenerate().await?;

        assert!(manager.validate(&admin_raw).await.is_none());
        // Guest sessions never depended on the credential.
        assert!(manager.validate(&guest_raw).await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn revocation_and_expiry_invalidate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = SessionSettings::default().with_guest_ttl(Duration::ZERO);
        let (manager, _, credential) = manager(&dir, settings).await?;

        let (raw, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");
        assert!(manager.revoke(record.id).await?);
        assert!(manager.validate(&raw).await.is_none());
        // Revoking again is a no-op that still reports the session.
        assert!(manager.revoke(record.id).await?);

        let (guest_raw, _) = manager
            .create_guest_session("guest-fingerprint-1234", &RequestContext::default())
            .await?;
        // Zero TTL: expired on arrival.
        assert!(manager.validate(&guest_raw).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn scoped_grants_set_and_clear() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, _, credential) = manager(&dir, SessionSettings::default()).await?;
        let (_, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        assert!(
            manager
                .grant_scoped_feature(record.id, PrefillService::Steam, 4)
                .await?
        );
        let updated = manager.get(record.id).await.expect("record");
        let now = OffsetDateTime::now_utc();
        assert!(updated.scoped_grants.is_active(PrefillService::Steam, now));
        assert!(!updated.scoped_grants.is_active(PrefillService::Epic, now));

        let expiry = updated
            .scoped_grants
            .expires_at(PrefillService::Steam)
            .expect("expiry");
        let delta = expiry - now - Duration::hours(4);
        assert!(delta.abs() < Duration::seconds(5));

        assert!(
            manager
                .revoke_scoped_feature(record.id, PrefillService::Steam)
                .await?
        );
        let cleared = manager.get(record.id).await.expect("record");
        assert!(!cleared.scoped_grants.is_active(PrefillService::Steam, now));

        assert!(
            !manager
                .grant_scoped_feature(Uuid::new_v4(), PrefillService::Steam, 1)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn last_seen_stamp_respects_throttle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = SessionSettings::default().with_last_seen_throttle(Duration::ZERO);
        let (manager, _, credential) = manager(&dir, settings).await?;
        let (raw, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let validated = manager.validate(&raw).await.expect("session validates");
        // Zero throttle: every validation refreshes the stamp.
        assert!(validated.last_seen_at > record.last_seen_at);
        Ok(())
    }

    #[tokio::test]
    async fn last_seen_stamp_skipped_inside_throttle_window() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, _, credential) = manager(&dir, SessionSettings::default()).await?;
        let (raw, record) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        // Default 60s throttle: an immediate re-validation does not stamp.
        let validated = manager.validate(&raw).await.expect("session validates");
        assert_eq!(validated.last_seen_at, record.last_seen_at);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = SessionSettings::default()
            .with_guest_ttl(Duration::ZERO)
            .with_retention(Duration::ZERO);
        let (manager, _, credential) = manager(&dir, settings).await?;

        manager
            .create_guest_session("guest-fingerprint-1234", &RequestContext::default())
            .await?;
        let (_, keeper) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        // Give the expired guest record a strictly-past expiry.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(manager.cleanup_expired().await?, 1);
        assert_eq!(manager.cleanup_expired().await?, 0);
        assert!(manager.get(keeper.id).await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn sessions_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, credentials, credential) =
            manager(&dir, SessionSettings::default()).await?;
        let (raw, _) = manager
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");
        drop(manager);

        let reopened = SessionManager::open(
            dir.path().join("sessions"),
            credentials,
            SessionSettings::default(),
        )
        .await?;
        assert!(reopened.validate(&raw).await.is_some());
        Ok(())
    }

    #[test]
    fn cookie_attributes() -> Result<()> {
        let cookie = session_cookie("token", 60, true)?;
        let value = cookie.to_str()?;
        assert!(value.starts_with("gardisto_session=token"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Secure"));

        let plain = session_cookie("token", 60, false)?;
        assert!(!plain.to_str()?.contains("Secure"));

        let cleared = clear_session_cookie(false)?;
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn token_extraction_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HttpHeaderValue::from_static("other=1; gardisto_session=cookie-token"),
        );
        assert_eq!(
            extract_session_token(&headers, Some("access_token=query-token")),
            Some("cookie-token".to_string())
        );
        assert_eq!(
            extract_session_token(&HeaderMap::new(), Some("access_token=query-token")),
            Some("query-token".to_string())
        );
        assert_eq!(extract_session_token(&HeaderMap::new(), None), None);
    }

    #[test]
    fn secure_transport_detection() {
        let mut headers = HeaderMap::new();
        assert!(!request_is_secure(&headers));
        headers.insert("x-forwarded-proto", HttpHeaderValue::from_static("https"));
        assert!(request_is_secure(&headers));
    }
}
