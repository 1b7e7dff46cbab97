//! Resolved request identity and per-endpoint authorization guards.
//!
//! The middleware establishes baseline access and inserts a `Principal` into
//! request extensions; handlers that need a *specific* tier call a guard
//! first. With the kill switch off, guards pass everything through.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::credential::CredentialTier;
use super::session::PrefillService;
use super::state::AuthState;
use super::types::AuthRejection;

/// Coarse access level a request resolved to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Admin,
    Guest,
}

/// Which mechanism in the precedence chain produced the identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    Credential,
    Device,
    GuestSession,
}

/// Authenticated caller context carried through request extensions.
#[derive(Clone, Debug)]
pub struct Principal {
    pub access: Access,
    pub method: AuthMethod,
    pub tier: Option<CredentialTier>,
    pub session_id: Option<Uuid>,
    pub guest_id: Option<String>,
}

impl Principal {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.access == Access::Admin
    }

    /// Display label used for audit fields like `revoked_by`.
    #[must_use]
    pub fn label(&self) -> String {
        match (self.access, self.tier) {
            (Access::Admin, Some(CredentialTier::Limited)) => "limited-admin".to_string(),
            (Access::Admin, _) => "admin".to_string(),
            (Access::Guest, _) => self
                .guest_id
                .clone()
                .map_or_else(|| "guest".to_string(), |id| format!("guest:{id}")),
        }
    }
}

/// Require any admin identity.
///
/// # Errors
/// 401 when no identity resolved, 403 for a guest.
pub fn require_admin<'a>(
    state: &AuthState,
    principal: Option<&'a Principal>,
) -> Result<Option<&'a Principal>, AuthRejection> {
    if !state.config().auth_enabled() {
        return Ok(principal);
    }
    match principal {
        Some(principal) if principal.is_admin() => Ok(Some(principal)),
        Some(_) => Err(AuthRejection::Forbidden(
            "Administrator access required".to_string(),
        )),
        None => Err(AuthRejection::Unauthenticated),
    }
}

/// Require the primary admin tier; a valid limited credential is explicitly
/// rejected here even though it passes general admin checks.
///
/// # Errors
/// 401 when no identity resolved, 403 for guests and limited admins.
pub fn require_primary_admin<'a>(
    state: &AuthState,
    principal: Option<&'a Principal>,
) -> Result<Option<&'a Principal>, AuthRejection> {
    let principal = require_admin(state, principal)?;
    if let Some(principal) = principal {
        if principal.tier == Some(CredentialTier::Limited) {
            return Err(AuthRejection::Forbidden(
                "Primary credential required".to_string(),
            ));
        }
    }
    Ok(principal)
}

/// Require any resolved identity, guest included (read endpoints).
///
/// # Errors
/// 401 when no identity resolved.
pub fn require_session<'a>(
    state: &AuthState,
    principal: Option<&'a Principal>,
) -> Result<Option<&'a Principal>, AuthRejection> {
    if !state.config().auth_enabled() {
        return Ok(principal);
    }
    principal.map(Some).ok_or(AuthRejection::Unauthenticated)
}

/// Whether the caller may use the given prefill service right now.
///
/// Admins and registered devices always may; a guest only while its scoped
/// grant is active *and* the underlying session is still live.
pub async fn prefill_allowed(
    state: &AuthState,
    principal: Option<&Principal>,
    service: PrefillService,
) -> bool {
    if !state.config().auth_enabled() {
        return true;
    }
    let Some(principal) = principal else {
        return false;
    };
    if principal.is_admin() {
        return true;
    }

    let now = time::OffsetDateTime::now_utc();

    // Cookie-carried guests: the scoped grant lives on the session record.
    if let Some(session_id) = principal.session_id {
        if let Some(record) = state.sessions().get(session_id).await {
            if !record.is_revoked
                && !record.is_expired(now)
                && record.scoped_grants.is_active(service, now)
            {
                return true;
            }
        }
    }

    // Header-identified guests: the grant lives on the guest record.
    if let Some(guest_id) = principal.guest_id.as_deref() {
        if let Some(record) = state.guests().get(guest_id).await {
            return record.prefill_active(now);
        }
    }

    false
}

/// Guard wrapper over [`prefill_allowed`].
///
/// # Errors
/// 401 when no identity resolved, 403 when the grant is missing or expired.
pub async fn require_prefill(
    state: &AuthState,
    principal: Option<&Principal>,
    service: PrefillService,
) -> Result<(), AuthRejection> {
    if !state.config().auth_enabled() {
        return Ok(());
    }
    if principal.is_none() {
        return Err(AuthRejection::Unauthenticated);
    }
    if prefill_allowed(state, principal, service).await {
        Ok(())
    } else {
        Err(AuthRejection::Forbidden(
            "Prefill access is not enabled for this session".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::AuthConfig;

    fn admin(tier: CredentialTier) -> Principal {
        Principal {
            access: Access::Admin,
            method: AuthMethod::Credential,
            tier: Some(tier),
            session_id: None,
            guest_id: None,
        }
    }

    fn guest() -> Principal {
        Principal {
            access: Access::Guest,
            method: AuthMethod::GuestSession,
            tier: None,
            session_id: None,
            guest_id: Some("guest-fingerprint-0001".to_string()),
        }
    }

    async fn state(auth_enabled: bool) -> anyhow::Result<(tempfile::TempDir, AuthState)> {
        let dir = tempfile::tempdir()?;
        let config =
            AuthConfig::new(dir.path().to_path_buf()).with_auth_enabled(auth_enabled);
        let state = AuthState::open(config).await?;
        Ok((dir, state))
    }

    #[tokio::test]
    async fn admin_guard_rejects_guests_and_anonymous() -> anyhow::Result<()> {
        let (_dir, state) = state(true).await?;

        assert!(require_admin(&state, Some(&admin(CredentialTier::Primary))).is_ok());
        assert!(require_admin(&state, Some(&admin(CredentialTier::Limited))).is_ok());
        assert_eq!(
            require_admin(&state, Some(&guest())).err(),
            Some(AuthRejection::Forbidden(
                "Administrator access required".to_string()
            ))
        );
        assert_eq!(
            require_admin(&state, None).err(),
            Some(AuthRejection::Unauthenticated)
        );
        Ok(())
    }

    #[tokio::test]
    async fn primary_guard_rejects_limited_tier() -> anyhow::Result<()> {
        let (_dir, state) = state(true).await?;

        assert!(require_primary_admin(&state, Some(&admin(CredentialTier::Primary))).is_ok());
        assert_eq!(
            require_primary_admin(&state, Some(&admin(CredentialTier::Limited))).err(),
            Some(AuthRejection::Forbidden(
                "Primary credential required".to_string()
            ))
        );
        Ok(())
    }

    #[tokio::test]
    async fn guards_pass_everything_when_disabled() -> anyhow::Result<()> {
        let (_dir, state) = state(false).await?;

        assert!(require_admin(&state, None).is_ok());
        assert!(require_primary_admin(&state, Some(&guest())).is_ok());
        assert!(require_session(&state, None).is_ok());
        assert!(require_prefill(&state, None, PrefillService::Steam).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn prefill_admin_always_allowed() -> anyhow::Result<()> {
        let (_dir, state) = state(true).await?;
        assert!(
            prefill_allowed(&state, Some(&admin(CredentialTier::Primary)), PrefillService::Epic)
                .await
        );
        assert!(!prefill_allowed(&state, None, PrefillService::Epic).await);
        Ok(())
    }

    #[tokio::test]
    async fn prefill_guest_requires_active_grant() -> anyhow::Result<()> {
        use crate::api::handlers::auth::guest::GuestMetadata;
        use crate::api::handlers::auth::types::RequestContext;

        let (_dir, state) = state(true).await?;
        state
            .guests()
            .create(
                "guest-fingerprint-0001",
                GuestMetadata::default(),
                &RequestContext::default(),
            )
            .await?;

        let principal = guest();
        assert!(!prefill_allowed(&state, Some(&principal), PrefillService::Steam).await);

        state
            .guests()
            .enable_prefill("guest-fingerprint-0001", 2)
            .await?;
        assert!(prefill_allowed(&state, Some(&principal), PrefillService::Steam).await);

        state
            .guests()
            .revoke("guest-fingerprint-0001", Some("admin".to_string()))
            .await?;
        // A revoked guest session overrides the still-active grant.
        assert!(!prefill_allowed(&state, Some(&principal), PrefillService::Steam).await);
        Ok(())
    }

    #[test]
    fn labels_for_audit_fields() {
        assert_eq!(admin(CredentialTier::Primary).label(), "admin");
        assert_eq!(admin(CredentialTier::Limited).label(), "limited-admin");
        assert_eq!(guest().label(), "guest:guest-fingerprint-0001");
    }
}
