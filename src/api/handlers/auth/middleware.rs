//! Per-request arbitration: an ordered chain of rules, first match decides.
//!
//! Flow Overview:
//! 1) kill switch — access control disabled, allow unconditionally
//! 2) public allowlist — bootstrap/status endpoints bypass all checks
//! 3) session cookie — admin or guest identity from the session kind
//! 4) credential header — programmatic clients without cookies
//! 5) registered device header — decrypt-and-revalidate against the store
//! 6) guest session id — explicit 401 codes for revoked/expired guests
//! 7) protected namespace fallback — 401 under `/api`, pass-through elsewhere
//!
//! Each rule is a pure function over [`RequestMeta`] returning
//! `Option<Decision>`; `None` falls through to the next rule. Keeping the
//! rules separate keeps the precedence order independently testable.

use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, Method, Uri, header::AUTHORIZATION, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use super::principal::{Access, AuthMethod, Principal};
use super::session::{self, SessionKind};
use super::state::AuthState;
use super::types::AuthRejection;
use super::utils::query_param;

pub(crate) const API_KEY_HEADER: &str = "x-api-key";
pub(crate) const DEVICE_ID_HEADER: &str = "x-device-id";

/// Query fallback for transports that cannot set custom headers.
pub(crate) const DEVICE_ID_QUERY_PARAM: &str = "device_id";

/// Everything under this prefix requires a resolved identity.
const PROTECTED_PREFIX: &str = "/api";

/// (method, path) pairs that bypass all checks: status reads and the
/// bootstrap endpoints a client must reach before it can authenticate.
const PUBLIC_ROUTES: &[(&str, &str)] = &[
    ("GET", "/"),
    ("GET", "/health"),
    ("GET", "/api/config"),
    ("POST", "/api/auth/login"),
    ("POST", "/api/auth/logout"),
    ("GET", "/api/auth/session"),
    ("POST", "/api/auth/device/register"),
    ("POST", "/api/auth/guest"),
];

/// The slice of a request the rules look at.
#[derive(Clone, Debug, Default)]
pub(crate) struct RequestMeta {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) session_token: Option<String>,
    pub(crate) credential: Option<String>,
    pub(crate) device_id: Option<String>,
    pub(crate) secure: bool,
}

impl RequestMeta {
    pub(crate) fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let query = uri.query();
        Self {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            session_token: session::extract_session_token(headers, query),
            credential: extract_credential(headers),
            device_id: extract_device_id(headers, query),
            secure: session::request_is_secure(headers),
        }
    }
}

/// Outcome of the arbitration chain.
#[derive(Debug)]
pub(crate) enum Decision {
    /// Forward the request; `None` means no identity was resolved (kill
    /// switch, allowlist, or genuinely public surface).
    Allow(Option<Principal>),
    Reject(AuthRejection),
}

/// Evaluate the rule chain in strict precedence order.
pub(crate) async fn decide(state: &AuthState, meta: &RequestMeta) -> Decision {
    if let Some(decision) = rule_kill_switch(state) {
        return decision;
    }
    if let Some(decision) = rule_public_allowlist(meta) {
        return decision;
    }
    if let Some(decision) = rule_session_cookie(state, meta).await {
        return decision;
    }
    if let Some(decision) = rule_credential_header(state, meta).await {
        return decision;
    }
    if let Some(decision) = rule_registered_device(state, meta).await {
        return decision;
    }
    if let Some(decision) = rule_guest_session(state, meta).await {
        return decision;
    }
    rule_protected_namespace(meta)
}

/// Axum layer: arbitrate, stash the principal, and rotate cookie sessions.
pub async fn arbitrate(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let meta = RequestMeta::from_parts(request.method(), request.uri(), request.headers());

    match decide(&state, &meta).await {
        Decision::Reject(rejection) => {
            warn!(
                method = %meta.method,
                path = %meta.path,
                status = %rejection.status(),
                "Request rejected by arbitration"
            );
            rejection.into_response()
        }
        Decision::Allow(principal) => {
            let rotated_cookie = match &principal {
                Some(principal) => rotate_session_cookie(&state, principal, meta.secure).await,
                None => None,
            };

            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            let mut response = next.run(request).await;
            if let Some(cookie) = rotated_cookie {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            response
        }
    }
}

/// 1. Access control disabled: allow everything, resolve nothing.
fn rule_kill_switch(state: &AuthState) -> Option<Decision> {
    if state.config().auth_enabled() {
        None
    } else {
        Some(Decision::Allow(None))
    }
}

/// 2. Fixed public allowlist.
fn rule_public_allowlist(meta: &RequestMeta) -> Option<Decision> {
    PUBLIC_ROUTES
        .iter()
        .any(|(method, path)| *method == meta.method && *path == meta.path)
        .then(|| Decision::Allow(None))
}

/// 3. Session cookie (or `access_token` query fallback).
///
/// Guest-kind sessions are cross-checked against the guest registry so a
/// revoked guest cannot ride a still-valid cookie; a record that was already
/// swept leaves the valid cookie as plain guest access.
async fn rule_session_cookie(state: &AuthState, meta: &RequestMeta) -> Option<Decision> {
    let token = meta.session_token.as_deref()?;
    let record = state.sessions().validate(token).await?;

    match record.kind {
        SessionKind::Admin => Some(Decision::Allow(Some(Principal {
            access: Access::Admin,
            method: AuthMethod::Session,
            tier: Some(super::credential::CredentialTier::Primary),
            session_id: Some(record.id),
            guest_id: None,
        }))),
        SessionKind::Guest => {
            if let Some(guest_id) = record.device_id.clone() {
                if let (false, Some(reason)) =
                    state.guests().validate_with_reason(&guest_id).await
                {
                    debug!(guest_id, reason = ?reason, "Guest cookie rejected");
                    return Some(Decision::Reject(AuthRejection::GuestSession(reason)));
                }
                Some(Decision::Allow(Some(Principal {
                    access: Access::Guest,
                    method: AuthMethod::Session,
                    tier: None,
                    session_id: Some(record.id),
                    guest_id: Some(guest_id),
                })))
            } else {
                Some(Decision::Allow(Some(Principal {
                    access: Access::Guest,
                    method: AuthMethod::Session,
                    tier: None,
                    session_id: Some(record.id),
                    guest_id: None,
                })))
            }
        }
    }
}

/// 4. Credential header for cookie-less programmatic clients.
async fn rule_credential_header(state: &AuthState, meta: &RequestMeta) -> Option<Decision> {
    let candidate = meta.credential.as_deref()?;
    let tier = state.validate_credential(candidate).await?;
    Some(Decision::Allow(Some(Principal {
        access: Access::Admin,
        method: AuthMethod::Credential,
        tier: Some(tier),
        session_id: None,
        guest_id: None,
    })))
}

/// 5. Registered device header.
async fn rule_registered_device(state: &AuthState, meta: &RequestMeta) -> Option<Decision> {
    let device_id = meta.device_id.as_deref()?;
    if !state.devices().validate(device_id).await {
        return None;
    }
    Some(Decision::Allow(Some(Principal {
        access: Access::Admin,
        method: AuthMethod::Device,
        tier: Some(super::credential::CredentialTier::Primary),
        session_id: None,
        guest_id: Some(device_id.to_string()),
    })))
}

/// 6. Guest session, identified by the device header or, for same-site
/// browser flows, by the fingerprint stored on the (possibly stale) cookie
/// session. Revoked/expired guests short-circuit with their 401 code so they
/// never fall through to an uninformative generic rejection.
async fn rule_guest_session(state: &AuthState, meta: &RequestMeta) -> Option<Decision> {
    let guest_id = match &meta.device_id {
        Some(id) => Some(id.clone()),
        None => match &meta.session_token {
            Some(token) => state
                .sessions()
                .peek(token)
                .await
                .and_then(|record| record.device_id),
            None => None,
        },
    }?;

    match state.guests().validate_with_reason(&guest_id).await {
        (true, _) => Some(Decision::Allow(Some(Principal {
            access: Access::Guest,
            method: AuthMethod::GuestSession,
            tier: None,
            session_id: None,
            guest_id: Some(guest_id),
        }))),
        (false, Some(reason)) => Some(Decision::Reject(AuthRejection::GuestSession(reason))),
        (false, None) => None,
    }
}

/// 7. Nothing matched: 401 under the protected namespace, pass through for
/// genuinely public surface not worth enumerating in the allowlist.
fn rule_protected_namespace(meta: &RequestMeta) -> Decision {
    if meta.path.starts_with(PROTECTED_PREFIX) {
        Decision::Reject(AuthRejection::Unauthenticated)
    } else {
        Decision::Allow(None)
    }
}

/// Attempt the silent rotation for cookie-carried sessions. The manager
/// self-throttles, so this is safe to try on every request.
async fn rotate_session_cookie(
    state: &AuthState,
    principal: &Principal,
    secure: bool,
) -> Option<axum::http::HeaderValue> {
    if principal.method != AuthMethod::Session {
        return None;
    }
    let session_id = principal.session_id?;

    match state.sessions().rotate(session_id).await {
        Ok(Some(raw)) => {
            let record = state.sessions().get(session_id).await?;
            let max_age = (record.expires_at - OffsetDateTime::now_utc())
                .whole_seconds()
                .max(0);
            session::session_cookie(&raw, max_age, secure).ok()
        }
        Ok(None) => None,
        Err(err) => {
            error!(session_id = %session_id, "Failed to rotate session token: {err:#}");
            None
        }
    }
}

fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(API_KEY_HEADER) {
        if let Ok(candidate) = value.to_str() {
            let trimmed = candidate.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    extract_bearer_token(headers)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn extract_device_id(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(DEVICE_ID_HEADER) {
        if let Ok(id) = value.to_str() {
            let trimmed = id.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    query_param(query, DEVICE_ID_QUERY_PARAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::credential::CredentialTier;
    use crate::api::handlers::auth::guest::{GuestInvalidReason, GuestMetadata};
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::handlers::auth::types::RequestContext;
    use anyhow::Result;

    const GUEST_ID: &str = "guest-fingerprint-0001";
    const DEVICE_ID: &str = "registered-device-0123456789abcdef";

    fn api_request(path: &str) -> RequestMeta {
        RequestMeta {
            method: "GET".to_string(),
            path: path.to_string(),
            ..RequestMeta::default()
        }
    }

    async fn open_state(auth_enabled: bool) -> Result<(tempfile::TempDir, AuthState)> {
        let dir = tempfile::tempdir()?;
        let config =
            AuthConfig::new(dir.path().to_path_buf()).with_auth_enabled(auth_enabled);
        let state = AuthState::open(config).await?;
        Ok((dir, state))
    }

    fn assert_allows_admin(decision: &Decision, method: AuthMethod) {
        match decision {
            Decision::Allow(Some(principal)) => {
                assert_eq!(principal.access, Access::Admin);
                assert_eq!(principal.method, method);
            }
            other => panic!("expected admin allow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn kill_switch_allows_everything() -> Result<()> {
        let (_dir, state) = open_state(false).await?;
        let decision = decide(&state, &api_request("/api/auth/devices")).await;
        assert!(matches!(decision, Decision::Allow(None)));
        Ok(())
    }

    #[tokio::test]
    async fn allowlist_bypasses_checks() -> Result<()> {
        let (_dir, state) = open_state(true).await?;

        let mut meta = api_request("/api/config");
        let decision = decide(&state, &meta).await;
        assert!(matches!(decision, Decision::Allow(None)));

        // Same path, different method: not in the allowlist.
        meta.method = "PUT".to_string();
        let decision = decide(&state, &meta).await;
        assert!(matches!(
            decision,
            Decision::Reject(AuthRejection::Unauthenticated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn credential_header_resolves_admin() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        let credential = state.credentials().get_or_create().await?;

        let meta = RequestMeta {
            credential: Some(credential),
            ..api_request("/api/cache/status")
        };
        let decision = decide(&state, &meta).await;
        assert_allows_admin(&decision, AuthMethod::Credential);

        let meta = RequestMeta {
            credential: Some("lm_wrong".to_string()),
            ..api_request("/api/cache/status")
        };
        let decision = decide(&state, &meta).await;
        assert!(matches!(
            decision,
            Decision::Reject(AuthRejection::Unauthenticated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn limited_credential_resolves_limited_tier() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AuthConfig::new(dir.path().to_path_buf()).with_limited_credential(true);
        let state = AuthState::open(config).await?;
        let limited = state
            .limited_credentials()
            .expect("limited store")
            .get_or_create()
            .await?;

        let meta = RequestMeta {
            credential: Some(limited),
            ..api_request("/api/cache/status")
        };
        match decide(&state, &meta).await {
            Decision::Allow(Some(principal)) => {
                assert_eq!(principal.tier, Some(CredentialTier::Limited));
            }
            other => panic!("expected limited admin, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn session_cookie_resolves_kind() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        let credential = state.credentials().get_or_create().await?;
        let (raw, _) = state
            .sessions()
            .create_admin_session(&credential, &RequestContext::default())
            .await?
            .expect("session");

        let meta = RequestMeta {
            session_token: Some(raw),
            ..api_request("/api/cache/status")
        };
        let decision = decide(&state, &meta).await;
        assert_allows_admin(&decision, AuthMethod::Session);
        Ok(())
    }

    #[tokio::test]
    async fn guest_cookie_cross_checks_registry() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        state
            .guests()
            .create(GUEST_ID, GuestMetadata::default(), &RequestContext::default())
            .await?;
        let (raw, _) = state
            .sessions()
            .create_guest_session(GUEST_ID, &RequestContext::default())
            .await?;

        let meta = RequestMeta {
            session_token: Some(raw),
            ..api_request("/api/cache/status")
        };
        match decide(&state, &meta).await {
            Decision::Allow(Some(principal)) => {
                assert_eq!(principal.access, Access::Guest);
                assert_eq!(principal.guest_id.as_deref(), Some(GUEST_ID));
            }
            other => panic!("expected guest allow, got {other:?}"),
        }

        // Revoking the guest record cuts off the still-valid cookie with an
        // explicit code.
        state.guests().revoke(GUEST_ID, None).await?;
        match decide(&state, &meta).await {
            Decision::Reject(AuthRejection::GuestSession(reason)) => {
                assert_eq!(reason, GuestInvalidReason::Revoked);
            }
            other => panic!("expected revoked rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn registered_device_resolves_admin() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        let credential = state.credentials().get_or_create().await?;
        state
            .devices()
            .register(DEVICE_ID, &credential, &RequestContext::default(), None)
            .await?;

        let meta = RequestMeta {
            device_id: Some(DEVICE_ID.to_string()),
            ..api_request("/api/cache/status")
        };
        let decision = decide(&state, &meta).await;
        assert_allows_admin(&decision, AuthMethod::Device);
        Ok(())
    }

    #[tokio::test]
    async fn guest_device_header_resolves_guest() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        state
            .guests()
            .create(GUEST_ID, GuestMetadata::default(), &RequestContext::default())
            .await?;

        let meta = RequestMeta {
            device_id: Some(GUEST_ID.to_string()),
            ..api_request("/api/cache/status")
        };
        match decide(&state, &meta).await {
            Decision::Allow(Some(principal)) => {
                assert_eq!(principal.access, Access::Guest);
                assert_eq!(principal.method, AuthMethod::GuestSession);
            }
            other => panic!("expected guest allow, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn revoked_guest_short_circuits_with_code() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        state
            .guests()
            .create(GUEST_ID, GuestMetadata::default(), &RequestContext::default())
            .await?;
        state.guests().revoke(GUEST_ID, None).await?;

        let meta = RequestMeta {
            device_id: Some(GUEST_ID.to_string()),
            ..api_request("/api/cache/status")
        };
        match decide(&state, &meta).await {
            Decision::Reject(AuthRejection::GuestSession(reason)) => {
                assert_eq!(reason, GuestInvalidReason::Revoked);
            }
            other => panic!("expected revoked rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn credential_beats_revoked_guest() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        let credential = state.credentials().get_or_create().await?;
        state
            .guests()
            .create(GUEST_ID, GuestMetadata::default(), &RequestContext::default())
            .await?;
        state.guests().revoke(GUEST_ID, None).await?;

        // Both a valid credential header and a revoked guest id: the higher
        // precedence mechanism wins and access is granted.
        let meta = RequestMeta {
            credential: Some(credential),
            device_id: Some(GUEST_ID.to_string()),
            ..api_request("/api/cache/status")
        };
        let decision = decide(&state, &meta).await;
        assert_allows_admin(&decision, AuthMethod::Credential);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_guest_falls_through_to_generic_401() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        let meta = RequestMeta {
            device_id: Some("never-seen-fingerprint".to_string()),
            ..api_request("/api/cache/status")
        };
        let decision = decide(&state, &meta).await;
        assert!(matches!(
            decision,
            Decision::Reject(AuthRejection::Unauthenticated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_api_paths_pass_through() -> Result<()> {
        let (_dir, state) = open_state(true).await?;
        let decision = decide(&state, &api_request("/favicon.ico")).await;
        assert!(matches!(decision, Decision::Allow(None)));
        Ok(())
    }

    #[test]
    fn meta_extraction_from_request_parts() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "lm_key".parse().expect("header"));
        headers.insert(DEVICE_ID_HEADER, "device-a".parse().expect("header"));
        headers.insert(
            axum::http::header::COOKIE,
            "gardisto_session=tok".parse().expect("header"),
        );
        headers.insert("x-forwarded-proto", "https".parse().expect("header"));

        let uri: Uri = "/api/thing?device_id=ignored".parse().expect("uri");
        let meta = RequestMeta::from_parts(&Method::GET, &uri, &headers);
        assert_eq!(meta.method, "GET");
        assert_eq!(meta.path, "/api/thing");
        assert_eq!(meta.session_token.as_deref(), Some("tok"));
        assert_eq!(meta.credential.as_deref(), Some("lm_key"));
        // Header beats the query fallback.
        assert_eq!(meta.device_id.as_deref(), Some("device-a"));
        assert!(meta.secure);
    }

    #[test]
    fn bearer_token_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer lm_key".parse().expect("header"));
        assert_eq!(extract_credential(&headers), Some("lm_key".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcg==".parse().expect("header"));
        assert_eq!(extract_credential(&headers), None);
    }

    #[test]
    fn device_id_query_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_device_id(&headers, Some("device_id=from-query")),
            Some("from-query".to_string())
        );
        assert_eq!(extract_device_id(&headers, None), None);
    }
}
