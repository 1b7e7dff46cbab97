//! Bootstrap endpoints: login, logout, session introspection, device
//! registration, and guest-mode entry.
//!
//! These are the allowlisted routes a client can reach before it has any
//! identity; everything else under `/api` goes through the arbitration
//! middleware first.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::device::RegisterOutcome;
use super::guest::GuestMetadata;
use super::session::{self, extract_session_token};
use super::state::AuthState;
use super::types::{
    AuthRejection, DeviceRegisterRequest, DeviceView, ErrorBody, GuestCreateRequest,
    GuestSessionView, LoginRequest, RequestContext, SessionResponse,
};

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Admin session created", body = SessionResponse),
        (status = 401, description = "Credential rejected", body = ErrorBody),
        (status = 403, description = "Limited credential cannot open a session", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let context = RequestContext::from_headers(&headers);

    // Sessions are minted by the primary credential only; the limited
    // credential authenticates per-request via the header.
    match auth_state
        .sessions()
        .create_admin_session(&request.credential, &context)
        .await
    {
        Ok(Some((raw_token, record))) => {
            let max_age = auth_state.sessions().settings().admin_ttl_seconds();
            let secure = session::request_is_secure(&headers);
            let mut response_headers = HeaderMap::new();
            match session::session_cookie(&raw_token, max_age, secure) {
                Ok(cookie) => {
                    response_headers.insert(SET_COOKIE, cookie);
                }
                Err(err) => {
                    error!("Failed to build session cookie: {err}");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
            info!(session_id = %record.id, "Admin login");
            (
                StatusCode::OK,
                response_headers,
                Json(SessionResponse::from(&record)),
            )
                .into_response()
        }
        Ok(None) => {
            // A valid limited credential still cannot open a session.
            if auth_state.validate_credential(&request.credential).await.is_some() {
                return AuthRejection::Forbidden(
                    "Primary credential required to open a session".to_string(),
                )
                .into_response();
            }
            warn!("Login rejected: invalid credential");
            AuthRejection::Unauthenticated.into_response()
        }
        Err(err) => {
            error!("Failed to create admin session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers, None) {
        if let Err(err) = auth_state.sessions().revoke_by_token(&token).await {
            error!("Failed to revoke session on logout: {err:#}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let secure = session::request_is_secure(&headers);
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session::clear_session_cookie(secure) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn current_session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    // Missing cookies are treated as "no session" to avoid leaking auth state.
    let Some(token) = extract_session_token(&headers, None) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match auth_state.sessions().validate(&token).await {
        Some(record) => (StatusCode::OK, Json(SessionResponse::from(&record))).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/device/register",
    request_body = DeviceRegisterRequest,
    responses(
        (status = 200, description = "Device registered", body = DeviceView),
        (status = 400, description = "Malformed device id", body = ErrorBody),
        (status = 401, description = "Credential rejected", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register_device(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<DeviceRegisterRequest>,
) -> impl IntoResponse {
    let context = RequestContext::from_headers(&headers);
    match auth_state
        .devices()
        .register(
            &request.device_id,
            &request.credential,
            &context,
            request.device_name,
        )
        .await
    {
        Ok(RegisterOutcome::Registered(registration)) => {
            info!(device_id = %registration.device_id, "Device registered");
            (StatusCode::OK, Json(DeviceView::from(registration.as_ref()))).into_response()
        }
        Ok(RegisterOutcome::IdTooShort) => AuthRejection::Validation(format!(
            "device id must be at least {} characters",
            super::device::MIN_DEVICE_ID_LEN
        ))
        .into_response(),
        Ok(RegisterOutcome::InvalidCredential) => {
            warn!("Device registration rejected: invalid credential");
            AuthRejection::Unauthenticated.into_response()
        }
        Err(err) => {
            error!("Failed to register device: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/guest",
    request_body = GuestCreateRequest,
    responses(
        (status = 200, description = "Guest session created", body = GuestSessionView),
        (status = 400, description = "Malformed fingerprint", body = ErrorBody),
        (status = 403, description = "Guest access is locked", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn enter_guest_mode(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<GuestCreateRequest>,
) -> impl IntoResponse {
    if auth_state.config().guest_locked() {
        return AuthRejection::Forbidden("Guest access is locked".to_string()).into_response();
    }
    if request.session_id.trim().is_empty() {
        return AuthRejection::Validation("guest session id must not be empty".to_string())
            .into_response();
    }

    let context = RequestContext::from_headers(&headers);
    let metadata = GuestMetadata {
        device_name: request.device_name,
        os: request.os,
        browser: request.browser,
    };

    let record = match auth_state
        .guests()
        .create(&request.session_id, metadata, &context)
        .await
    {
        Ok(record) => record,
        Err(err) => {
            error!("Failed to create guest session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Same-site browsers also get a guest cookie session bound to the
    // fingerprint, so later requests need no custom header.
    let cookie = match auth_state
        .sessions()
        .create_guest_session(&request.session_id, &context)
        .await
    {
        Ok((raw_token, _)) => {
            let max_age = 3600 * auth_state.guests().session_duration_hours();
            let secure = session::request_is_secure(&headers);
            session::session_cookie(&raw_token, max_age, secure).ok()
        }
        Err(err) => {
            error!("Failed to create guest cookie session: {err:#}");
            None
        }
    };

    let mut response_headers = HeaderMap::new();
    if let Some(cookie) = cookie {
        response_headers.insert(SET_COOKIE, cookie);
    }
    info!(session_id = %record.session_id, "Guest mode entered");
    (
        StatusCode::OK,
        response_headers,
        Json(GuestSessionView::from(&record)),
    )
        .into_response()
}
