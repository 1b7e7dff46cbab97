//! Administrative endpoints over the arbitration state: credential
//! regeneration, device and session listings, guest revocation, and scoped
//! prefill grants.
//!
//! Baseline access was already established by the middleware; these handlers
//! apply the narrower per-endpoint guards on top.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::guest;
use super::principal::{Principal, prefill_allowed, require_admin, require_primary_admin, require_session};
use super::session::PrefillService;
use super::state::AuthState;
use super::types::{
    AuthRejection, DeviceView, ErrorBody, GuestDurationRequest, GuestPrefillRequest,
    GuestSessionView, PrefillAccessResponse, RegenerateResponse, RevokedCountResponse,
    SessionPrefillRequest, SessionPrefillRevokeRequest, SessionView,
};

fn not_found(message: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "not_found".to_string(),
            message: message.to_string(),
            code: None,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/api/auth/regenerate",
    responses(
        (status = 200, description = "Credential replaced", body = RegenerateResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Primary credential required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn regenerate_credential(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_primary_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.credentials().force_regenerate().await {
        Ok((_, fresh)) => {
            info!("Admin credential regenerated; sessions and devices invalidated");
            (StatusCode::OK, Json(RegenerateResponse { credential: fresh })).into_response()
        }
        Err(err) => {
            error!("Failed to regenerate credential: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/devices",
    responses(
        (status = 200, description = "Registered devices", body = [DeviceView]),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_devices(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    let devices: Vec<DeviceView> = auth_state
        .devices()
        .list()
        .await
        .iter()
        .map(DeviceView::from)
        .collect();
    (StatusCode::OK, Json(devices)).into_response()
}

#[utoipa::path(
    delete,
    path = "/api/auth/devices/{device_id}",
    params(("device_id" = String, Path, description = "Device identifier")),
    responses(
        (status = 204, description = "Device revoked"),
        (status = 404, description = "Unknown device", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn revoke_device(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.devices().revoke(&device_id).await {
        Ok(true) => {
            info!(device_id, "Device revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("No such device registration"),
        Err(err) => {
            error!(device_id, "Failed to revoke device: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/auth/devices",
    responses(
        (status = 200, description = "All devices revoked", body = RevokedCountResponse)
    ),
    tag = "admin"
)]
pub async fn revoke_all_devices(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.devices().revoke_all().await {
        Ok(revoked) => {
            info!(revoked, "All devices revoked");
            (StatusCode::OK, Json(RevokedCountResponse { revoked })).into_response()
        }
        Err(err) => {
            error!("Failed to revoke all devices: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/guests",
    responses(
        (status = 200, description = "Guest sessions", body = [GuestSessionView])
    ),
    tag = "admin"
)]
pub async fn list_guests(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    let guests: Vec<GuestSessionView> = auth_state
        .guests()
        .list()
        .await
        .iter()
        .map(GuestSessionView::from)
        .collect();
    (StatusCode::OK, Json(guests)).into_response()
}

#[utoipa::path(
    post,
    path = "/api/auth/guests/{session_id}/revoke",
    params(("session_id" = String, Path, description = "Guest fingerprint")),
    responses(
        (status = 204, description = "Guest session revoked"),
        (status = 404, description = "Unknown guest session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn revoke_guest(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let revoked_by = principal.as_ref().map(|extension| extension.0.label());
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.guests().revoke(&session_id, revoked_by).await {
        Ok(true) => {
            // Also cut off any cookie sessions riding this fingerprint.
            if let Err(err) = auth_state.sessions().revoke_by_device(&session_id).await {
                error!(session_id, "Failed to revoke guest cookie sessions: {err:#}");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("No such guest session"),
        Err(err) => {
            error!(session_id, "Failed to revoke guest session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/auth/guests/{session_id}",
    params(("session_id" = String, Path, description = "Guest fingerprint")),
    responses(
        (status = 204, description = "Guest session deleted"),
        (status = 404, description = "Unknown guest session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_guest(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.guests().delete(&session_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("No such guest session"),
        Err(err) => {
            error!(session_id, "Failed to delete guest session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/guests/{session_id}/prefill",
    params(("session_id" = String, Path, description = "Guest fingerprint")),
    request_body = GuestPrefillRequest,
    responses(
        (status = 204, description = "Prefill enabled"),
        (status = 400, description = "Out-of-range duration", body = ErrorBody),
        (status = 404, description = "Unknown guest session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn enable_guest_prefill(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<String>,
    Json(request): Json<GuestPrefillRequest>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    let duration_hours = request
        .duration_hours
        .unwrap_or_else(|| auth_state.guests().prefill_duration_hours());
    if !guest::duration_in_bounds(duration_hours) {
        return AuthRejection::Validation(format!(
            "prefill duration must be between {} and {} hours",
            guest::MIN_GUEST_HOURS,
            guest::MAX_GUEST_HOURS
        ))
        .into_response();
    }

    match auth_state
        .guests()
        .enable_prefill(&session_id, duration_hours)
        .await
    {
        Ok(true) => {
            info!(session_id, duration_hours, "Guest prefill enabled");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("No such guest session"),
        Err(err) => {
            error!(session_id, "Failed to enable guest prefill: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/auth/guests/{session_id}/prefill",
    params(("session_id" = String, Path, description = "Guest fingerprint")),
    responses(
        (status = 204, description = "Prefill disabled"),
        (status = 404, description = "Unknown guest session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn disable_guest_prefill(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.guests().disable_prefill(&session_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("No such guest session"),
        Err(err) => {
            error!(session_id, "Failed to disable guest prefill: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/sessions",
    responses(
        (status = 200, description = "Cookie sessions", body = [SessionView])
    ),
    tag = "admin"
)]
pub async fn list_sessions(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    let sessions: Vec<SessionView> = auth_state
        .sessions()
        .list()
        .await
        .iter()
        .map(SessionView::from)
        .collect();
    (StatusCode::OK, Json(sessions)).into_response()
}

#[utoipa::path(
    delete,
    path = "/api/auth/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn revoke_session(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.sessions().revoke(session_id).await {
        Ok(true) => {
            info!(session_id = %session_id, "Session revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("No such session"),
        Err(err) => {
            error!(session_id = %session_id, "Failed to revoke session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/sessions/{session_id}/prefill",
    params(("session_id" = Uuid, Path, description = "Session id")),
    request_body = SessionPrefillRequest,
    responses(
        (status = 204, description = "Scoped feature granted"),
        (status = 400, description = "Out-of-range duration", body = ErrorBody),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn grant_session_prefill(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SessionPrefillRequest>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }
    if !guest::duration_in_bounds(request.duration_hours) {
        return AuthRejection::Validation(format!(
            "prefill duration must be between {} and {} hours",
            guest::MIN_GUEST_HOURS,
            guest::MAX_GUEST_HOURS
        ))
        .into_response();
    }

    match auth_state
        .sessions()
        .grant_scoped_feature(session_id, request.service, request.duration_hours)
        .await
    {
        Ok(true) => {
            info!(session_id = %session_id, service = ?request.service, "Scoped feature granted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("No such session"),
        Err(err) => {
            error!(session_id = %session_id, "Failed to grant scoped feature: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/auth/sessions/{session_id}/prefill",
    params(("session_id" = Uuid, Path, description = "Session id")),
    request_body = SessionPrefillRevokeRequest,
    responses(
        (status = 204, description = "Scoped feature revoked"),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn revoke_session_prefill(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SessionPrefillRevokeRequest>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state
        .sessions()
        .revoke_scoped_feature(session_id, request.service)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("No such session"),
        Err(err) => {
            error!(session_id = %session_id, "Failed to revoke scoped feature: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/prefill",
    responses(
        (status = 200, description = "Prefill services available to the caller", body = PrefillAccessResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "prefill"
)]
pub async fn prefill_access(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_session(&auth_state, principal) {
        return rejection.into_response();
    }

    let response = PrefillAccessResponse {
        steam: prefill_allowed(&auth_state, principal, PrefillService::Steam).await,
        epic: prefill_allowed(&auth_state, principal, PrefillService::Epic).await,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    put,
    path = "/api/config/guest-duration",
    request_body = GuestDurationRequest,
    responses(
        (status = 204, description = "Guest duration updated"),
        (status = 400, description = "Out-of-range duration", body = ErrorBody),
        (status = 403, description = "Primary credential required", body = ErrorBody)
    ),
    tag = "config"
)]
pub async fn set_guest_duration(
    auth_state: Extension<Arc<AuthState>>,
    principal: Option<Extension<Principal>>,
    Json(request): Json<GuestDurationRequest>,
) -> impl IntoResponse {
    let principal = principal.as_ref().map(|extension| &extension.0);
    if let Err(rejection) = require_primary_admin(&auth_state, principal) {
        return rejection.into_response();
    }

    match auth_state.guests().set_session_duration_hours(request.hours) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => AuthRejection::Validation(err.to_string()).into_response(),
    }
}
