//! Request/response types and the structured rejection body.

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use super::device::DeviceRegistration;
use super::guest::{GuestInvalidReason, GuestSessionRecord};
use super::session::{PrefillService, ScopedGrants, SessionKind, SessionRecord};
use super::utils::{extract_client_ip, extract_user_agent};

/// Client context captured alongside issued sessions and registrations.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_client_ip(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Structured JSON error shape; `code` is stable across releases so client
/// retry/UX logic can key off it.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A rejected request, mapped to status + `ErrorBody`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthRejection {
    /// Malformed input: bad device id, out-of-range duration.
    Validation(String),
    /// No mechanism matched; deliberately does not say which were tried.
    Unauthenticated,
    /// Known guest session that is revoked or expired; carries a stable code
    /// so the client can recover instead of retrying blindly.
    GuestSession(GuestInvalidReason),
    /// Valid identity, insufficient tier; the caller is known-legitimate so
    /// the reason is explicit.
    Forbidden(String),
}

impl AuthRejection {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::GuestSession(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        match self {
            Self::Validation(message) => ErrorBody {
                error: "invalid_request".to_string(),
                message: message.clone(),
                code: None,
            },
            Self::Unauthenticated => ErrorBody {
                error: "unauthorized".to_string(),
                message: "Authentication required".to_string(),
                code: None,
            },
            Self::GuestSession(reason) => ErrorBody {
                error: "unauthorized".to_string(),
                message: match reason {
                    GuestInvalidReason::Revoked => "Guest session has been revoked".to_string(),
                    GuestInvalidReason::Expired => "Guest session has expired".to_string(),
                },
                code: Some(reason.code().to_string()),
            },
            Self::Forbidden(message) => ErrorBody {
                error: "forbidden".to_string(),
                message: message.clone(),
                code: None,
            },
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub credential: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub id: Uuid,
    pub kind: SessionKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    pub scoped_grants: ScopedGrants,
}

impl From<&SessionRecord> for SessionResponse {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            created_at: record.created_at,
            expires_at: record.expires_at,
            last_seen_at: record.last_seen_at,
            scoped_grants: record.scoped_grants.clone(),
        }
    }
}

/// Admin listing entry for a cookie session; never exposes token hashes.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionView {
    pub id: Uuid,
    pub kind: SessionKind,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    pub is_revoked: bool,
    pub scoped_grants: ScopedGrants,
}

impl From<&SessionRecord> for SessionView {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            ip_address: record.ip_address.clone(),
            user_agent: record.user_agent.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            last_seen_at: record.last_seen_at,
            is_revoked: record.is_revoked,
            scoped_grants: record.scoped_grants.clone(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegenerateResponse {
    pub credential: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceRegisterRequest {
    pub device_id: String,
    pub credential: String,
    pub device_name: Option<String>,
}

/// Admin listing entry for a device; never exposes the encrypted credential.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceView {
    pub device_id: String,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<&DeviceRegistration> for DeviceView {
    fn from(registration: &DeviceRegistration) -> Self {
        Self {
            device_id: registration.device_id.clone(),
            device_name: registration.device_name.clone(),
            ip_address: registration.ip_address.clone(),
            user_agent: registration.user_agent.clone(),
            registered_at: registration.registered_at,
            expires_at: registration.expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GuestCreateRequest {
    pub session_id: String,
    pub device_name: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GuestSessionView {
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
    pub revoked_by: Option<String>,
    pub prefill_enabled: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub prefill_expires_at: Option<OffsetDateTime>,
}

impl From<&GuestSessionRecord> for GuestSessionView {
    fn from(record: &GuestSessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            device_name: record.device_name.clone(),
            ip_address: record.ip_address.clone(),
            os: record.os.clone(),
            browser: record.browser.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            last_seen_at: record.last_seen_at,
            is_revoked: record.is_revoked,
            revoked_by: record.revoked_by.clone(),
            prefill_enabled: record.prefill_enabled,
            prefill_expires_at: record.prefill_expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionPrefillRequest {
    pub service: PrefillService,
    pub duration_hours: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionPrefillRevokeRequest {
    pub service: PrefillService,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GuestPrefillRequest {
    /// Defaults to the configured guest prefill duration.
    pub duration_hours: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GuestDurationRequest {
    pub hours: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokedCountResponse {
    pub revoked: usize,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PublicConfigResponse {
    pub auth_enabled: bool,
    pub guest_locked: bool,
    pub guest_session_hours: i64,
    pub version: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PrefillAccessResponse {
    pub steam: bool,
    pub epic: bool,
}
