//! Public configuration read used by the dashboard before authentication.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, response::Json};
use std::sync::Arc;

use crate::api::handlers::auth::AuthState;
use crate::api::handlers::auth::types::PublicConfigResponse;

#[utoipa::path(
    get,
    path = "/api/config",
    responses(
        (status = 200, description = "Public configuration", body = PublicConfigResponse)
    ),
    tag = "config"
)]
pub async fn public_config(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let response = PublicConfigResponse {
        auth_enabled: auth_state.config().auth_enabled(),
        guest_locked: auth_state.config().guest_locked(),
        guest_session_hours: auth_state.guests().session_duration_hours(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::AuthConfig;
    use anyhow::Result;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn public_config_reflects_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AuthConfig::new(dir.path().to_path_buf())
            .with_guest_locked(true)
            .with_guest_session_hours(12);
        let state = Arc::new(crate::api::handlers::auth::AuthState::open(config).await?);

        let response = public_config(Extension(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let decoded: PublicConfigResponse = serde_json::from_slice(&body)?;
        assert!(decoded.auth_enabled);
        assert!(decoded.guest_locked);
        assert_eq!(decoded.guest_session_hours, 12);
        Ok(())
    }
}
