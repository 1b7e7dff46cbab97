use crate::api::GIT_COMMIT_HASH;
use crate::api::handlers::auth::AuthState;
use axum::{
    extract::Extension,
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    storage: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Record storage is healthy", body = [Health]),
        (status = 503, description = "Record storage is unhealthy", body = [Health])
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(method: Method, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Probe the data directory the same way the stores write to it.
    let probe = auth_state.config().data_dir().join(".healthcheck");
    let storage_ok = match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            true
        }
        Err(err) => {
            error!("Data directory probe failed: {err}");
            false
        }
    };

    let status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    // HEAD/OPTIONS callers only need the status code.
    if method == Method::OPTIONS || method == Method::HEAD {
        return status.into_response();
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: if storage_ok { "ok" } else { "unavailable" }.to_string(),
    };

    (status, Json(health)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::AuthConfig;
    use anyhow::Result;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn health_reports_ok_for_writable_data_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let state =
            Arc::new(AuthState::open(AuthConfig::new(dir.path().to_path_buf())).await?);

        let response = health(Method::GET, Extension(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: Health = serde_json::from_slice(&body)?;
        assert_eq!(health.name, env!("CARGO_PKG_NAME"));
        assert_eq!(health.storage, "ok");
        Ok(())
    }

    #[tokio::test]
    async fn health_options_returns_status_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let state =
            Arc::new(AuthState::open(AuthConfig::new(dir.path().to_path_buf())).await?);

        let response = health(Method::OPTIONS, Extension(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }
}
