use crate::api::handlers::{
    auth::{self, AuthConfig, AuthState},
    root,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

// Handlers are public: the dashboard's feature endpoints compose on the
// arbitration guards exported here.
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use crate::GIT_COMMIT_HASH;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, config: AuthConfig, frontend_origin: Option<String>) -> Result<()> {
    let auth_state = Arc::new(
        AuthState::open(config)
            .await
            .context("Failed to open arbitration state")?,
    );
    info!(
        "Arbitration state ready under {}",
        auth_state.config().data_dir().display()
    );

    spawn_cleanup_worker(auth_state.clone());

    let cors = build_cors_layer(frontend_origin.as_deref())?;

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/`. The spec itself stays in openapi.rs.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                // The arbitration layer sits inside the Extension layer so its
                // extractor can see the injected state.
                .layer(axum::middleware::from_fn(auth::arbitrate)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Periodic expired-record sweeps; the first pass runs at startup.
fn spawn_cleanup_worker(auth_state: Arc<AuthState>) {
    let interval = Duration::from_secs(auth_state.config().cleanup_interval_seconds().max(1));
    tokio::spawn(async move {
        loop {
            match auth_state.sessions().cleanup_expired().await {
                Ok(removed) if removed > 0 => info!(removed, "Swept stale sessions"),
                Ok(_) => {}
                Err(err) => error!("Session sweep failed: {err:#}"),
            }
            match auth_state.guests().cleanup_expired().await {
                Ok(removed) if removed > 0 => info!(removed, "Swept stale guest sessions"),
                Ok(_) => {}
                Err(err) => error!("Guest sweep failed: {err:#}"),
            }
            tokio::time::sleep(interval).await;
        }
    });
}

fn build_cors_layer(frontend_origin: Option<&str>) -> Result<CorsLayer> {
    let Some(origin) = frontend_origin else {
        // Same-origin deployment: no cross-origin surface at all.
        return Ok(CorsLayer::new());
    };
    Ok(CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-device-id"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin_value(origin)?))
        .allow_credentials(true))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin_value(frontend_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_origin)
        .with_context(|| format!("Invalid frontend origin: {frontend_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {frontend_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
