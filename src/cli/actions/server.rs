use crate::api;
use crate::api::handlers::auth::AuthConfig;
use anyhow::Result;
use std::path::PathBuf;
use time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub data_dir: PathBuf,
    pub frontend_origin: Option<String>,
    pub auth_disabled: bool,
    pub guest_locked: bool,
    pub limited_credential: bool,
    pub session_ttl_seconds: i64,
    pub guest_session_hours: i64,
    pub guest_prefill_hours: i64,
    pub cleanup_interval_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the arbitration state cannot be opened or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {args:?}");

    let session_settings = crate::api::handlers::auth::session::SessionSettings::default()
        .with_admin_ttl(Duration::seconds(args.session_ttl_seconds))
        .with_guest_ttl(Duration::hours(args.guest_session_hours));

    let config = AuthConfig::new(args.data_dir)
        .with_auth_enabled(!args.auth_disabled)
        .with_guest_locked(args.guest_locked)
        .with_limited_credential(args.limited_credential)
        .with_guest_session_hours(args.guest_session_hours)
        .with_guest_prefill_hours(args.guest_prefill_hours)
        .with_cleanup_interval_seconds(args.cleanup_interval_seconds)
        .with_session_settings(session_settings);

    api::new(args.port, config, args.frontend_origin).await
}
