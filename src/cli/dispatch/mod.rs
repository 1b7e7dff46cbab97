//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let data_dir = matches
        .get_one::<String>("data-dir")
        .map(PathBuf::from)
        .context("missing required argument: --data-dir")?;
    let frontend_origin = matches.get_one::<String>("frontend-origin").cloned();

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        data_dir,
        frontend_origin,
        auth_disabled: auth_opts.auth_disabled,
        guest_locked: auth_opts.guest_locked,
        limited_credential: auth_opts.limited_credential,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        guest_session_hours: auth_opts.guest_session_hours,
        guest_prefill_hours: auth_opts.guest_prefill_hours,
        cleanup_interval_seconds: auth_opts.cleanup_interval_seconds,
    }))
}
