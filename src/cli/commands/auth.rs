//! Arbitration-core arguments: kill switch, guest access, durations.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};

pub const ARG_AUTH_DISABLED: &str = "auth-disabled";
pub const ARG_GUEST_LOCKED: &str = "guest-locked";
pub const ARG_LIMITED_CREDENTIAL: &str = "limited-credential";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_GUEST_SESSION_HOURS: &str = "guest-session-hours";
pub const ARG_GUEST_PREFILL_HOURS: &str = "guest-prefill-hours";
pub const ARG_CLEANUP_INTERVAL_SECONDS: &str = "cleanup-interval-seconds";

/// Guest durations are bounded; out-of-range values are a configuration
/// error, never silently clamped.
#[must_use]
pub fn validator_guest_hours() -> ValueParser {
    ValueParser::from(move |hours: &str| -> std::result::Result<i64, String> {
        let parsed = hours
            .parse::<i64>()
            .map_err(|_| "invalid hours value".to_string())?;
        if (1..=168).contains(&parsed) {
            Ok(parsed)
        } else {
            Err("hours must be between 1 and 168".to_string())
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_AUTH_DISABLED)
                .long(ARG_AUTH_DISABLED)
                .help("Disable all access control (kill switch)")
                .env("GARDISTO_AUTH_DISABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_GUEST_LOCKED)
                .long(ARG_GUEST_LOCKED)
                .help("Refuse new guest sessions")
                .env("GARDISTO_GUEST_LOCKED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_LIMITED_CREDENTIAL)
                .long(ARG_LIMITED_CREDENTIAL)
                .help("Maintain a secondary limited credential alongside the primary")
                .env("GARDISTO_LIMITED_CREDENTIAL")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Admin session cookie TTL in seconds")
                .env("GARDISTO_SESSION_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_GUEST_SESSION_HOURS)
                .long(ARG_GUEST_SESSION_HOURS)
                .help("Guest session duration in hours (1-168)")
                .env("GARDISTO_GUEST_SESSION_HOURS")
                .default_value("6")
                .value_parser(validator_guest_hours()),
        )
        .arg(
            Arg::new(ARG_GUEST_PREFILL_HOURS)
                .long(ARG_GUEST_PREFILL_HOURS)
                .help("Default duration for guest prefill grants in hours (1-168)")
                .env("GARDISTO_GUEST_PREFILL_HOURS")
                .default_value("6")
                .value_parser(validator_guest_hours()),
        )
        .arg(
            Arg::new(ARG_CLEANUP_INTERVAL_SECONDS)
                .long(ARG_CLEANUP_INTERVAL_SECONDS)
                .help("Interval between expired session sweeps in seconds")
                .env("GARDISTO_CLEANUP_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub auth_disabled: bool,
    pub guest_locked: bool,
    pub limited_credential: bool,
    pub session_ttl_seconds: i64,
    pub guest_session_hours: i64,
    pub guest_prefill_hours: i64,
    pub cleanup_interval_seconds: u64,
}

impl Options {
    /// Extract auth options from validated matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is unexpectedly absent.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            auth_disabled: matches.get_flag(ARG_AUTH_DISABLED),
            guest_locked: matches.get_flag(ARG_GUEST_LOCKED),
            limited_credential: matches.get_flag(ARG_LIMITED_CREDENTIAL),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .context("missing session-ttl-seconds")?,
            guest_session_hours: matches
                .get_one::<i64>(ARG_GUEST_SESSION_HOURS)
                .copied()
                .context("missing guest-session-hours")?,
            guest_prefill_hours: matches
                .get_one::<i64>(ARG_GUEST_PREFILL_HOURS)
                .copied()
                .context("missing guest-prefill-hours")?,
            cleanup_interval_seconds: matches
                .get_one::<u64>(ARG_CLEANUP_INTERVAL_SECONDS)
                .copied()
                .context("missing cleanup-interval-seconds")?,
        })
    }
}
