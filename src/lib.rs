//! # Gardisto (Dashboard Access Arbitration)
//!
//! `gardisto` is the access-control authority for the cache appliance
//! dashboard. Every inbound request is arbitrated across four independent
//! mechanisms, in strict precedence order:
//!
//! 1. the session cookie (rotating, hashed bearer token),
//! 2. the long-lived admin credential (`X-Api-Key` or `Authorization: Bearer`),
//! 3. a registered device (`X-Device-Id`, credential encrypted at rest),
//! 4. a time-boxed guest session keyed by a client fingerprint.
//!
//! ## Privilege tiers
//!
//! All callers resolve to one of a small, fixed set of tiers: primary admin,
//! limited admin (optional secondary credential), or guest. There is no user
//! directory and no password store; the admin credential is the root of trust
//! and regenerating it invalidates every session and device registration
//! derived from it.
//!
//! ## Storage
//!
//! State is file-backed under a single data directory: scalar credential
//! files, one JSON document per device registration, cookie session, and
//! guest session. Durable writes are atomic (temp file + rename) and each
//! component guards its cache and writes with its own mutex.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
