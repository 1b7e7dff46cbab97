//! Small helpers for token generation, hashing, and request context.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the store keeps a hash.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 64];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the store.
/// The hash is used for lookups when the cookie is presented.
pub(crate) fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Short fingerprint binding a record to the credential that minted it.
/// Recomputed at validation time, so regenerating the credential invalidates
/// the record without touching it.
pub(crate) fn credential_fingerprint(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"gardisto/credential-fingerprint");
    hasher.update(credential.as_bytes());
    URL_SAFE_NO_PAD.encode(&hasher.finalize()[..16])
}

/// Constant-time string comparison.
///
/// Both sides are reduced to SHA-256 digests first, so the byte-wise compare
/// always runs over equal-length inputs and a length mismatch costs the same
/// as a content mismatch.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let digest_a = Sha256::digest(a.as_bytes());
    let digest_b = Sha256::digest(b.as_bytes());
    digest_a.as_slice().ct_eq(digest_b.as_slice()).into()
}

/// Filesystem-safe encoding for caller-supplied identifiers used as file names.
pub(crate) fn encode_record_key(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Extract a client IP from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Extract the client user agent, truncated to keep records bounded.
pub(crate) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.chars().take(256).collect::<String>())
        .filter(|value| !value.is_empty())
}

/// Look up a single query parameter from a raw query string.
pub(crate) fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn generate_session_token_round_trip() {
        let decoded_len = generate_session_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(64));
    }

    #[test]
    fn hash_session_token_stable() {
        let first = hash_session_token("token");
        let second = hash_session_token("token");
        let different = hash_session_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq("lm_abc", "lm_abc"));
        assert!(!constant_time_eq("lm_abc", "lm_abd"));
        // Length mismatch still runs the full comparison
        assert!(!constant_time_eq("lm_abc", "lm_abcdef"));
        assert!(!constant_time_eq("", "lm_abc"));
    }

    #[test]
    fn credential_fingerprint_tracks_value() {
        let first = credential_fingerprint("lm_one");
        assert_eq!(first, credential_fingerprint("lm_one"));
        assert_ne!(first, credential_fingerprint("lm_two"));
    }

    #[test]
    fn encode_record_key_is_filesystem_safe() {
        let encoded = encode_record_key("device/../../etc/passwd");
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('.'));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn query_param_finds_value() {
        assert_eq!(
            query_param(Some("a=1&access_token=tok"), "access_token"),
            Some("tok".to_string())
        );
        assert_eq!(query_param(Some("a=1"), "access_token"), None);
        assert_eq!(query_param(None, "access_token"), None);
        assert_eq!(query_param(Some("access_token="), "access_token"), None);
    }
}
