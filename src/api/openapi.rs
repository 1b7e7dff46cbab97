use super::handlers::{auth, config, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
/// Routes added outside (like `/`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut gardisto_tag = Tag::new("gardisto");
    gardisto_tag.description = Some("Cache appliance dashboard access control".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, devices, and guest sessions".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Administrative listings and revocations".to_string());

    let mut openapi = cargo_openapi();
    openapi.tags = Some(vec![gardisto_tag, auth_tag, admin_tag]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let router = OpenApiRouter::with_openapi(openapi)
        .routes(routes!(health::health))
        .routes(routes!(config::public_config))
        .routes(routes!(auth::admin::set_guest_duration))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::login::logout))
        .routes(routes!(auth::login::current_session))
        .routes(routes!(auth::login::register_device))
        .routes(routes!(auth::login::enter_guest_mode))
        .routes(routes!(auth::admin::regenerate_credential))
        .routes(routes!(
            auth::admin::list_devices,
            auth::admin::revoke_all_devices
        ))
        .routes(routes!(auth::admin::revoke_device))
        .routes(routes!(auth::admin::list_guests))
        .routes(routes!(auth::admin::delete_guest))
        .routes(routes!(auth::admin::revoke_guest))
        .routes(routes!(
            auth::admin::enable_guest_prefill,
            auth::admin::disable_guest_prefill
        ))
        .routes(routes!(auth::admin::list_sessions))
        .routes(routes!(auth::admin::revoke_session))
        .routes(routes!(
            auth::admin::grant_session_prefill,
            auth::admin::revoke_session_prefill
        ))
        .routes(routes!(auth::admin::prefill_access));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Gardisto"));
            assert_eq!(contact.email.as_deref(), Some("team@gardisto.dev"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "gardisto"));
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        assert!(spec.paths.paths.contains_key("/api/auth/login"));
        assert!(spec.paths.paths.contains_key("/api/auth/guests"));
        assert!(
            spec.paths
                .paths
                .contains_key("/api/auth/sessions/{session_id}/prefill")
        );
    }
}
