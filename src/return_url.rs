#![forbid(unsafe_code)]

//! Validation of the post-login redirect target.
//!
//! The candidate arrives through the `returnUrl` query parameter and is only
//! trusted when it is a same-origin path under one of the known sections of
//! the gallery. Anything else silently becomes the fallback.

use crate::query::QueryParams;

pub const RETURN_URL_PARAM: &str = "returnUrl";
pub const DEFAULT_RETURN_URL: &str = "/videos";
pub const MAX_RETURN_URL_LEN: usize = 2000;

/// Section roots a redirect may land in. Matching is case-sensitive and on a
/// path-segment boundary.
pub const ALLOWED_RETURN_PREFIXES: &[&str] = &[
    "/videos",
    "/channels",
    "/tags",
    "/settings",
    "/profile",
    "/quota",
];

pub fn sanitize_return_url(candidate: Option<&str>, fallback: &str) -> String {
    let Some(trimmed) = candidate.map(str::trim).filter(|value| !value.is_empty()) else {
        return fallback.to_string();
    };
    if trimmed.chars().count() > MAX_RETURN_URL_LEN {
        return fallback.to_string();
    }
    if ["//", "http://", "https://"]
        .iter()
        .any(|scheme| trimmed.starts_with(scheme))
    {
        return fallback.to_string();
    }
    let before_slash = trimmed.split('/').next().unwrap_or_default();
    if before_slash.contains(':') {
        return fallback.to_string();
    }

    let normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    if normalized.contains("../") || normalized.contains("/..") {
        return fallback.to_string();
    }

    let path = normalized
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if !is_allowed_path(path) {
        tracing::debug!(path, "return url outside the allow-list");
        return fallback.to_string();
    }
    normalized
}

/// Reads `returnUrl` from the login page query and sanitizes it against the
/// default landing page.
pub fn return_url_from_query(params: &QueryParams) -> String {
    sanitize_return_url(params.get(RETURN_URL_PARAM), DEFAULT_RETURN_URL)
}

fn is_allowed_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    ALLOWED_RETURN_PREFIXES.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}
