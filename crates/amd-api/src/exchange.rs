//! Landing locations for the redirect-style token exchange.

use crate::upstream::{ExchangeError, PartnerToken};

/// Where the visitor lands: `next` when it is a same-site absolute ASCII
/// path, otherwise the configured base path.
pub fn landing_path(next: Option<&str>, base_path: &str) -> String {
    match next.map(str::trim) {
        Some(next)
            if next.is_ascii()
                && next.starts_with('/')
                && !next.starts_with("//")
                && !next.contains('\\')
                && !next.chars().any(char::is_control) =>
        {
            next.to_string()
        }
        _ => base_path.to_string(),
    }
}

/// `landing` with `partner` plus either the issued token or the error code.
///
/// An empty partner lands without parameters.
pub fn location(
    landing: &str,
    partner: &str,
    outcome: &Result<PartnerToken, ExchangeError>,
) -> String {
    if partner.is_empty() {
        return landing.to_string();
    }

    let (path, fragment) = match landing.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (landing, None),
    };
    let separator = if path.contains('?') { '&' } else { '?' };
    let mut target = match outcome {
        Ok(issued) => format!(
            "{path}{separator}partner={}&token={}",
            urlencoding::encode(&issued.partner_id),
            urlencoding::encode(&issued.token)
        ),
        Err(error) => format!(
            "{path}{separator}partner={}&err={}",
            urlencoding::encode(partner),
            error.redirect_code()
        ),
    };
    if let Some(fragment) = fragment {
        target.push('#');
        target.push_str(fragment);
    }
    target
}
