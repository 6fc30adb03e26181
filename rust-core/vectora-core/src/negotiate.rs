//! Content-type and locale negotiation.

use crate::collaborators::Localizer;
use crate::error::{Error, Result};

/// Parse a `Content-Type` header into its lower-case media type
///
/// Parameters such as `charset` or `boundary` are dropped. A missing or
/// blank header yields `Ok(None)`.
///
/// # Errors
///
/// Returns `Error::MalformedRequest` if the header is not a valid media type.
pub fn media_type(header: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = header.map(str::trim).filter(|h| !h.is_empty()) else {
        return Ok(None);
    };

    let parsed: mime::Mime = raw
        .parse()
        .map_err(|e| Error::malformed(format!("invalid content type '{raw}': {e}")))?;

    Ok(Some(parsed.essence_str().to_ascii_lowercase()))
}

/// Whether a declared media type satisfies the one a route expects
///
/// The expected value may carry parameters; only the essence is compared.
#[must_use]
pub fn media_type_matches(expected: &str, declared: Option<&str>) -> bool {
    let expected = expected
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    declared == Some(expected.as_str())
}

/// Pick the request locale
///
/// Order: a supported `lang` cookie, then the first supported token of
/// `Accept-Language` (split on `,` and `;`), then `default`.
#[must_use]
pub fn resolve_locale(
    cookie: Option<&str>,
    accept_language: Option<&str>,
    localizer: &dyn Localizer,
    default: &str,
) -> String {
    if let Some(lang) = cookie.map(str::trim).filter(|l| localizer.is_supported(l)) {
        return lang.to_string();
    }

    accept_language
        .into_iter()
        .flat_map(|header| header.split([',', ';']))
        .map(str::trim)
        .find(|token| !token.is_empty() && localizer.is_supported(token))
        .unwrap_or(default)
        .to_string()
}
