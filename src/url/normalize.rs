use crate::url::UrlError;
use url::Url;

/// Normalizes a locator so equivalent spellings compare equal
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host and drop the default port (done by the parser)
/// 3. Normalize path:
///    - Remove dot segments (. and ..) and repeated slashes
///    - Remove trailing slash (except for root /)
/// 4. Remove fragment (everything after #)
/// 5. Remove empty query string (trailing ?)
///
/// Query parameters are kept in their original order; on the sites this
/// targets they select content.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::normalize_locator;
///
/// let url = normalize_locator("HTTPS://Example.COM:443/kinh/1/#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/kinh/1");
/// ```
pub fn normalize_locator(href: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(href.trim())?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

/// Derives a stable subtask id from a link
///
/// Links that cannot be parsed as HTTP(S) URLs (relative paths, opaque
/// keys) are used as given, minus surrounding whitespace and any fragment.
pub fn subtask_id_from_href(href: &str) -> String {
    match normalize_locator(href) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::trace!("Using raw href {} as subtask id: {}", href, e);
            let trimmed = href.trim();
            match trimmed.split_once('#') {
                Some((before, _)) => before.to_string(),
                None => trimmed.to_string(),
            }
        }
    }
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            // Skip empty segments (from multiple slashes) and current directory markers
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}
