//! URL normalization, domain extraction, and low-value filtering.

use url::Url;

/// Query keys stripped during normalization.
const TRACKING_KEYS: &[&str] = &["fbclid", "gclid", "msclkid", "ref", "source"];

/// Normalize a URL for citation identity.
///
/// Lowercase scheme and host, no leading `www.`, no fragment, no tracking
/// parameters, no trailing slash. Path case is preserved. Idempotent:
/// `normalize(normalize(u)) == normalize(u)`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut out = String::new();
    out.push_str(parsed.scheme());
    out.push_str("://");
    out.push_str(host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    let path = parsed.path().trim_end_matches('/');
    out.push_str(path);

    // Filter raw pairs so percent-encoding survives the round trip.
    if let Some(query) = parsed.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or("");
                !is_tracking_key(key)
            })
            .collect();
        if !kept.is_empty() {
            out.push('?');
            out.push_str(&kept.join("&"));
        }
    }

    Some(out)
}

fn is_tracking_key(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_KEYS.contains(&key)
}

/// Host with port and leading `www.` stripped, lowercase.
pub fn extract_domain(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// DOI-based identity key when the URL carries one.
///
/// Checks the doi.org host path, a `doi` query parameter, and `10.XXXX/...`
/// path segments, in that order.
pub fn doi_key(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();

    if host == "doi.org" || host.ends_with(".doi.org") {
        let doi = parsed.path().trim_start_matches('/');
        if !doi.is_empty() {
            return Some(doi.to_ascii_lowercase());
        }
    }

    if let Some((_, doi)) = parsed.query_pairs().find(|(key, _)| key == "doi") {
        if !doi.is_empty() {
            return Some(doi.to_ascii_lowercase());
        }
    }

    let path = parsed.path();
    if let Some(start) = path.find("10.") {
        let candidate = &path[start..];
        let mut parts = candidate.splitn(2, '/');
        let prefix = parts.next()?;
        let suffix = parts.next()?;
        if prefix.len() > 3
            && prefix[3..].chars().all(|c| c.is_ascii_digit())
            && !suffix.is_empty()
        {
            return Some(candidate.trim_end_matches('/').to_ascii_lowercase());
        }
    }

    None
}

const LOW_VALUE_PATH_MARKERS: &[&str] = &[
    "sitemap", "robots.txt", "/login", "/signin", "/signup", "/register", "/auth/", "/search",
    "/404", "/error", "/privacy", "/terms", "/legal", "/contact", "/support", "/cookie",
];

const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".webp", ".mp4", ".zip",
];

const LOW_VALUE_QUERY_MARKERS: &[&str] = &["q=", "search=", "query="];

/// Whether a URL is not worth citing: static assets, auth/search/error/legal
/// pages, and raw search-result URLs.
pub fn is_low_value_url(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();

    let (path_part, query_part) = match lower.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (lower.as_str(), None),
    };

    if LOW_VALUE_PATH_MARKERS.iter().any(|m| path_part.contains(m)) {
        return true;
    }
    if STATIC_EXTENSIONS.iter().any(|ext| path_part.ends_with(ext)) {
        return true;
    }
    if let Some(query) = query_part {
        if LOW_VALUE_QUERY_MARKERS
            .iter()
            .any(|m| query.starts_with(m) || query.contains(&format!("&{m}")))
        {
            return true;
        }
    }
    false
}
