use url::Url;

/// Resolves any image reference to an absolute, fetchable URL against the
/// site origin. Never fails: a URL-construction failure degrades to naive
/// origin+path concatenation, because downstream consumers must always
/// receive some absolute string.
pub fn normalize_image_url(reference: &str, origin: &str) -> String {
    let reference = reference.trim();

    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }

    // Protocol-relative: borrow the origin's scheme.
    if let Some(rest) = reference.strip_prefix("//") {
        let scheme = Url::parse(origin)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());
        return format!("{}://{}", scheme, rest);
    }

    match Url::parse(origin).and_then(|base| base.join(reference)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => concat_fallback(origin, reference),
    }
}

fn concat_fallback(origin: &str, reference: &str) -> String {
    let origin = origin.trim_end_matches('/');
    if reference.starts_with('/') {
        format!("{}{}", origin, reference)
    } else {
        format!("{}/{}", origin, reference)
    }
}
