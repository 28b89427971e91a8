use thiserror::Error;
use url::Url;

/// Errors that can occur when accepting a feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates and normalises a feed URL.
///
/// Only absolute `http`/`https` URLs with a host are accepted. The returned
/// [`Url`] is the canonical form used as the cache key, so the same feed
/// written two ways (`HTTP://Example.com` vs `http://example.com/`) maps to
/// one cache entry.
///
/// # Examples
///
/// ```
/// use tidings::util::validate_url;
///
/// let url = validate_url("HTTPS://Example.com").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/");
///
/// assert!(validate_url("file:///etc/passwd").is_err());
/// assert!(validate_url("not a url").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://news.example.org").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/rss").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_relative_url_rejected() {
        assert!(matches!(
            validate_url("/feed.xml"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let url = validate_url("  https://example.com/rss \n").unwrap();
        assert_eq!(url.as_str(), "https://example.com/rss");
    }

    #[test]
    fn test_normalisation_lowercases_host() {
        let url = validate_url("https://EXAMPLE.com/Feed").unwrap();
        assert_eq!(url.as_str(), "https://example.com/Feed");
    }
}
