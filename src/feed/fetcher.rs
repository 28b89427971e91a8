use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use reqwest::header::{
    HeaderMap, ACCEPT, ACCEPT_ENCODING, CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    RETRY_AFTER, USER_AGENT,
};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::clock::Clock;
use crate::config::Config;
use crate::storage::{CacheEntry, CacheError, CacheStore};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// Floor for `Cache-Control: max-age`, and the value used when absent
pub const MIN_MAX_AGE: TimeDelta = TimeDelta::seconds(60);
/// Backoff after 429/503 without a usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: TimeDelta = TimeDelta::minutes(5);

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/atom+xml, application/xml, application/json, text/xml";
const ACCEPT_ENCODINGS: &str = "br, gzip";
/// IMF-fixdate, the only format HTTP/1.1 senders may generate
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Errors that can occur during a single conditional fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, timeout, decoding)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response status other than 200, 304, 429 or 503
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The body could not be written to the cache
    #[error("Failed to store body: {0}")]
    Cache(#[from] CacheError),
}

/// Outcome of one [`FeedSource::fetch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// Still inside the backoff window; no request was made
    Skipped,
    /// 304: the cached body is current
    NotModified { fetch_after: DateTime<Utc> },
    /// 429/503: the server asked us to come back later
    Throttled {
        status: u16,
        fetch_after: DateTime<Utc>,
    },
    /// 200: a new body was stored
    Changed {
        etag: String,
        fetch_after: DateTime<Utc>,
    },
}

impl FetchResult {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    /// Next instant a request is allowed, if this attempt computed one.
    pub fn fetch_after(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Skipped => None,
            Self::NotModified { fetch_after }
            | Self::Throttled { fetch_after, .. }
            | Self::Changed { fetch_after, .. } => Some(*fetch_after),
        }
    }
}

/// Something that can bring a feed's cached body up to date.
///
/// [`ConditionalFetcher`] is the HTTP implementation; the aggregator is
/// generic over this so batches can be driven without a network.
pub trait FeedSource: Send + Sync + 'static {
    fn fetch(
        &self,
        entry: &CacheEntry,
        store: &CacheStore,
    ) -> impl Future<Output = Result<FetchResult, FetchError>> + Send;
}

// ============================================================================
// HTTP client
// ============================================================================

/// Build the client shared by every fetch in a batch.
///
/// Content decoding is left to reqwest's `br`/`gzip` decoders, which act on
/// the response's `Content-Encoding`; any other encoding is passed through.
pub fn build_client(config: &Config, proxy: Option<&Url>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(create_redirect_policy())
        .timeout(config.timeout())
        .connect_timeout(config.timeout().min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = proxy {
        // Proxy::all understands http(s):// and socks5:// URLs
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }

    builder.build()
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        // `previous` starts with the original request URL
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len(),
            "Following redirect"
        );
        attempt.follow()
    })
}

// ============================================================================
// Conditional fetcher
// ============================================================================

/// Performs at most one HTTP exchange per feed, honouring the cache entry's
/// validators and backoff window.
pub struct ConditionalFetcher {
    client: reqwest::Client,
    user_agent: Option<String>,
    clock: Arc<dyn Clock>,
}

impl ConditionalFetcher {
    pub fn new(client: reqwest::Client, user_agent: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            user_agent,
            clock,
        }
    }

    /// Convenience constructor reading timeout and user agent from `config`.
    pub fn from_config(
        config: &Config,
        proxy: Option<&Url>,
        clock: Arc<dyn Clock>,
    ) -> reqwest::Result<Self> {
        let client = build_client(config, proxy)?;
        Ok(Self::new(
            client,
            config.user_agent().map(str::to_string),
            clock,
        ))
    }

    /// Fetch `entry.url` unless its backoff window is still open.
    ///
    /// On `200` the decoded body is written to `store` before returning.
    /// Transport errors leave the backoff window untouched.
    pub async fn fetch(
        &self,
        entry: &CacheEntry,
        store: &CacheStore,
    ) -> Result<FetchResult, FetchError> {
        let now = self.clock.now();
        if entry.fetch_after > now {
            tracing::debug!(url = %entry.url, fetch_after = %entry.fetch_after, "Backoff window open, skipping");
            return Ok(FetchResult::Skipped);
        }

        let mut request = self
            .client
            .get(&entry.url)
            .header(ACCEPT, ACCEPT_FEEDS)
            .header(ACCEPT_ENCODING, ACCEPT_ENCODINGS);
        if let Some(agent) = &self.user_agent {
            request = request.header(USER_AGENT, agent);
        }
        if !entry.etag.is_empty() {
            request = request.header(IF_NONE_MATCH, &entry.etag);
        }
        if !entry.never_fetched() {
            request = request.header(
                IF_MODIFIED_SINCE,
                entry.last_fetch.format(HTTP_DATE_FORMAT).to_string(),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers();

        match status {
            StatusCode::NOT_MODIFIED => {
                let fetch_after = after(now, max_age(headers));
                tracing::debug!(url = %entry.url, "Not modified");
                Ok(FetchResult::NotModified { fetch_after })
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                let fetch_after = retry_after(headers, now);
                tracing::warn!(
                    url = %entry.url,
                    status = status.as_u16(),
                    fetch_after = %fetch_after,
                    "Server asked to back off"
                );
                Ok(FetchResult::Throttled {
                    status: status.as_u16(),
                    fetch_after,
                })
            }
            StatusCode::OK => {
                let etag = header_str(headers, ETAG).unwrap_or_default().to_string();
                let fetch_after = after(now, max_age(headers));
                let body = read_limited_bytes(response, MAX_FEED_SIZE).await?;
                store.save_body(&entry.url, &body)?;
                tracing::debug!(url = %entry.url, bytes = body.len(), "Stored new body");
                Ok(FetchResult::Changed { etag, fetch_after })
            }
            other => Err(FetchError::HttpStatus(other.as_u16())),
        }
    }
}

impl FeedSource for ConditionalFetcher {
    async fn fetch(
        &self,
        entry: &CacheEntry,
        store: &CacheStore,
    ) -> Result<FetchResult, FetchError> {
        ConditionalFetcher::fetch(self, entry, store).await
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header (absent once a decoder is applied)
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

// ============================================================================
// Header interpretation
// ============================================================================

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn after(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn max_age(headers: &HeaderMap) -> TimeDelta {
    parse_max_age(header_str(headers, CACHE_CONTROL).unwrap_or_default())
}

fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> DateTime<Utc> {
    parse_retry_after(header_str(headers, RETRY_AFTER).unwrap_or_default(), now)
}

/// Freshness lifetime from a `Cache-Control` value.
///
/// Only the first `max-age=N` directive is considered. The result is never
/// below [`MIN_MAX_AGE`], which is also the answer for absent or unreadable
/// values.
pub fn parse_max_age(cache_control: &str) -> TimeDelta {
    for directive in cache_control.split(',') {
        let directive = directive.trim();
        if let Some(value) = directive.strip_prefix("max-age=") {
            return value
                .trim_matches('"')
                .parse::<i64>()
                .ok()
                .and_then(TimeDelta::try_seconds)
                .map_or(MIN_MAX_AGE, |age| age.max(MIN_MAX_AGE));
        }
    }
    MIN_MAX_AGE
}

/// Next allowed fetch from a `Retry-After` value: delay seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let value = value.trim();
    if value.is_empty() {
        return after(now, DEFAULT_RETRY_AFTER);
    }
    if let Some(delay) = value.parse::<i64>().ok().and_then(TimeDelta::try_seconds) {
        return after(now, delay);
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return date.with_timezone(&Utc);
    }
    after(now, DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_max_age_parsing() {
        assert_eq!(parse_max_age(""), TimeDelta::seconds(60));
        assert_eq!(parse_max_age("max-age=120"), TimeDelta::seconds(120));
        assert_eq!(parse_max_age("public, max-age=3600, must-revalidate"), TimeDelta::seconds(3600));
        assert_eq!(parse_max_age("no-cache"), TimeDelta::seconds(60));
    }

    #[test]
    fn test_max_age_floor() {
        assert_eq!(parse_max_age("max-age=10"), TimeDelta::seconds(60));
        assert_eq!(parse_max_age("max-age=0"), TimeDelta::seconds(60));
        assert_eq!(parse_max_age("max-age=-5"), TimeDelta::seconds(60));
    }

    #[test]
    fn test_max_age_unparsable_uses_default() {
        assert_eq!(parse_max_age("max-age=soon, max-age=600"), TimeDelta::seconds(60));
        assert_eq!(parse_max_age("max-age=99999999999999999999"), TimeDelta::seconds(60));
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(parse_retry_after("30", now()), now() + TimeDelta::seconds(30));
    }

    #[test]
    fn test_retry_after_missing_or_garbage() {
        assert_eq!(parse_retry_after("", now()), now() + TimeDelta::minutes(5));
        assert_eq!(parse_retry_after("later", now()), now() + TimeDelta::minutes(5));
    }

    #[test]
    fn test_retry_after_http_date() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 1, 13, 30, 0).unwrap();
        assert_eq!(
            parse_retry_after("Sat, 01 Jun 2024 13:30:00 GMT", now()),
            expected
        );
    }

    #[test]
    fn test_http_date_format() {
        let date = Utc.with_ymd_and_hms(2024, 1, 7, 8, 5, 3).unwrap();
        assert_eq!(
            date.format(HTTP_DATE_FORMAT).to_string(),
            "Sun, 07 Jan 2024 08:05:03 GMT"
        );
    }

    #[test]
    fn test_fetch_result_accessors() {
        assert!(!FetchResult::Skipped.changed());
        assert_eq!(FetchResult::Skipped.fetch_after(), None);
        let changed = FetchResult::Changed {
            etag: "x".into(),
            fetch_after: now(),
        };
        assert!(changed.changed());
        assert_eq!(changed.fetch_after(), Some(now()));
    }
}
