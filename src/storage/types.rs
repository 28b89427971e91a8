use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the on-disk feed cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure while reading or writing cache files
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record in the cache info file could not be decoded.
    /// The whole load is aborted; partially trusted state is never returned.
    #[error("Invalid cache record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// No body has ever been stored for this feed
    #[error("No cached body for {0}")]
    NotFound(String),
}

// ============================================================================
// Cache Entry
// ============================================================================

/// Revalidation state for one feed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    /// Opaque validator from the last changed response, empty if none
    pub etag: String,
    /// When the body last changed (not every poll)
    pub last_fetch: DateTime<Utc>,
    /// No network request is made before this instant
    pub fetch_after: DateTime<Utc>,
}

/// Whole-file view of the cache info records, keyed by feed URL.
pub type CacheMap = HashMap<String, CacheEntry>;

impl CacheEntry {
    /// A never-fetched entry with both timestamps at the epoch.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            etag: String::new(),
            last_fetch: DateTime::UNIX_EPOCH,
            fetch_after: DateTime::UNIX_EPOCH,
        }
    }

    /// True until the first changed response has been recorded.
    pub fn never_fetched(&self) -> bool {
        self.last_fetch == DateTime::UNIX_EPOCH
    }

    /// Move the backoff window forward. Earlier instants are ignored so the
    /// window never shrinks.
    pub fn extend_fetch_after(&mut self, candidate: DateTime<Utc>) {
        if candidate > self.fetch_after {
            self.fetch_after = candidate;
        }
    }

    /// Record a changed response.
    pub fn record_change(&mut self, etag: String, now: DateTime<Utc>) {
        self.etag = etag;
        self.last_fetch = now;
    }

    /// Encode as one `cache_info` line: `<url> <lastFetch> <etag> <fetchAfter>\n`.
    pub(crate) fn to_line(&self) -> String {
        format!(
            "{} {} {} {}\n",
            self.url,
            self.last_fetch.timestamp(),
            urlencoding::encode(&self.etag),
            self.fetch_after.timestamp()
        )
    }

    /// Decode one `cache_info` line.
    ///
    /// The etag and `fetchAfter` fields are optional so files written by
    /// older versions still load. An unreadable `fetchAfter` falls back to
    /// the epoch; every other defect is an error.
    pub(crate) fn from_line(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() < 2 {
            return Err(format!("expected at least 2 fields, found {}", parts.len()));
        }

        let last_fetch = parts[1]
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| format!("invalid last fetch timestamp {:?}", parts[1]))?;

        let etag = match parts.get(2) {
            Some(raw) => urlencoding::decode(raw)
                .map_err(|e| format!("invalid etag encoding: {e}"))?
                .into_owned(),
            None => String::new(),
        };

        let fetch_after = parts
            .get(3)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::UNIX_EPOCH);

        Ok(Self {
            url: parts[0].to_string(),
            etag,
            last_fetch,
            fetch_after,
        })
    }
}
