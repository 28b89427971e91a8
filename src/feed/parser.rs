use chrono::{DateTime, Utc};
use feed_rs::parser;
use std::io::Read;
use thiserror::Error;

use crate::storage::{CacheError, CacheStore};

#[derive(Debug, Error)]
pub enum FeedParseError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Body is not valid RSS, Atom or JSON Feed
    #[error("Invalid feed: {0}")]
    Feed(#[from] parser::ParseFeedError),
}

/// Read-only view of one parsed feed body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub title: String,
    pub description: String,
    pub items: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// `None` when the feed gives no parseable date
    pub published: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

/// Parse RSS, Atom or JSON Feed bytes.
pub fn parse_feed<R: Read>(source: R) -> Result<FeedSnapshot, FeedParseError> {
    let feed = parser::parse(source)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| FeedEntry {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .into_iter()
                .next()
                .map(|l| l.href)
                .unwrap_or_default(),
            published: entry.published.or(entry.updated),
            categories: entry
                .categories
                .into_iter()
                .map(|c| c.label.unwrap_or(c.term))
                .collect(),
        })
        .collect();

    Ok(FeedSnapshot {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        description: feed.description.map(|t| t.content).unwrap_or_default(),
        items,
    })
}

/// Parse whatever body is currently cached for `url`.
///
/// Gives the same result whether the body was just downloaded or is
/// left over from an earlier run.
pub fn parse_cached(store: &CacheStore, url: &str) -> Result<FeedSnapshot, FeedParseError> {
    let body = store.open_body(url)?;
    parse_feed(body)
}
