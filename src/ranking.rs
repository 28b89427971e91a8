//! Item filtering, query scoring and ordering.
//!
//! Everything here is synchronous and works on read-only [`FeedSnapshot`]s;
//! the aggregator calls [`expand_items`] once per parsed feed.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::feed::{FeedEntry, FeedSnapshot};

/// Lower-cased word tokens of `text`. Anything not alphanumeric separates words.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    tokenize_into(text, &mut tokens);
    tokens
}

fn tokenize_into(text: &str, tokens: &mut Vec<String>) {
    tokens.extend(
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase),
    );
}

/// Tokens an item is matched on: its title followed by its categories.
pub fn item_tokens(entry: &FeedEntry) -> Vec<String> {
    let mut tokens = tokenize(&entry.title);
    for category in &entry.categories {
        tokenize_into(category, &mut tokens);
    }
    tokens
}

/// Match cost of `query` against `tokens`. Lower is a closer match.
///
/// Every query token must be a prefix of some item token; its cost is the
/// number of characters the best such token has beyond the prefix. Returns
/// `None` when any query token matches nothing, which excludes the item.
pub fn score(query: &[String], tokens: &[String]) -> Option<u32> {
    let mut total: u32 = 0;
    for wanted in query {
        let wanted_len = wanted.chars().count();
        let best = tokens
            .iter()
            .filter(|token| token.starts_with(wanted.as_str()))
            .map(|token| (token.chars().count() - wanted_len) as u32)
            .min()?;
        total = total.saturating_add(best);
    }
    Some(total)
}

/// Per-run item filters.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Tokenized query; empty means no scoring
    pub query: Vec<String>,
    /// Drop items published before this instant (undated items too)
    pub since: Option<DateTime<Utc>>,
    /// Drop items published after this instant
    pub hide_after: Option<DateTime<Utc>>,
}

/// One displayable item: a position in a parsed feed plus per-run data.
#[derive(Debug, Clone)]
pub struct FeedItem {
    feed: Arc<FeedSnapshot>,
    index: usize,
    score: u32,
    is_new: bool,
    color: u8,
}

impl FeedItem {
    pub fn feed(&self) -> &FeedSnapshot {
        &self.feed
    }

    pub fn entry(&self) -> &FeedEntry {
        &self.feed.items[self.index]
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    /// Published after the feed's previous successful fetch.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Palette index already resolved through the color map.
    pub fn color(&self) -> u8 {
        self.color
    }
}

/// Expand a parsed feed into display items, applying `filter`.
///
/// `last_fetch` is the feed's cache timestamp from *before* this run.
pub fn expand_items(
    feed: &Arc<FeedSnapshot>,
    color: u8,
    last_fetch: DateTime<Utc>,
    filter: &ItemFilter,
) -> Vec<FeedItem> {
    let mut items = Vec::new();
    for (index, entry) in feed.items.iter().enumerate() {
        if let Some(since) = filter.since {
            if entry.published.map_or(true, |published| published < since) {
                continue;
            }
        }
        if let (Some(limit), Some(published)) = (filter.hide_after, entry.published) {
            if published > limit {
                continue;
            }
        }

        let score = if filter.query.is_empty() {
            0
        } else {
            match score(&filter.query, &item_tokens(entry)) {
                Some(score) => score,
                None => continue,
            }
        };

        items.push(FeedItem {
            feed: Arc::clone(feed),
            index,
            score,
            is_new: entry.published.is_some_and(|published| published > last_fetch),
            color,
        });
    }
    items
}

/// Newest first. Stable; undated items go last in input order.
pub fn sort_by_recency(items: &mut [FeedItem]) {
    items.sort_by(|a, b| b.entry().published.cmp(&a.entry().published));
}

/// Best match first, ties broken by title.
pub fn sort_by_score(items: &mut [FeedItem]) {
    items.sort_by(|a, b| {
        a.score
            .cmp(&b.score)
            .then_with(|| a.entry().title.cmp(&b.entry().title))
    });
}
