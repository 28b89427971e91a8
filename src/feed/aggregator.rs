//! Runs conditional fetches over a whole subscription set.
//!
//! One task is spawned per unique URL. The dispatcher holds a semaphore
//! permit for each task it starts, so at most `batch_size` fetches are in
//! flight. Results converge on a single [`Shared`] value behind a mutex that
//! is only locked for the merge step, never across a fetch.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

use super::fetcher::{FeedSource, FetchResult};
use super::parser::{parse_cached, FeedSnapshot};
use crate::clock::Clock;
use crate::config::Config;
use crate::ranking::{expand_items, FeedItem, ItemFilter};
use crate::storage::{CacheEntry, CacheError, CacheMap, CacheStore};
use crate::theme::{ColorMap, FeedColors};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no feeds to display")]
    NoFeeds,

    /// The cache metadata file exists but cannot be trusted
    #[error("failed to load cache information: {0}")]
    CacheLoad(#[source] CacheError),
}

/// Counters for the end-of-run summary line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub start: DateTime<Utc>,
    pub feeds_count: usize,
    pub feeds_cached: usize,
    pub feeds_fetched: usize,
    /// Items in all parsed feeds, before filtering
    pub items_count: usize,
    /// Filled in by the caller once the display limit is applied
    pub items_shown: usize,
}

impl RunSummary {
    fn new(start: DateTime<Utc>, feeds_count: usize) -> Self {
        Self {
            start,
            feeds_count,
            feeds_cached: 0,
            feeds_fetched: 0,
            items_count: 0,
            items_shown: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureStage {
    Fetch,
    Parse,
}

/// A feed that contributed no items this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub url: String,
    pub stage: FailureStage,
    pub error: String,
}

impl std::fmt::Display for FeedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self.stage {
            FailureStage::Fetch => "fetch",
            FailureStage::Parse => "parse",
        };
        write!(f, "failed to {} feed: {}: {}", action, self.url, self.error)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub filter: ItemFilter,
    /// Parse whatever is on disk without touching the network
    pub cached_only: bool,
}

/// Everything a run produced. Items are in completion order.
#[derive(Debug)]
pub struct RunReport {
    pub items: Vec<FeedItem>,
    pub summary: RunSummary,
    pub failures: Vec<FeedFailure>,
    /// Set when the cache metadata could not be written back
    pub persist_error: Option<CacheError>,
}

struct Shared {
    items: Vec<FeedItem>,
    colors: FeedColors,
    summary: RunSummary,
    cache: CacheMap,
    failures: Vec<FeedFailure>,
}

/// Fetch orchestrator, generic over how feed bodies are refreshed.
pub struct Aggregator<S> {
    source: Arc<S>,
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    hide_future_items: bool,
    color_map: ColorMap,
}

impl<S: FeedSource> Aggregator<S> {
    pub fn new(source: S, store: CacheStore, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            source: Arc::new(source),
            store: Arc::new(store),
            clock,
            batch_size: config.batch_size.max(1),
            hide_future_items: config.hide_future_items,
            color_map: config.color_map,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Fetch (or, with `cached_only`, just parse) every URL once.
    ///
    /// Per-feed failures are collected in the report. The cache metadata is
    /// saved once after every task has finished.
    pub async fn run<I>(&self, urls: I, options: &RunOptions) -> Result<RunReport, RunError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut urls: Vec<String> = urls.into_iter().collect();
        urls.sort();
        urls.dedup();
        if urls.is_empty() {
            return Err(RunError::NoFeeds);
        }

        let start = self.clock.now();
        let mut cache = self.store.load_all().map_err(RunError::CacheLoad)?;
        for url in &urls {
            cache
                .entry(url.clone())
                .or_insert_with(|| CacheEntry::new(url.clone()));
        }

        let mut filter = options.filter.clone();
        if self.hide_future_items {
            filter.hide_after = Some(start);
        }
        let filter = Arc::new(filter);

        tracing::debug!(
            feeds = urls.len(),
            batch_size = self.batch_size,
            cached_only = options.cached_only,
            "Starting feed run"
        );

        let snapshot: Vec<CacheEntry> = urls
            .iter()
            .filter_map(|url| cache.get(url).cloned())
            .collect();
        let shared = Arc::new(Mutex::new(Shared {
            items: Vec::new(),
            colors: FeedColors::default(),
            summary: RunSummary::new(start, urls.len()),
            cache,
            failures: Vec::new(),
        }));

        let semaphore = Arc::new(Semaphore::new(self.batch_size));
        let mut handles = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            // Blocks the dispatcher until a slot frees up
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let unit = Unit {
                source: Arc::clone(&self.source),
                store: Arc::clone(&self.store),
                shared: Arc::clone(&shared),
                filter: Arc::clone(&filter),
                color_map: self.color_map,
                now: start,
            };
            let cached_only = options.cached_only;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if cached_only {
                    unit.parse_only(entry).await;
                } else {
                    unit.fetch_and_parse(entry).await;
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Feed task panicked");
            }
        }

        let (items, summary, cache, failures) = {
            let mut shared = shared.lock().await;
            (
                std::mem::take(&mut shared.items),
                shared.summary.clone(),
                std::mem::take(&mut shared.cache),
                std::mem::take(&mut shared.failures),
            )
        };

        let persist_error = if options.cached_only {
            None
        } else {
            match self.store.save_all(&cache) {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to save cache information");
                    Some(e)
                }
            }
        };

        tracing::info!(
            feeds = summary.feeds_count,
            fetched = summary.feeds_fetched,
            cached = summary.feeds_cached,
            failed = failures.len(),
            items = items.len(),
            "Feed run complete"
        );

        Ok(RunReport {
            items,
            summary,
            failures,
            persist_error,
        })
    }
}

/// Per-feed work, owned by one spawned task.
struct Unit<S> {
    source: Arc<S>,
    store: Arc<CacheStore>,
    shared: Arc<Mutex<Shared>>,
    filter: Arc<ItemFilter>,
    color_map: ColorMap,
    now: DateTime<Utc>,
}

impl<S: FeedSource> Unit<S> {
    async fn parse_only(&self, entry: CacheEntry) {
        let feed = match parse_cached(&self.store, &entry.url) {
            Ok(feed) => Arc::new(feed),
            Err(e) => {
                tracing::debug!(url = %entry.url, error = %e, "No usable cached body");
                return;
            }
        };

        let mut shared = self.shared.lock().await;
        self.merge(&mut shared, &feed, entry.last_fetch);
        shared.summary.feeds_cached += 1;
    }

    async fn fetch_and_parse(&self, entry: CacheEntry) {
        let result = match self.source.fetch(&entry, &self.store).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(url = %entry.url, error = %e, "Fetch failed");
                self.fail(&entry.url, FailureStage::Fetch, e.to_string()).await;
                return;
            }
        };

        // Disk read and XML parsing happen outside the lock
        let parsed = parse_cached(&self.store, &entry.url)
            .map(Arc::new)
            .map_err(|e| e.to_string());

        let mut shared = self.shared.lock().await;
        match parsed {
            Ok(feed) => {
                self.record(&mut shared, &entry.url, &result);
                self.merge(&mut shared, &feed, entry.last_fetch);
            }
            // Not counted, and the old validators stay so the next run re-requests it
            Err(error) => {
                tracing::warn!(url = %entry.url, error = %error, "Parse failed");
                shared.failures.push(FeedFailure {
                    url: entry.url.clone(),
                    stage: FailureStage::Parse,
                    error,
                });
            }
        }
    }

    fn record(&self, shared: &mut Shared, url: &str, result: &FetchResult) {
        let changed = match result {
            FetchResult::Changed { etag, .. } => Some(etag.clone()),
            _ => None,
        };
        match &changed {
            Some(_) => shared.summary.feeds_fetched += 1,
            None => shared.summary.feeds_cached += 1,
        }

        let Some(cached) = shared.cache.get_mut(url) else {
            return;
        };
        if let Some(etag) = changed {
            cached.record_change(etag, self.now);
        }
        if let Some(fetch_after) = result.fetch_after() {
            cached.extend_fetch_after(fetch_after);
        }
    }

    fn merge(&self, shared: &mut Shared, feed: &Arc<FeedSnapshot>, last_fetch: DateTime<Utc>) {
        shared.summary.items_count += feed.items.len();
        let color = shared.colors.color_for(&feed.title, &self.color_map);
        let items = expand_items(feed, color, last_fetch, &self.filter);
        shared.items.extend(items);
    }

    async fn fail(&self, url: &str, stage: FailureStage, error: String) {
        self.shared.lock().await.failures.push(FeedFailure {
            url: url.to_string(),
            stage,
            error,
        });
    }
}
