//! Feed retrieval: subscriptions in, parsed and filtered items out.
//!
//! - [`subscriptions`](SubscriptionStore) - which URLs the user follows, by list
//! - [`ConditionalFetcher`] - one revalidating HTTP exchange per feed
//! - [`Aggregator`] - bounded-parallel runs over a whole URL set
//! - [`parse_feed`] - RSS/Atom/JSON Feed bodies via `feed-rs`
//!
//! # Example
//!
//! ```ignore
//! let fetcher = ConditionalFetcher::from_config(&config, None, clock.clone())?;
//! let aggregator = Aggregator::new(fetcher, store, clock, &config);
//! let urls = subscriptions.list_urls(None)?.into_keys();
//! let report = aggregator.run(urls, &RunOptions::default()).await?;
//! ```

mod aggregator;
mod fetcher;
mod opml;
mod parser;
mod subscriptions;

pub use aggregator::{
    Aggregator, FailureStage, FeedFailure, RunError, RunOptions, RunReport, RunSummary,
};
pub use fetcher::{
    build_client, parse_max_age, parse_retry_after, ConditionalFetcher, FeedSource, FetchError,
    FetchResult, DEFAULT_RETRY_AFTER, MIN_MAX_AGE,
};
pub use opml::OpmlSubscriptions;
pub use parser::{parse_cached, parse_feed, FeedEntry, FeedParseError, FeedSnapshot};
pub use subscriptions::{FeedMeta, SubscriptionError, SubscriptionStore, DEFAULT_LIST};
