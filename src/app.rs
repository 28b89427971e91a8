//! Command implementations shared by the binary and integration tests.
//!
//! [`App`] ties the pieces together: it resolves subscriptions, runs the
//! aggregator, orders the result and hands it to the printer.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::clock::Clock;
use crate::config::{Config, Styling};
use crate::feed::{
    Aggregator, ConditionalFetcher, RunOptions, RunReport, SubscriptionStore, DEFAULT_LIST,
};
use crate::ranking::{sort_by_recency, sort_by_score, tokenize, ItemFilter};
use crate::storage::CacheStore;
use crate::ui::{self, Printer};
use crate::util::pluralize;

const CONFIG_FILE: &str = "config.toml";
const SUBSCRIPTIONS_FILE: &str = "feeds.opml";
const APP_DIR: &str = "tidings";

// ============================================================================
// Error Types
// ============================================================================

/// Problems with what the user asked for, caught before any I/O.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("invalid date {0:?} (expected RFC 3339 or YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// ============================================================================
// Paths
// ============================================================================

/// Where configuration and cache live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Paths {
    /// `$TIDINGS_CONFIG_DIR` or `~/.config/tidings`, and `$TIDINGS_CACHE_DIR`,
    /// `$XDG_CACHE_HOME/tidings` or `~/.cache/tidings`.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|name| std::env::var_os(name).filter(|v| !v.is_empty()))
    }

    fn resolve(var: impl Fn(&str) -> Option<std::ffi::OsString>) -> Result<Self> {
        let home = || {
            var("HOME")
                .map(PathBuf::from)
                .context("HOME environment variable not set")
        };

        let config_dir = match var("TIDINGS_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => home()?.join(".config").join(APP_DIR),
        };
        let cache_dir = match (var("TIDINGS_CACHE_DIR"), var("XDG_CACHE_HOME")) {
            (Some(dir), _) => PathBuf::from(dir),
            (None, Some(xdg)) => PathBuf::from(xdg).join(APP_DIR),
            (None, None) => home()?.join(".cache").join(APP_DIR),
        };
        Ok(Self {
            config_dir,
            cache_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn subscriptions_file(&self) -> PathBuf {
        self.config_dir.join(SUBSCRIPTIONS_FILE)
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>, InputError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| InputError::InvalidDate(raw.to_string()))
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Restrict to one subscription list
    pub list: Option<String>,
    /// Show at most this many items (0 or `None` shows all)
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
    pub proxy: Option<Url>,
}

/// Field-by-field config changes; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub user_agent: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub batch_size: Option<usize>,
    pub hide_future_items: Option<bool>,
    pub summary: Option<bool>,
    pub styling: Option<Styling>,
    pub map_colors: Option<String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.user_agent.is_none()
            && self.timeout_seconds.is_none()
            && self.batch_size.is_none()
            && self.hide_future_items.is_none()
            && self.summary.is_none()
            && self.styling.is_none()
            && self.map_colors.is_none()
    }
}

// ============================================================================
// App
// ============================================================================

pub struct App {
    paths: Paths,
    config: Config,
    subscriptions: Box<dyn SubscriptionStore + Send + Sync>,
    clock: Arc<dyn Clock>,
    printer: Printer,
}

impl App {
    pub fn new(
        paths: Paths,
        config: Config,
        subscriptions: Box<dyn SubscriptionStore + Send + Sync>,
        clock: Arc<dyn Clock>,
        printer: Printer,
    ) -> Self {
        Self {
            paths,
            config,
            subscriptions,
            clock,
            printer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch every subscribed feed and print the merged list, newest first.
    pub async fn feed(&mut self, options: &FeedOptions) -> Result<()> {
        let report = self.run(options, Vec::new(), false).await?;
        self.show(report, options, false)
    }

    /// Search cached bodies only; nothing is fetched.
    pub async fn search(&mut self, query: &str, options: &FeedOptions) -> Result<()> {
        let query = tokenize(query);
        if query.is_empty() {
            return Err(InputError::EmptyQuery.into());
        }
        let report = self.run(options, query, true).await?;
        self.show(report, options, true)
    }

    async fn run(
        &mut self,
        options: &FeedOptions,
        query: Vec<String>,
        cached_only: bool,
    ) -> Result<RunReport> {
        let urls = self
            .subscriptions
            .list_urls(options.list.as_deref())
            .context("Failed to load subscriptions")?;
        let store = self.open_cache()?;
        let fetcher =
            ConditionalFetcher::from_config(&self.config, options.proxy.as_ref(), Arc::clone(&self.clock))
                .context("Failed to build HTTP client")?;
        let aggregator = Aggregator::new(fetcher, store, Arc::clone(&self.clock), &self.config);

        let run_options = RunOptions {
            filter: ItemFilter {
                query,
                since: options.since,
                hide_after: None,
            },
            cached_only,
        };
        let report = aggregator.run(urls.into_keys(), &run_options).await?;

        for failure in &report.failures {
            self.printer.eprintln(failure)?;
        }
        if let Some(e) = &report.persist_error {
            self.printer.eprintln(format!("failed to save cache information: {}", e))?;
        }
        Ok(report)
    }

    fn show(&mut self, mut report: RunReport, options: &FeedOptions, by_score: bool) -> Result<()> {
        if by_score {
            sort_by_score(&mut report.items);
        } else {
            sort_by_recency(&mut report.items);
        }

        let now = self.clock.now();
        let shown = ui::print_items(
            &mut self.printer,
            &report.items,
            options.limit,
            now,
            &self.config.color_map,
        )?;
        if shown > 0 && self.config.summary {
            report.summary.items_shown = shown;
            ui::print_summary(&mut self.printer, &report.summary, now)?;
        }
        self.printer.flush()?;
        Ok(())
    }

    fn open_cache(&self) -> Result<CacheStore> {
        CacheStore::open(&self.paths.cache_dir).with_context(|| {
            format!(
                "Failed to open cache directory '{}'",
                self.paths.cache_dir.display()
            )
        })
    }

    /// List names, or the feeds of one list.
    pub fn lists(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            None => {
                let names = self
                    .subscriptions
                    .list_names()
                    .context("Failed to load subscriptions")?;
                if names.is_empty() {
                    self.printer.println(DEFAULT_LIST)?;
                }
                for name in names {
                    self.printer.println(name)?;
                }
            }
            Some(name) => {
                let urls = self
                    .subscriptions
                    .list_urls(Some(name))
                    .context("Failed to load subscriptions")?;
                for (url, meta) in &urls {
                    match &meta.title {
                        Some(title) => self.printer.println(format!("{}  {}", url, title))?,
                        None => self.printer.println(url)?,
                    }
                }
                self.printer
                    .println(format!("Total: {}", pluralize(urls.len(), "feed")))?;
            }
        }
        Ok(())
    }

    pub fn cache_info(&mut self) -> Result<()> {
        let cache = self
            .open_cache()?
            .load_all()
            .context("Failed to load cache information")?;
        ui::print_cache_info(&mut self.printer, &cache)?;
        Ok(())
    }

    pub fn cache_path(&mut self) -> Result<()> {
        self.printer.println(self.paths.cache_dir.display())?;
        Ok(())
    }

    /// Drop cache entries and bodies for URLs no list references any more.
    pub fn cache_prune(&mut self) -> Result<()> {
        let subscribed: BTreeSet<String> = self
            .subscriptions
            .list_urls(None)
            .context("Failed to load subscriptions")?
            .into_keys()
            .collect();
        let store = self.open_cache()?;
        let mut stale: Vec<String> = store
            .load_all()
            .context("Failed to load cache information")?
            .into_keys()
            .filter(|url| !subscribed.contains(url))
            .collect();
        stale.sort();

        store
            .remove_entries(&stale)
            .context("Failed to prune cache")?;
        tracing::info!(removed = stale.len(), "Pruned cache");
        self.printer
            .println(format!("Removed {} from the cache", pluralize(stale.len(), "feed")))?;
        Ok(())
    }

    pub fn config_show(&mut self) -> Result<()> {
        ui::print_config(&mut self.printer, &self.config)?;
        Ok(())
    }

    pub fn config_path(&mut self) -> Result<()> {
        self.printer.println(self.paths.config_dir.display())?;
        Ok(())
    }

    pub fn color_range(&mut self) -> Result<()> {
        ui::print_color_range(&mut self.printer)?;
        Ok(())
    }

    /// Apply `update`, save the file, and confirm each changed field.
    pub fn config_update(&mut self, update: ConfigUpdate) -> Result<()> {
        if update.timeout_seconds == Some(0) {
            return Err(InputError::Zero("timeout").into());
        }
        if update.batch_size == Some(0) {
            return Err(InputError::Zero("batch size").into());
        }

        let mut config = self.config.clone();
        let mut changed = Vec::new();
        if let Some(agent) = update.user_agent {
            config.user_agent = agent;
            changed.push("User-Agent");
        }
        if let Some(timeout) = update.timeout_seconds {
            config.timeout_seconds = timeout;
            changed.push("timeout");
        }
        if let Some(batch_size) = update.batch_size {
            config.batch_size = batch_size;
            changed.push("batch size");
        }
        if let Some(hide) = update.hide_future_items {
            config.hide_future_items = hide;
            changed.push("future items");
        }
        if let Some(summary) = update.summary {
            config.summary = summary;
            changed.push("summary");
        }
        if let Some(styling) = update.styling {
            config.styling = styling;
            changed.push("styling");
        }
        if let Some(spec) = update.map_colors {
            config.color_map.apply_spec(&spec)?;
            changed.push("color map");
        }

        let path = self.paths.config_file();
        config
            .save(&path)
            .with_context(|| format!("Failed to save config to '{}'", path.display()))?;
        self.config = config;
        for field in changed {
            self.printer.println(format!("{} was updated", field))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::feed::RunError;
    use crate::storage::{CacheEntry, CacheError};
    use crate::theme::ColorMapError;
    use crate::ui::SharedBuffer;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::ffi::OsString;

    struct Harness {
        _dir: tempfile::TempDir,
        app: App,
        out: SharedBuffer,
        err: SharedBuffer,
    }

    fn harness(lists: BTreeMap<String, Vec<String>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            config_dir: dir.path().join("config"),
            cache_dir: dir.path().join("cache"),
        };
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let app = App::new(
            paths,
            Config::default(),
            Box::new(lists),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap())),
            Printer::new(out.clone(), err.clone(), false),
        );
        Harness {
            _dir: dir,
            app,
            out,
            err,
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: BTreeMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_paths_defaults_from_home() {
        let paths = Paths::resolve(vars(&[("HOME", "/home/ada")])).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/home/ada/.config/tidings"));
        assert_eq!(paths.cache_dir, PathBuf::from("/home/ada/.cache/tidings"));
        assert_eq!(paths.config_file(), PathBuf::from("/home/ada/.config/tidings/config.toml"));
    }

    #[test]
    fn test_paths_overrides() {
        let paths = Paths::resolve(vars(&[
            ("TIDINGS_CONFIG_DIR", "/etc/tidings"),
            ("XDG_CACHE_HOME", "/var/cache"),
        ]))
        .unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/etc/tidings"));
        assert_eq!(paths.cache_dir, PathBuf::from("/var/cache/tidings"));

        let paths = Paths::resolve(vars(&[
            ("HOME", "/home/ada"),
            ("TIDINGS_CACHE_DIR", "/tmp/c"),
            ("XDG_CACHE_HOME", "/var/cache"),
        ]))
        .unwrap();
        assert_eq!(paths.cache_dir, PathBuf::from("/tmp/c"));
    }

    #[test]
    fn test_paths_without_home() {
        let err = Paths::resolve(vars(&[])).unwrap_err();
        assert_eq!(err.to_string(), "HOME environment variable not set");
    }

    #[test]
    fn test_parse_since() {
        assert_eq!(
            parse_since("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_since("2024-03-01T10:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
        );
        assert!(matches!(parse_since("yesterday"), Err(InputError::InvalidDate(_))));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let mut h = harness(BTreeMap::new());
        let err = h.app.search("  !! ", &FeedOptions::default()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<InputError>(), Some(InputError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_no_subscriptions() {
        let mut h = harness(BTreeMap::new());
        let err = h.app.feed(&FeedOptions::default()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RunError>(), Some(RunError::NoFeeds)));
        assert_eq!(err.to_string(), "no feeds to display");
    }

    #[test]
    fn test_lists_default_when_empty() {
        let mut h = harness(BTreeMap::new());
        h.app.lists(None).unwrap();
        assert_eq!(h.out.contents(), "default\n");
    }

    #[test]
    fn test_list_feeds() {
        let mut h = harness(BTreeMap::from([(
            "tech".to_string(),
            vec!["https://b.example/rss".to_string(), "https://a.example/rss".to_string()],
        )]));
        h.app.lists(Some("tech")).unwrap();
        assert_eq!(
            h.out.contents(),
            "https://a.example/rss\nhttps://b.example/rss\nTotal: 2 feeds\n"
        );
    }

    #[test]
    fn test_cache_prune_removes_unsubscribed() {
        let mut h = harness(BTreeMap::from([(
            "default".to_string(),
            vec!["https://kept.example/rss".to_string()],
        )]));
        let store = CacheStore::open(&h.app.paths.cache_dir).unwrap();
        let kept = CacheEntry::new("https://kept.example/rss");
        let gone = CacheEntry::new("https://gone.example/rss");
        store.save_body(&gone.url, b"<rss/>").unwrap();
        store
            .save_all(&crate::storage::CacheMap::from([
                (kept.url.clone(), kept.clone()),
                (gone.url.clone(), gone.clone()),
            ]))
            .unwrap();

        h.app.cache_prune().unwrap();

        let cache = store.load_all().unwrap();
        assert!(cache.contains_key(&kept.url));
        assert!(!cache.contains_key(&gone.url));
        assert!(!store.has_body(&gone.url));
        assert_eq!(h.out.contents(), "Removed 1 feed from the cache\n");
    }

    #[test]
    fn test_cache_errors_carry_context() {
        let mut h = harness(BTreeMap::new());
        std::fs::create_dir_all(&h.app.paths.cache_dir).unwrap();
        std::fs::write(h.app.paths.cache_dir.join("cache_info"), "lonely-field\n").unwrap();

        let err = h.app.cache_info().unwrap_err();
        assert_eq!(err.to_string(), "Failed to load cache information");
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::Malformed { .. })
        ));
    }

    #[test]
    fn test_config_update_saves_and_reports() {
        let mut h = harness(BTreeMap::new());
        h.app
            .config_update(ConfigUpdate {
                batch_size: Some(8),
                summary: Some(true),
                map_colors: Some("0:230".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            h.out.contents(),
            "batch size was updated\nsummary was updated\ncolor map was updated\n"
        );
        let saved = Config::load(&h.app.paths.config_file()).unwrap();
        assert_eq!(saved.batch_size, 8);
        assert!(saved.summary);
        assert_eq!(saved.color_map.map(0), 230);
        assert_eq!(h.app.config(), &saved);
    }

    #[test]
    fn test_config_update_rejects_zero() {
        let mut h = harness(BTreeMap::new());
        let err = h
            .app
            .config_update(ConfigUpdate {
                timeout_seconds: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<InputError>(), Some(InputError::Zero("timeout"))));
        assert!(!h.app.paths.config_file().exists());
        assert_eq!(h.err.contents(), "");
    }

    #[test]
    fn test_bad_color_spec_leaves_config_untouched() {
        let mut h = harness(BTreeMap::new());
        let err = h
            .app
            .config_update(ConfigUpdate {
                summary: Some(true),
                map_colors: Some("0:999".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.downcast_ref::<ColorMapError>().is_some());
        assert!(!h.app.config().summary);
    }
}
