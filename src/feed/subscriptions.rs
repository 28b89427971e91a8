use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the implicit list holding feeds that belong to no named list
pub const DEFAULT_LIST: &str = "default";

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Failed to read subscriptions: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// What the subscription source knows about one feed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: Option<String>,
    /// Every list the URL appears in, in source order
    pub lists: Vec<String>,
}

/// Read-only access to the user's followed feeds, grouped into named lists.
pub trait SubscriptionStore {
    /// Names of all lists, sorted. Empty when nothing is subscribed.
    fn list_names(&self) -> Result<Vec<String>, SubscriptionError>;

    /// URLs of one list, or of every list when `list` is `None`.
    ///
    /// Keyed by URL, so a feed followed from several lists appears once.
    /// An unknown list yields an empty map.
    fn list_urls(&self, list: Option<&str>) -> Result<BTreeMap<String, FeedMeta>, SubscriptionError>;
}

/// In-memory lists: list name to URLs.
impl SubscriptionStore for BTreeMap<String, Vec<String>> {
    fn list_names(&self) -> Result<Vec<String>, SubscriptionError> {
        Ok(self.keys().cloned().collect())
    }

    fn list_urls(&self, list: Option<&str>) -> Result<BTreeMap<String, FeedMeta>, SubscriptionError> {
        let mut urls: BTreeMap<String, FeedMeta> = BTreeMap::new();
        for (name, members) in self {
            if list.is_some_and(|wanted| wanted != name) {
                continue;
            }
            for url in members {
                let meta = urls.entry(url.trim().to_string()).or_default();
                if !meta.lists.contains(name) {
                    meta.lists.push(name.clone());
                }
            }
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lists() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            (
                "tech".to_string(),
                vec!["https://a.example/rss".to_string(), "https://b.example/rss".to_string()],
            ),
            ("news".to_string(), vec!["https://a.example/rss".to_string()]),
        ])
    }

    #[test]
    fn test_list_names_sorted() {
        assert_eq!(lists().list_names().unwrap(), vec!["news", "tech"]);
    }

    #[test]
    fn test_union_deduplicates_urls() {
        let urls = lists().list_urls(None).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls["https://a.example/rss"].lists, vec!["news", "tech"]);
        assert_eq!(urls["https://b.example/rss"].lists, vec!["tech"]);
    }

    #[test]
    fn test_single_list() {
        let urls = lists().list_urls(Some("news")).unwrap();
        assert_eq!(urls.keys().collect::<Vec<_>>(), vec!["https://a.example/rss"]);
    }

    #[test]
    fn test_unknown_list_is_empty() {
        assert!(lists().list_urls(Some("missing")).unwrap().is_empty());
    }
}
