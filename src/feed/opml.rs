use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::subscriptions::{FeedMeta, SubscriptionError, SubscriptionStore, DEFAULT_LIST};
use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Subscriptions read from an OPML 2.0 file.
///
/// Each top-level `<outline>` without an `xmlUrl` names a list and every
/// feed nested below it (at any depth) belongs to that list. Feeds outside
/// such a folder go to the `default` list. A missing file means no
/// subscriptions.
#[derive(Debug, Clone)]
pub struct OpmlSubscriptions {
    path: PathBuf,
}

/// One feed outline, tagged with the list it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    list: String,
    url: String,
    title: Option<String>,
}

#[derive(Debug, Default)]
struct ParsedOpml {
    /// Named lists in document order, including empty ones
    lists: Vec<String>,
    feeds: Vec<Subscription>,
}

impl OpmlSubscriptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<ParsedOpml, SubscriptionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_opml_content(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No subscription file found");
                Ok(ParsedOpml::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl SubscriptionStore for OpmlSubscriptions {
    fn list_names(&self) -> Result<Vec<String>, SubscriptionError> {
        let parsed = self.read()?;
        let mut names = parsed.lists;
        if parsed.feeds.iter().any(|f| f.list == DEFAULT_LIST) {
            names.push(DEFAULT_LIST.to_string());
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn list_urls(&self, list: Option<&str>) -> Result<BTreeMap<String, FeedMeta>, SubscriptionError> {
        let mut urls: BTreeMap<String, FeedMeta> = BTreeMap::new();
        for feed in self.read()?.feeds {
            if list.is_some_and(|wanted| wanted != feed.list) {
                continue;
            }
            let meta = urls.entry(feed.url).or_default();
            if meta.title.is_none() {
                meta.title = feed.title;
            }
            if !meta.lists.contains(&feed.list) {
                meta.lists.push(feed.list);
            }
        }
        Ok(urls)
    }
}

fn parse_opml_content(content: &str) -> Result<ParsedOpml, SubscriptionError> {
    // SEC-002: quick-xml (0.37) never parses <!ENTITY> declarations, and
    // `decode_and_unescape_value()` only resolves the five XML builtins.
    // Custom entities like &xxe; surface as an error instead of expanding.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedOpml::default();
    // SEC-003: Track nesting depth to prevent stack overflow from malicious OPMLs
    let mut depth: usize = 0;
    let mut current_list: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(SubscriptionError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }

                let outline = parse_outline(&e, &reader)?;
                match outline.xml_url {
                    None if depth == 1 => {
                        let name = outline.title.unwrap_or_else(|| DEFAULT_LIST.to_string());
                        if !parsed.lists.contains(&name) {
                            parsed.lists.push(name.clone());
                        }
                        current_list = Some(name);
                    }
                    None => {}
                    Some(url) => push_feed(&mut parsed, current_list.as_deref(), url, outline.title),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = parse_outline(&e, &reader)?;
                match outline.xml_url {
                    Some(url) => push_feed(&mut parsed, current_list.as_deref(), url, outline.title),
                    None if depth == 0 => {
                        if let Some(name) = outline.title {
                            if !parsed.lists.contains(&name) {
                                parsed.lists.push(name);
                            }
                        }
                    }
                    None => {}
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    current_list = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SubscriptionError::Xml(e.to_string())),
            _ => {}
        }
    }

    Ok(parsed)
}

fn push_feed(parsed: &mut ParsedOpml, list: Option<&str>, url: String, title: Option<String>) {
    match validate_url(&url) {
        Ok(_) => parsed.feeds.push(Subscription {
            list: list.unwrap_or(DEFAULT_LIST).to_string(),
            url: url.trim().to_string(),
            title,
        }),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        }
    }
}

#[derive(Debug, Default)]
struct Outline {
    xml_url: Option<String>,
    title: Option<String>,
}

/// `title` wins over `text`; empty values count as absent.
fn parse_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, SubscriptionError> {
    let mut outline = Outline::default();
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| SubscriptionError::Xml(e.to_string()))?;
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match attr.key.as_ref() {
            b"xmlUrl" => outline.xml_url = Some(value.to_string()),
            b"title" => outline.title = Some(value.to_string()),
            b"text" => text = Some(value.to_string()),
            _ => {}
        }
    }

    if outline.title.is_none() {
        outline.title = text;
    }
    Ok(outline)
}
