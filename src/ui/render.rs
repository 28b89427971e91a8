use chrono::{DateTime, Utc};
use std::io;

use super::printer::Printer;
use crate::config::Config;
use crate::feed::RunSummary;
use crate::ranking::FeedItem;
use crate::storage::CacheMap;
use crate::theme::{ColorMap, HIGHLIGHT, PALETTE_SIZE, SECONDARY_TEXT};
use crate::util::{
    display_width, pad_to_width, pluralize, relative_time, strip_control_chars, truncate_to_width,
};

/// Widest the feed title column may grow
const MAX_COLUMN_WIDTH: usize = 30;
const NEW_MARK: &str = "• ";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn published_relative(item: &FeedItem, now: DateTime<Utc>) -> String {
    match item.entry().published {
        Some(published) => relative_time((now - published).num_seconds()),
        None => "-".to_string(),
    }
}

/// Print up to `limit` items, first item last so it sits above the prompt.
///
/// Returns how many items were shown.
pub fn print_items(
    printer: &mut Printer,
    items: &[FeedItem],
    limit: Option<usize>,
    now: DateTime<Utc>,
    colors: &ColorMap,
) -> io::Result<usize> {
    if items.is_empty() {
        printer.eprintln("no items to display")?;
        return Ok(0);
    }
    let shown = match limit {
        Some(limit) if limit > 0 => limit.min(items.len()),
        _ => items.len(),
    };
    let items = &items[..shown];

    let times: Vec<String> = items.iter().map(|item| published_relative(item, now)).collect();
    let column = items
        .iter()
        .zip(&times)
        .map(|(item, time)| display_width(&item.feed().title).max(display_width(time)))
        .max()
        .unwrap_or(0)
        .min(MAX_COLUMN_WIDTH);

    let secondary = colors.map(SECONDARY_TEXT);
    let highlight = colors.map(HIGHLIGHT);

    for (item, time) in items.iter().zip(&times).rev() {
        let entry = item.entry();
        let feed_title = strip_control_chars(&item.feed().title);
        let feed_title = truncate_to_width(&feed_title, column);
        let mark = if item.is_new() {
            printer.paint(NEW_MARK, highlight)
        } else {
            String::new()
        };

        let first = format!(
            "{}  {}{}",
            printer.paint(&pad_to_width(&feed_title, column), item.color()),
            mark,
            strip_control_chars(&entry.title)
        );
        let second = format!(
            "{}  {}\n",
            printer.paint(&pad_to_width(time, column), secondary),
            printer.paint(&strip_control_chars(&entry.link), secondary)
        );
        printer.println(first)?;
        printer.println(second)?;
    }
    Ok(shown)
}

pub fn print_summary(printer: &mut Printer, summary: &RunSummary, now: DateTime<Utc>) -> io::Result<()> {
    let elapsed = (now - summary.start).num_milliseconds().max(0) as f64 / 1000.0;
    printer.println(format!(
        "Displayed {} from {} ({} cached, {} fetched) with {} in {:.2}s",
        pluralize(summary.items_shown, "item"),
        pluralize(summary.feeds_count, "feed"),
        summary.feeds_cached,
        summary.feeds_fetched,
        pluralize(summary.items_count, "item"),
        elapsed
    ))
}

/// One row per cached feed, sorted by URL.
pub fn print_cache_info(printer: &mut Printer, cache: &CacheMap) -> io::Result<()> {
    let mut entries: Vec<_> = cache.values().collect();
    entries.sort_by(|a, b| a.url.cmp(&b.url));
    let column = entries.iter().map(|e| display_width(&e.url)).max().unwrap_or(0);

    printer.println(format!(
        "{}  Last fetch           Fetch after",
        pad_to_width("URL", column)
    ))?;
    for entry in entries {
        printer.println(format!(
            "{}  {}  {}",
            pad_to_width(&entry.url, column),
            entry.last_fetch.format(TIMESTAMP_FORMAT),
            entry.fetch_after.format(TIMESTAMP_FORMAT)
        ))?;
    }
    Ok(())
}

/// Every palette index painted in its own color, styling forced on.
pub fn print_color_range(printer: &mut Printer) -> io::Result<()> {
    let styling = printer.styling();
    printer.set_styling(true);
    let line: String = (0..PALETTE_SIZE)
        .map(|idx| printer.paint(&format!("{} ", idx), idx as u8))
        .collect();
    printer.set_styling(styling);
    printer.println(line)
}

pub fn print_config(printer: &mut Printer, config: &Config) -> io::Result<()> {
    let color_map: String = config
        .color_map
        .overrides()
        .map(|(from, to)| format!(" {}:{}", from, to))
        .collect();
    let styling = match config.styling {
        crate::config::Styling::Auto => "auto",
        crate::config::Styling::Always => "always",
        crate::config::Styling::Never => "never",
    };

    printer.println(format!("User-Agent: {}", config.user_agent))?;
    printer.println(format!("Timeout: {}", config.timeout_seconds))?;
    printer.println(format!("Batch size: {}", config.batch_size))?;
    printer.println(format!("Styling: {}", styling))?;
    printer.println(format!("Color map:{}", color_map))?;
    printer.println(format!(
        "Summary: {}",
        if config.summary { "enabled" } else { "disabled" }
    ))?;
    printer.println(format!(
        "Future items: {}",
        if config.hide_future_items { "hide" } else { "show" }
    ))
}
