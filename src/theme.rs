//! Terminal palette handling.
//!
//! Output colors are indices into the 256-color ANSI palette. Users can
//! remap any index to another through the `color_map` config table, e.g.
//! to make feed colors readable on a light background.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Number of addressable palette entries
pub const PALETTE_SIZE: usize = 256;

/// Palette index for secondary text (publish times, links)
pub const SECONDARY_TEXT: u8 = 7;
/// Palette index for the "new item" marker
pub const HIGHLIGHT: u8 = 10;
/// Palette index for warnings
pub const WARNING: u8 = 11;

// ============================================================================
// Color Map
// ============================================================================

/// Fixed-size palette remap. Indices without an override map to themselves.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ColorMap {
    table: [u8; PALETTE_SIZE],
}

impl Default for ColorMap {
    fn default() -> Self {
        let mut table = [0u8; PALETTE_SIZE];
        for (idx, slot) in table.iter_mut().enumerate() {
            *slot = idx as u8;
        }
        Self { table }
    }
}

impl ColorMap {
    /// Resolve a palette index through the map.
    pub fn map(&self, color: u8) -> u8 {
        self.table[color as usize]
    }

    pub fn set(&mut self, from: u8, to: u8) {
        self.table[from as usize] = to;
    }

    /// Drop the override for `from`, restoring identity.
    pub fn reset(&mut self, from: u8) {
        self.table[from as usize] = from;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Overrides only, in index order.
    pub fn overrides(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(|(idx, to)| *idx != **to as usize)
            .map(|(idx, to)| (idx as u8, *to))
    }

    /// Apply a `from:to,from:to` mapping string.
    ///
    /// An empty string clears every override and `from:` (empty target)
    /// removes a single one.
    pub fn apply_spec(&mut self, spec: &str) -> Result<(), ColorMapError> {
        if spec.trim().is_empty() {
            self.clear();
            return Ok(());
        }

        for pair in spec.split(',') {
            let (from, to) = match pair.split_once(':') {
                Some((from, to)) => (from, to),
                None => (pair, ""),
            };
            let from = parse_index(from)?;
            if to.trim().is_empty() {
                self.reset(from);
            } else {
                self.set(from, parse_index(to)?);
            }
        }
        Ok(())
    }
}

fn parse_index(raw: &str) -> Result<u8, ColorMapError> {
    raw.trim()
        .parse::<u8>()
        .map_err(|_| ColorMapError(raw.trim().to_string()))
}

/// A palette index outside 0-255 or not a number.
#[derive(Debug, thiserror::Error)]
#[error("Invalid palette index {0:?} (expected 0-255)")]
pub struct ColorMapError(pub String);

impl fmt::Debug for ColorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.overrides()).finish()
    }
}

// TOML keys are strings, so the map is stored as { "0" = 230 }.
impl Serialize for ColorMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let table: BTreeMap<String, u8> = self
            .overrides()
            .map(|(from, to)| (from.to_string(), to))
            .collect();
        table.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ColorMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let table = BTreeMap::<String, u8>::deserialize(deserializer)?;
        let mut map = ColorMap::default();
        for (from, to) in table {
            let from = parse_index(&from).map_err(D::Error::custom)?;
            map.set(from, to);
        }
        Ok(map)
    }
}

// ============================================================================
// Feed color assignment
// ============================================================================

/// Hands out one palette color per distinct feed title, in first-seen order.
#[derive(Debug, Default)]
pub struct FeedColors {
    assigned: std::collections::HashMap<String, u8>,
}

impl FeedColors {
    /// Color for `title`, assigning the next palette slot on first sight.
    /// Slots cycle through the whole palette.
    pub fn color_for(&mut self, title: &str, map: &ColorMap) -> u8 {
        if let Some(color) = self.assigned.get(title) {
            return *color;
        }
        let slot = (self.assigned.len() % PALETTE_SIZE) as u8;
        let color = map.map(slot);
        self.assigned.insert(title.to_string(), color);
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        let map = ColorMap::default();
        assert_eq!(map.map(0), 0);
        assert_eq!(map.map(200), 200);
        assert_eq!(map.overrides().count(), 0);
    }

    #[test]
    fn test_apply_spec() {
        let mut map = ColorMap::default();
        map.apply_spec("0:230,1:213").unwrap();
        assert_eq!(map.map(0), 230);
        assert_eq!(map.map(1), 213);
        assert_eq!(map.map(2), 2);

        map.apply_spec("0:").unwrap();
        assert_eq!(map.map(0), 0);
        assert_eq!(map.map(1), 213);

        map.apply_spec("").unwrap();
        assert_eq!(map, ColorMap::default());
    }

    #[test]
    fn test_apply_spec_rejects_out_of_range() {
        let mut map = ColorMap::default();
        assert!(map.apply_spec("0:256").is_err());
        assert!(map.apply_spec("x:1").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            color_map: ColorMap,
        }
        let mut map = ColorMap::default();
        map.set(7, 245);
        let text = toml::to_string(&Wrapper { color_map: map }).unwrap();
        assert!(text.contains("\"7\" = 245") || text.contains("7 = 245"));
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.color_map, map);
    }

    #[test]
    fn test_feed_colors_first_seen_order() {
        let map = ColorMap::default();
        let mut colors = FeedColors::default();
        assert_eq!(colors.color_for("Alpha", &map), 0);
        assert_eq!(colors.color_for("Beta", &map), 1);
        assert_eq!(colors.color_for("Alpha", &map), 0);
        assert_eq!(colors.color_for("Gamma", &map), 2);
    }

    #[test]
    fn test_feed_colors_go_through_map() {
        let mut map = ColorMap::default();
        map.set(0, 99);
        let mut colors = FeedColors::default();
        assert_eq!(colors.color_for("Alpha", &map), 99);
    }
}
