use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::types::{CacheEntry, CacheError, CacheMap};
use crate::util::write_atomic;

/// Name of the revalidation record file inside the cache directory
const CACHE_INFO_FILE: &str = "cache_info";
/// Prefix of raw body files; the rest of the name is the escaped feed URL
const BODY_PREFIX: &str = "feed_";
/// Longest body file name that still leaves room for the temp suffix added
/// by `write_atomic` under a 255-byte file name limit
const MAX_BODY_NAME: usize = 234;

// ============================================================================
// Cache Store
// ============================================================================

/// Filesystem-backed feed cache.
///
/// Holds two kinds of state under one directory:
///
/// - `cache_info`: one line of revalidation metadata per feed URL
/// - `feed_<escaped url>`: the last successfully fetched, decompressed body
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn info_path(&self) -> PathBuf {
        self.dir.join(CACHE_INFO_FILE)
    }

    fn body_path(&self, url: &str) -> PathBuf {
        self.dir.join(body_file_name(url))
    }

    // ========================================================================
    // Revalidation metadata
    // ========================================================================

    /// Load every cache record.
    ///
    /// A missing file is an empty cache. A single malformed line fails the
    /// whole load with [`CacheError::Malformed`].
    pub fn load_all(&self) -> Result<CacheMap, CacheError> {
        let file = match File::open(self.info_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "No cache info yet");
                return Ok(CacheMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = CacheMap::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let entry = CacheEntry::from_line(&line).map_err(|reason| CacheError::Malformed {
                line: idx + 1,
                reason,
            })?;
            entries.insert(entry.url.clone(), entry);
        }

        tracing::debug!(entries = entries.len(), "Loaded cache info");
        Ok(entries)
    }

    /// Replace the record file with exactly the given entries.
    ///
    /// Lines are written in URL order so the file diffs cleanly between runs.
    pub fn save_all(&self, entries: &CacheMap) -> Result<(), CacheError> {
        let mut sorted: Vec<&CacheEntry> = entries.values().collect();
        sorted.sort_by(|a, b| a.url.cmp(&b.url));

        let content: String = sorted.iter().map(|e| e.to_line()).collect();
        write_atomic(&self.info_path(), content.as_bytes())?;
        Ok(())
    }

    // ========================================================================
    // Raw bodies
    // ========================================================================

    /// Store the raw body for `url`, replacing any previous one.
    pub fn save_body(&self, url: &str, bytes: &[u8]) -> Result<(), CacheError> {
        write_atomic(&self.body_path(url), bytes)?;
        Ok(())
    }

    /// Open the stored body for reading.
    pub fn open_body(&self, url: &str) -> Result<BufReader<File>, CacheError> {
        match File::open(self.body_path(url)) {
            Ok(f) => Ok(BufReader::new(f)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CacheError::NotFound(url.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has_body(&self, url: &str) -> bool {
        self.body_path(url).is_file()
    }

    /// Forget feeds entirely: their records and their bodies.
    ///
    /// URLs without cached state are ignored.
    pub fn remove_entries(&self, urls: &[String]) -> Result<(), CacheError> {
        let mut entries = self.load_all()?;
        let before = entries.len();
        for url in urls {
            entries.remove(url);
        }
        if entries.len() != before {
            self.save_all(&entries)?;
        }

        for url in urls {
            match std::fs::remove_file(self.body_path(url)) {
                Ok(()) => tracing::debug!(url = %url, "Removed cached body"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// `feed_<escaped url>`, or `feed_sha256_<digest>` when the escaped URL is
/// too long to be a file name.
fn body_file_name(url: &str) -> String {
    let name = format!("{BODY_PREFIX}{}", urlencoding::encode(url));
    if name.len() <= MAX_BODY_NAME {
        return name;
    }
    format!("{BODY_PREFIX}sha256_{:x}", Sha256::digest(url.as_bytes()))
}
