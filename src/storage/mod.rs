//! Durable feed cache: revalidation records plus raw bodies on disk.

mod cache;
mod types;

pub use cache::CacheStore;
pub use types::{CacheEntry, CacheError, CacheMap};
