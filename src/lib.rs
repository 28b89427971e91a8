//! Terminal feed reader that merges many RSS, Atom and JSON feeds into one
//! stream, re-fetching each feed only as often as its server allows.

pub mod app;
pub mod clock;
pub mod config;
pub mod feed;
pub mod ranking;
pub mod storage;
pub mod theme;
pub mod ui;
pub mod util;
