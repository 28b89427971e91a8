//! Terminal output.
//!
//! # Module Structure
//!
//! - `printer` - stdout/stderr sink with optional 256-color styling
//! - `render` - item list, summary, cache table and config views

mod printer;
mod render;

pub use printer::{styling_enabled, Printer, SharedBuffer};
pub use render::{
    print_cache_info, print_color_range, print_config, print_items, print_summary,
};
