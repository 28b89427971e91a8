//! Utility functions for common operations.
//!
//! - **Files**: atomic write-to-temp-then-rename
//! - **Text**: Unicode-aware width, truncation and terminal sanitising
//! - **URLs**: feed URL validation and normalisation

mod fs;
mod text;
mod url_validator;

pub use fs::write_atomic;
pub use text::{
    display_width, pad_to_width, pluralize, relative_time, strip_control_chars, truncate_to_width,
};
pub use url_validator::{validate_url, UrlValidationError};
