//! Display formatting for terminal output
//!
//! Formats run overviews and per-image summaries as plain text tables.

pub mod overview;
pub mod summary;

pub use overview::format_overview;
pub use summary::{format_actions, format_summary};
