//! Terminal output.
//!
//! Formatting lives in one place so pipeline code never prints and output
//! changes stay localized.

pub mod format;

pub use format::*;
