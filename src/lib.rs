//! `house-price-index` library crate.
//!
//! The binary (`hpi`) is a thin wrapper around this library so that:
//!
//! - the merge/correction core is testable without spawning processes
//! - published file schemas live in one place (`domain::published`)
//! - a future API server can reuse the same pipeline

pub mod app;
pub mod cli;
pub mod correct;
pub mod domain;
pub mod error;
pub mod io;
pub mod logging;
pub mod merge;
pub mod report;
