//! Series correction.
//!
//! Responsibilities:
//!
//! - reconcile MoM and YoY readings into one chained index (`engine`)
//! - check the published index against the raw readings and summarize it (`verify`)

pub mod engine;
pub mod verify;

pub use engine::*;
pub use verify::*;
