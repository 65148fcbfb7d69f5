//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - periods, indicators and raw readings (`Period`, `Indicator`, `RawReading`, `RawBatch`)
//! - correction outputs (`CorrectedPoint`, `CorrectionEvent`, `CitySeries`)
//! - run configuration (`CorrectionConfig`, `RunConfig`)
//! - the published JSON schema (`published`)

pub mod published;
pub mod types;

pub use published::*;
pub use types::*;
