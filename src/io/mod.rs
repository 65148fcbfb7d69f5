//! Input/output helpers.
//!
//! - raw batch ingest + record validation (`ingest`)
//! - published JSON files: indicator files, summary, city view (`publish`)

pub mod ingest;
pub mod publish;

pub use ingest::*;
pub use publish::*;
