//! Schema of the published JSON artifacts.
//!
//! One `IndicatorFile` per indicator, plus a `SummaryReport`. The web layer
//! serves these files as-is (`/api/data/{file}`) or projects a single city out
//! of them (`/api/city/{city}/{indicator}`, see `CityView`), so nothing here
//! requires recomputation at request time.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{CorrectedPoint, CorrectionEvent, Period, RawReading};

/// Processing outcome for one city within an indicator file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityStatus {
    Success,
    NoData,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Period,
    pub end: Period,
}

/// A merged raw reading as published (city/indicator are implied by the enclosing entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub date: Period,
    pub month_on_month: Option<f64>,
    pub year_on_year: Option<f64>,
}

impl From<&RawReading> for RawPoint {
    fn from(r: &RawReading) -> Self {
        Self {
            date: r.period,
            month_on_month: r.month_on_month,
            year_on_year: r.year_on_year,
        }
    }
}

/// A point of the plain MoM chain (no cross-validation), kept for comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicPoint {
    pub date: Period,
    pub actual_value: f64,
    pub month_on_month: Option<f64>,
    pub year_on_year: Option<f64>,
    pub growth_rate: Option<f64>,
}

/// Consistency of a published value against the raw readings it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCheck {
    pub calculated_mom: Option<f64>,
    pub calculated_yoy: Option<f64>,
    pub mom_error: Option<f64>,
    pub yoy_error: Option<f64>,
    /// `true` unless a raw MoM exists and disagrees after rounding to one decimal.
    pub mom_match: bool,
    /// `true` unless a raw YoY exists and disagrees after rounding to one decimal.
    pub yoy_match: bool,
}

/// `CorrectedPoint` plus its consistency check, flattened into one JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPoint {
    #[serde(flatten)]
    pub point: CorrectedPoint,
    #[serde(flatten)]
    pub check: PointCheck,
}

/// Per-city summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatistics {
    pub final_value: f64,
    pub max_value: f64,
    pub min_value: f64,
    pub total_growth_percent: f64,
    pub mom_match_rate: f64,
    pub yoy_match_rate: f64,
    /// `"matched/checked"`.
    pub mom_matches: String,
    pub yoy_matches: String,
    pub avg_mom_error: f64,
    pub avg_yoy_error: f64,
    pub corrections: usize,
    pub carried_forward: usize,
    pub unresolved: usize,
}

/// One city's section of an indicator file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityEntry {
    pub city: String,
    pub status: CityStatus,
    pub data_count: usize,
    pub time_range: Option<TimeRange>,
    pub raw_data: Vec<RawPoint>,
    pub basic_result: Vec<BasicPoint>,
    pub corrected_result: Vec<PublishedPoint>,
    pub corrections: Vec<CorrectionEvent>,
    pub statistics: Option<SeriesStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A full per-indicator file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorFile {
    pub index_type: String,
    pub house_type: String,
    pub area_type: Option<String>,
    pub generated_at: NaiveDateTime,
    pub total_cities: usize,
    pub success_count: usize,
    pub no_data_count: usize,
    pub error_count: usize,
    pub cities: Vec<CityEntry>,
}

/// Response shape of `GET /api/city/{city}/{indicator}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityView {
    pub index_type: String,
    pub house_type: String,
    pub area_type: Option<String>,
    pub generated_at: NaiveDateTime,
    pub city_data: CityEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub filename: String,
    pub index_type: String,
    pub house_type: String,
    pub area_type: Option<String>,
    pub file_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// `summary_report.json`: what a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub generated_at: NaiveDateTime,
    pub total_index_types: usize,
    pub output_directory: String,
    pub total_cities: usize,
    pub cities: Vec<String>,
    pub files: Vec<SummaryFile>,
}
