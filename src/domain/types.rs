//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - produced by ingest and consumed by the merger/engine in-memory
//! - exported to the published JSON files
//! - reloaded later for `hpi show`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A calendar month.
///
/// Field order matters: the derived `Ord` compares year first, then month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    /// Parse the strict `YYYY-MM` layout.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let bytes = s.as_bytes();
        let layout_ok = bytes.len() == 7
            && bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);
        if !layout_ok {
            return Err(format!("Invalid period '{s}'. Expected YYYY-MM."));
        }

        // Both slices are ASCII digits, so these parses cannot overflow.
        let year: i32 = s[..4].parse().map_err(|_| format!("Invalid year in period '{s}'."))?;
        let month: u32 = s[5..].parse().map_err(|_| format!("Invalid month in period '{s}'."))?;
        Period::new(year, month).ok_or_else(|| format!("Invalid month in period '{s}' (expected 01-12)."))
    }

    /// Linear month number (`year * 12 + month - 1`), used for gap arithmetic.
    fn ordinal(self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ordinal: i64) -> Self {
        let year = ordinal.div_euclid(12);
        let month = ordinal.rem_euclid(12) + 1;
        Self {
            year: year as i32,
            month: month as u32,
        }
    }

    /// The month immediately after this one.
    pub fn succ(self) -> Self {
        self.offset(1)
    }

    /// Shift by a signed number of months.
    pub fn offset(self, months: i64) -> Self {
        Self::from_ordinal(self.ordinal() + months)
    }

    /// Number of months from `earlier` to `self` (negative if `earlier` is later).
    pub fn months_since(self, earlier: Period) -> i64 {
        self.ordinal() - earlier.ordinal()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::parse(s)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Period::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The eight published price index tables.
///
/// Declaration order is the publication order (and the `Ord` used for sorting units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Indicator {
    #[serde(rename = "new_house_basic")]
    #[value(name = "new_house_basic")]
    NewHouseBasic,
    #[serde(rename = "used_house_basic")]
    #[value(name = "used_house_basic")]
    UsedHouseBasic,
    #[serde(rename = "new_house_classified_90_below")]
    #[value(name = "new_house_classified_90_below")]
    NewHouseClassified90Below,
    #[serde(rename = "new_house_classified_90_144")]
    #[value(name = "new_house_classified_90_144")]
    NewHouseClassified90To144,
    #[serde(rename = "new_house_classified_144_above")]
    #[value(name = "new_house_classified_144_above")]
    NewHouseClassified144Above,
    #[serde(rename = "used_house_classified_90_below")]
    #[value(name = "used_house_classified_90_below")]
    UsedHouseClassified90Below,
    #[serde(rename = "used_house_classified_90_144")]
    #[value(name = "used_house_classified_90_144")]
    UsedHouseClassified90To144,
    #[serde(rename = "used_house_classified_144_above")]
    #[value(name = "used_house_classified_144_above")]
    UsedHouseClassified144Above,
}

const NEW_HOUSE: &str = "新建商品住宅";
const USED_HOUSE: &str = "二手住宅";

impl Indicator {
    pub const ALL: [Indicator; 8] = [
        Indicator::NewHouseBasic,
        Indicator::UsedHouseBasic,
        Indicator::NewHouseClassified90Below,
        Indicator::NewHouseClassified90To144,
        Indicator::NewHouseClassified144Above,
        Indicator::UsedHouseClassified90Below,
        Indicator::UsedHouseClassified90To144,
        Indicator::UsedHouseClassified144Above,
    ];

    /// Stable identifier used in input files, CLI flags and the city API path.
    pub fn slug(self) -> &'static str {
        match self {
            Indicator::NewHouseBasic => "new_house_basic",
            Indicator::UsedHouseBasic => "used_house_basic",
            Indicator::NewHouseClassified90Below => "new_house_classified_90_below",
            Indicator::NewHouseClassified90To144 => "new_house_classified_90_144",
            Indicator::NewHouseClassified144Above => "new_house_classified_144_above",
            Indicator::UsedHouseClassified90Below => "used_house_classified_90_below",
            Indicator::UsedHouseClassified90To144 => "used_house_classified_90_144",
            Indicator::UsedHouseClassified144Above => "used_house_classified_144_above",
        }
    }

    /// Table title as published by the statistics bureau.
    pub fn index_type(self) -> &'static str {
        match self {
            Indicator::NewHouseBasic => "新建商品住宅销售价格指数",
            Indicator::UsedHouseBasic => "二手住宅销售价格指数",
            Indicator::NewHouseClassified90Below => "新建商品住宅销售价格分类指数 - 90m2及以下",
            Indicator::NewHouseClassified90To144 => "新建商品住宅销售价格分类指数 - 90-144m2",
            Indicator::NewHouseClassified144Above => "新建商品住宅销售价格分类指数 - 144m2以上",
            Indicator::UsedHouseClassified90Below => "二手住宅销售价格分类指数 - 90m2及以下",
            Indicator::UsedHouseClassified90To144 => "二手住宅销售价格分类指数 - 90-144m2",
            Indicator::UsedHouseClassified144Above => "二手住宅销售价格分类指数 - 144m2以上",
        }
    }

    pub fn house_type(self) -> &'static str {
        match self {
            Indicator::NewHouseBasic
            | Indicator::NewHouseClassified90Below
            | Indicator::NewHouseClassified90To144
            | Indicator::NewHouseClassified144Above => NEW_HOUSE,
            Indicator::UsedHouseBasic
            | Indicator::UsedHouseClassified90Below
            | Indicator::UsedHouseClassified90To144
            | Indicator::UsedHouseClassified144Above => USED_HOUSE,
        }
    }

    /// Floor-area bucket for the classified tables; `None` for the basic ones.
    pub fn area_type(self) -> Option<&'static str> {
        match self {
            Indicator::NewHouseBasic | Indicator::UsedHouseBasic => None,
            Indicator::NewHouseClassified90Below | Indicator::UsedHouseClassified90Below => Some("90m2及以下"),
            Indicator::NewHouseClassified90To144 | Indicator::UsedHouseClassified90To144 => Some("90-144m2"),
            Indicator::NewHouseClassified144Above | Indicator::UsedHouseClassified144Above => Some("144m2以上"),
        }
    }

    /// Published file name under the output directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Indicator::NewHouseBasic => "new_house_basic_index.json",
            Indicator::UsedHouseBasic => "used_house_basic_index.json",
            Indicator::NewHouseClassified90Below => "new_house_classified_90_below.json",
            Indicator::NewHouseClassified90To144 => "new_house_classified_90_144.json",
            Indicator::NewHouseClassified144Above => "new_house_classified_144_above.json",
            Indicator::UsedHouseClassified90Below => "used_house_classified_90_below.json",
            Indicator::UsedHouseClassified90To144 => "used_house_classified_90_144.json",
            Indicator::UsedHouseClassified144Above => "used_house_classified_144_above.json",
        }
    }

    /// Resolve an indicator label from an input file.
    ///
    /// Accepts the slug (case-insensitive) or the exact published table title.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Indicator::ALL
            .into_iter()
            .find(|i| i.slug().eq_ignore_ascii_case(label) || i.index_type() == label)
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One raw observation for a (city, indicator, period) key.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub city: String,
    pub indicator: Indicator,
    pub period: Period,
    pub month_on_month: Option<f64>,
    pub year_on_year: Option<f64>,
}

impl RawReading {
    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            indicator: self.indicator,
            city: self.city.clone(),
        }
    }
}

/// All readings collected by a single scrape.
#[derive(Debug, Clone)]
pub struct RawBatch {
    /// Where the batch came from (usually the file name). Breaks timestamp ties.
    pub source: String,
    pub collected_at: NaiveDateTime,
    pub readings: Vec<RawReading>,
}

/// A unit of correction work.
///
/// Field order matters: units sort by indicator first, then city.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub indicator: Indicator,
    pub city: String,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.city, self.indicator)
    }
}

/// How a corrected point's value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    /// The anchor period, pinned at the base value.
    Anchor,
    /// Chained from MoM; no YoY cross-check was possible.
    Chained,
    /// Chained from MoM and confirmed by the YoY cross-check.
    Confirmed,
    /// Chained value disagreed with YoY; the YoY-implied value was published.
    Corrected,
    /// No MoM reading; derived from the YoY reading and the value 12 months earlier.
    YoyDerived,
    /// No usable signal; previous value carried forward.
    CarriedForward,
    /// A ratio or base was unusable (zero, negative, non-finite).
    Unresolved,
}

impl PointStatus {
    /// Whether the value is backed by an observation for this period.
    pub fn is_observed(self) -> bool {
        match self {
            PointStatus::Anchor
            | PointStatus::Chained
            | PointStatus::Confirmed
            | PointStatus::Corrected
            | PointStatus::YoyDerived => true,
            PointStatus::CarriedForward | PointStatus::Unresolved => false,
        }
    }
}

/// One published point of a corrected series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedPoint {
    #[serde(rename = "date")]
    pub period: Period,
    pub actual_value: f64,
    /// Raw MoM reading for this period, if any.
    pub month_on_month: Option<f64>,
    /// Raw YoY reading for this period, if any.
    pub year_on_year: Option<f64>,
    pub growth_rate: Option<f64>,
    pub observed: bool,
    pub status: PointStatus,
}

/// Audit record of a MoM/YoY disagreement resolved in favour of YoY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub period: Period,
    pub mom_implied: f64,
    pub yoy_implied: f64,
    pub chosen: f64,
    /// `chosen - mom_implied`.
    pub delta: f64,
    /// `|yoy_implied - mom_implied| / mom_implied`.
    pub relative_delta: f64,
}

/// A corrected series for one unit. Periods are strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct CitySeries {
    pub key: SeriesKey,
    pub points: Vec<CorrectedPoint>,
}

/// Tunables for the correction engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionConfig {
    /// Value assigned to the anchor period.
    pub base_value: f64,
    /// Relative MoM/YoY disagreement tolerated before a correction is made.
    pub tolerance: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            base_value: 100.0,
            tolerance: 0.005,
        }
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus `.env`/environment defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub correction: CorrectionConfig,
    /// Indicators to process; all eight unless narrowed on the command line.
    pub indicators: Vec<Indicator>,
    /// Restrict processing to these cities (empty = every city seen in the data).
    pub cities: Vec<String>,
    /// Worker threads for the per-unit pool (`None` = rayon default).
    pub threads: Option<usize>,
}
