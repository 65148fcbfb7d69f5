//! Raw batch ingest.
//!
//! This module turns the scraper's output directory into `RawBatch`es:
//! one batch per file, each tagged with its collection timestamp.
//!
//! Design goals:
//! - **Strict schema** for required columns (a file missing them is skipped)
//! - **Record-level validation** (skip bad records, but report what happened)
//! - **Deterministic behavior** (files are read in name order)
//! - **Separation of concerns**: no merging or correction logic here
//!
//! Supported layouts:
//! - CSV with `city,indicator,period,month_on_month,year_on_year`
//!   (optional `collected_at`)
//! - JSON `{ "collected_at": ..., "series": [ { "city", "indicator", "readings": [...] } ] }`
//!
//! When a file has no explicit timestamp, it is taken from a `_YYYY_MM_DD`
//! suffix on the file name (e.g. `house_price_data_2021_12_15.csv`).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{Indicator, Period, RawBatch, RawReading};
use crate::error::AppError;

/// A record-level problem encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordError {
    pub source: String,
    /// `line N` for CSV, `series[i].readings[j]` for JSON.
    pub location: String,
    pub message: String,
}

/// A whole file that could not be used.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Ingest output: batches + everything that was dropped along the way.
#[derive(Debug, Clone, Default)]
pub struct LoadedBatches {
    pub batches: Vec<RawBatch>,
    pub record_errors: Vec<RecordError>,
    pub skipped_files: Vec<SkippedFile>,
    pub records_read: usize,
    pub records_used: usize,
}

/// Result of parsing one batch file's contents.
#[derive(Debug, Clone)]
pub struct ParsedBatch {
    pub batch: RawBatch,
    pub record_errors: Vec<RecordError>,
    pub records_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchFormat {
    Csv,
    Json,
}

/// Load every `.csv` / `.json` batch under `data_dir` (non-recursive).
pub fn load_batches(data_dir: &Path) -> Result<LoadedBatches, AppError> {
    let entries = std::fs::read_dir(data_dir).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to read data directory '{}': {e}", data_dir.display()),
        )
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && batch_format(p).is_some())
        .collect();
    paths.sort();

    let mut loaded = LoadedBatches::default();

    for path in paths {
        match read_batch_file(&path) {
            Ok(parsed) => {
                tracing::debug!(
                    file = %path.display(),
                    records = parsed.records_read,
                    rejected = parsed.record_errors.len(),
                    "loaded batch"
                );
                loaded.records_read += parsed.records_read;
                loaded.records_used += parsed.batch.readings.len();
                loaded.record_errors.extend(parsed.record_errors);
                loaded.batches.push(parsed.batch);
            }
            Err(reason) => {
                tracing::warn!(file = %path.display(), %reason, "skipping batch file");
                loaded.skipped_files.push(SkippedFile { path, reason });
            }
        }
    }

    if loaded.batches.is_empty() {
        return Err(AppError::new(
            3,
            format!("No usable batch files found in '{}'.", data_dir.display()),
        ));
    }

    Ok(loaded)
}

/// Read and parse a single batch file.
pub fn read_batch_file(path: &Path) -> Result<ParsedBatch, String> {
    let format = batch_format(path).ok_or_else(|| "Unsupported file extension.".to_string())?;
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(collected_at_from_file_stem);

    let file = File::open(path).map_err(|e| format!("Failed to open: {e}"))?;
    match format {
        BatchFormat::Csv => parse_csv_batch(file, &source, fallback),
        BatchFormat::Json => parse_json_batch(file, &source, fallback),
    }
}

fn batch_format(path: &Path) -> Option<BatchFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(BatchFormat::Csv),
        "json" => Some(BatchFormat::Json),
        _ => None,
    }
}

/// Parse a CSV batch.
///
/// `fallback_collected_at` is used when no row carries a `collected_at` value.
pub fn parse_csv_batch<R: Read>(
    reader: R,
    source: &str,
    fallback_collected_at: Option<NaiveDateTime>,
) -> Result<ParsedBatch, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| format!("Failed to read CSV headers: {e}"))?
        .clone();
    let header_map = build_header_map(&headers);

    for required in ["city", "indicator", "period"] {
        if !header_map.contains_key(required) {
            return Err(format!("Missing required column: `{required}`"));
        }
    }
    if !header_map.contains_key("month_on_month") && !header_map.contains_key("year_on_year") {
        return Err("Missing value columns: need `month_on_month` and/or `year_on_year`.".to_string());
    }

    let mut readings = Vec::new();
    let mut record_errors = Vec::new();
    let mut records_read = 0usize;
    // Only the first non-empty `collected_at` cell counts.
    let mut collected_at_cell: Option<String> = None;

    for (idx, result) in reader.records().enumerate() {
        // +2: header is line 1 and lines are 1-based.
        let line = idx + 2;
        records_read += 1;
        let reject = |message: String| RecordError {
            source: source.to_string(),
            location: format!("line {line}"),
            message,
        };

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                record_errors.push(reject(format!("CSV parse error: {e}")));
                continue;
            }
        };

        if collected_at_cell.is_none() {
            collected_at_cell = get_optional(&record, &header_map, "collected_at").map(str::to_string);
        }

        let parsed = get_required(&record, &header_map, "city").and_then(|city| {
            let indicator = get_required(&record, &header_map, "indicator")?;
            let period = get_required(&record, &header_map, "period")?;
            let mom = get_optional(&record, &header_map, "month_on_month");
            let yoy = get_optional(&record, &header_map, "year_on_year");
            build_reading(
                city,
                indicator,
                period,
                parse_opt_f64(mom, "month_on_month")?,
                parse_opt_f64(yoy, "year_on_year")?,
            )
        });

        match parsed {
            Ok(reading) => readings.push(reading),
            Err(message) => record_errors.push(reject(message)),
        }
    }

    let collected_at = match collected_at_cell.as_deref() {
        Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| format!("Invalid `collected_at` '{raw}'."))?),
        None => fallback_collected_at,
    }
    .ok_or_else(|| {
        "No collection timestamp (no `collected_at` value and no `_YYYY_MM_DD` file name suffix).".to_string()
    })?;

    Ok(ParsedBatch {
        batch: RawBatch {
            source: source.to_string(),
            collected_at,
            readings,
        },
        record_errors,
        records_read,
    })
}

#[derive(Debug, Deserialize)]
struct JsonBatch {
    #[serde(default)]
    collected_at: Option<String>,
    series: Vec<JsonSeries>,
}

#[derive(Debug, Deserialize)]
struct JsonSeries {
    city: String,
    indicator: String,
    readings: Vec<JsonReading>,
}

/// Values stay untyped so a single bad cell rejects one record, not the file.
#[derive(Debug, Deserialize)]
struct JsonReading {
    #[serde(default)]
    period: Value,
    #[serde(default)]
    month_on_month: Value,
    #[serde(default)]
    year_on_year: Value,
}

/// Parse a JSON batch.
pub fn parse_json_batch<R: Read>(
    reader: R,
    source: &str,
    fallback_collected_at: Option<NaiveDateTime>,
) -> Result<ParsedBatch, String> {
    let doc: JsonBatch = serde_json::from_reader(reader).map_err(|e| format!("Invalid batch JSON: {e}"))?;

    let collected_at = match doc.collected_at.as_deref() {
        Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| format!("Invalid `collected_at` '{raw}'."))?),
        None => fallback_collected_at,
    }
    .ok_or_else(|| {
        "No collection timestamp (no `collected_at` and no `_YYYY_MM_DD` file name suffix).".to_string()
    })?;

    let mut readings = Vec::new();
    let mut record_errors = Vec::new();
    let mut records_read = 0usize;

    for (i, series) in doc.series.iter().enumerate() {
        for (j, r) in series.readings.iter().enumerate() {
            records_read += 1;
            let parsed = json_str(&r.period, "period").and_then(|period| {
                build_reading(
                    &series.city,
                    &series.indicator,
                    &period,
                    json_f64(&r.month_on_month, "month_on_month")?,
                    json_f64(&r.year_on_year, "year_on_year")?,
                )
            });
            match parsed {
                Ok(reading) => readings.push(reading),
                Err(message) => record_errors.push(RecordError {
                    source: source.to_string(),
                    location: format!("series[{i}].readings[{j}]"),
                    message,
                }),
            }
        }
    }

    Ok(ParsedBatch {
        batch: RawBatch {
            source: source.to_string(),
            collected_at,
            readings,
        },
        record_errors,
        records_read,
    })
}

fn build_reading(
    city: &str,
    indicator: &str,
    period: &str,
    month_on_month: Option<f64>,
    year_on_year: Option<f64>,
) -> Result<RawReading, String> {
    let city = city.trim();
    if city.is_empty() {
        return Err("Missing required value: `city`".to_string());
    }
    let indicator =
        Indicator::from_label(indicator).ok_or_else(|| format!("Unknown indicator '{}'.", indicator.trim()))?;
    let period = Period::parse(period)?;
    if month_on_month.is_none() && year_on_year.is_none() {
        return Err("Record has neither `month_on_month` nor `year_on_year`.".to_string());
    }

    Ok(RawReading {
        city: city.to_string(),
        indicator,
        period,
        month_on_month,
        year_on_year,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (canonical_column(name), idx))
        .collect()
}

fn canonical_column(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase();
    match name.as_str() {
        "date" | "month" => "period".to_string(),
        "mom" | "环比" => "month_on_month".to_string(),
        "yoy" | "同比" => "year_on_year".to_string(),
        "城市" => "city".to_string(),
        _ => name,
    }
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    get_optional(record, header_map, name).ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_opt_f64(s: Option<&str>, name: &str) -> Result<Option<f64>, String> {
    let Some(s) = s else { return Ok(None) };
    let v = s
        .parse::<f64>()
        .map_err(|_| format!("Non-numeric `{name}` value '{s}'."))?;
    if v.is_finite() {
        Ok(Some(v))
    } else {
        Err(format!("Non-finite `{name}` value '{s}'."))
    }
}

fn json_str(v: &Value, name: &str) -> Result<String, String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(format!("Missing required value: `{name}`")),
        other => Err(format!("`{name}` must be a string, got {other}.")),
    }
}

fn json_f64(v: &Value, name: &str) -> Result<Option<f64>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .filter(|x| x.is_finite())
            .map(Some)
            .ok_or_else(|| format!("Non-finite `{name}` value {n}.")),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_opt_f64(Some(s.trim()), name),
        other => Err(format!("Non-numeric `{name}` value {other}.")),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS[.f]` and `YYYY-MM-DD`.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    const FMTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in FMTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `house_price_data_2021_12_15` -> 2021-12-15 00:00:00.
fn collected_at_from_file_stem(stem: &str) -> Option<NaiveDateTime> {
    let mut parts = stem.rsplit('_');
    let day = parts.next()?;
    let month = parts.next()?;
    let year = parts.next()?;
    if year.len() != 4 || month.len() != 2 || day.len() != 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?.and_hms_opt(0, 0, 0)
}
