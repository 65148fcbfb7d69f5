//! Read/write the published JSON files.
//!
//! Layout of the output directory:
//! - one file per indicator (`Indicator::file_name`), schema `domain::IndicatorFile`
//! - `summary_report.json`, schema `domain::SummaryReport`
//!
//! Files are written pretty-printed with UTF-8 city names kept as-is.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{
    CityEntry, CityStatus, CityView, Indicator, IndicatorFile, SummaryFile, SummaryReport,
};
use crate::error::AppError;

pub const SUMMARY_FILE_NAME: &str = "summary_report.json";

/// Assemble an indicator file from its city entries (order is preserved).
pub fn build_indicator_file(
    indicator: Indicator,
    generated_at: NaiveDateTime,
    cities: Vec<CityEntry>,
) -> IndicatorFile {
    let count = |status: CityStatus| cities.iter().filter(|c| c.status == status).count();

    IndicatorFile {
        index_type: indicator.index_type().to_string(),
        house_type: indicator.house_type().to_string(),
        area_type: indicator.area_type().map(str::to_string),
        generated_at,
        total_cities: cities.len(),
        success_count: count(CityStatus::Success),
        no_data_count: count(CityStatus::NoData),
        error_count: count(CityStatus::Error),
        cities,
    }
}

/// Write an indicator file under `dir`, returning its path.
pub fn write_indicator_file(
    dir: &Path,
    indicator: Indicator,
    file: &IndicatorFile,
) -> Result<PathBuf, AppError> {
    let path = dir.join(indicator.file_name());
    write_json(&path, file)?;
    Ok(path)
}

/// Read an indicator file.
pub fn read_indicator_file(path: &Path) -> Result<IndicatorFile, AppError> {
    read_json(path)
}

/// Project one city out of an indicator file (the `/api/city/{city}/{indicator}` shape).
pub fn city_view(file: &IndicatorFile, city: &str) -> Option<CityView> {
    let entry = file.cities.iter().find(|c| c.city == city)?;
    Some(CityView {
        index_type: file.index_type.clone(),
        house_type: file.house_type.clone(),
        area_type: file.area_type.clone(),
        generated_at: file.generated_at,
        city_data: entry.clone(),
    })
}

/// Describe what ended up in `dir` for the given indicators.
pub fn build_summary(
    dir: &Path,
    indicators: &[Indicator],
    cities: &[String],
    generated_at: NaiveDateTime,
) -> SummaryReport {
    let files = indicators
        .iter()
        .map(|indicator| {
            let file_size = std::fs::metadata(dir.join(indicator.file_name())).ok().map(|m| m.len());
            SummaryFile {
                filename: indicator.file_name().to_string(),
                index_type: indicator.index_type().to_string(),
                house_type: indicator.house_type().to_string(),
                area_type: indicator.area_type().map(str::to_string),
                file_exists: file_size.is_some(),
                file_size,
            }
        })
        .collect();

    SummaryReport {
        generated_at,
        total_index_types: indicators.len(),
        output_directory: dir.display().to_string(),
        total_cities: cities.len(),
        cities: cities.to_vec(),
        files,
    }
}

pub fn write_summary(dir: &Path, summary: &SummaryReport) -> Result<PathBuf, AppError> {
    let path = dir.join(SUMMARY_FILE_NAME);
    write_json(&path, summary)?;
    Ok(path)
}

pub fn read_summary(dir: &Path) -> Result<SummaryReport, AppError> {
    read_json(&dir.join(SUMMARY_FILE_NAME))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush '{}': {e}", path.display())))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open '{}': {e}", path.display())))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid JSON in '{}': {e}", path.display())))
}
