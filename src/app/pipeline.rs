//! Shared processing pipeline used by every CLI subcommand.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load batches -> merge -> correct each unit (parallel) -> verify -> publishable entries
//!
//! Each (city, indicator) unit is a pure function of its own merged readings,
//! so units run on a rayon pool and a failing unit only affects its own entry.

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use rayon::prelude::*;

use crate::correct::{basic_chain, compute_statistics, correct_series, verify_series};
use crate::domain::{
    BasicPoint, CityEntry, CitySeries, CityStatus, CorrectionConfig, CorrectionEvent, Indicator,
    IndicatorFile, PointCheck, PublishedPoint, RawPoint, RawReading, RunConfig, SeriesKey,
    SeriesStatistics, TimeRange,
};
use crate::error::AppError;
use crate::io::ingest::{LoadedBatches, load_batches};
use crate::io::publish::{build_indicator_file, build_summary, write_indicator_file, write_summary};
use crate::merge::{MergeConflict, MergeOutput, merge_batches};

/// Everything computed for one successfully corrected unit.
#[derive(Debug, Clone)]
pub struct CorrectedUnit {
    pub series: CitySeries,
    pub events: Vec<CorrectionEvent>,
    pub basic: Vec<BasicPoint>,
    pub checks: Vec<PointCheck>,
    pub statistics: Option<SeriesStatistics>,
}

/// Outcome of one unit: the merged input plus the correction result.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub key: SeriesKey,
    pub raw: Vec<RawReading>,
    pub result: Result<CorrectedUnit, AppError>,
}

/// All computed outputs of a single run (nothing written yet).
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub generated_at: NaiveDateTime,
    pub loaded: LoadedBatches,
    pub conflicts: Vec<MergeConflict>,
    pub cities: Vec<String>,
    /// One file per requested indicator, in `RunConfig::indicators` order.
    pub files: Vec<(Indicator, IndicatorFile)>,
}

impl RunOutput {
    pub fn file(&self, indicator: Indicator) -> Option<&IndicatorFile> {
        self.files.iter().find(|(i, _)| *i == indicator).map(|(_, f)| f)
    }
}

/// Execute the full pipeline from the data directory.
pub fn run(config: &RunConfig) -> Result<RunOutput, AppError> {
    let loaded = load_batches(&config.data_dir)?;
    log_ingest(&loaded);
    run_with_batches(config, loaded)
}

/// Execute the pipeline with pre-loaded batches.
pub fn run_with_batches(config: &RunConfig, loaded: LoadedBatches) -> Result<RunOutput, AppError> {
    validate_correction_config(&config.correction)?;

    let merged = merge_batches(&loaded.batches);
    for c in &merged.conflicts {
        tracing::info!(
            unit = %c.key,
            period = %c.period,
            field = %c.field,
            kept = c.kept,
            kept_source = %c.kept_source,
            discarded = c.discarded,
            discarded_source = %c.discarded_source,
            "merge conflict resolved by latest batch"
        );
    }

    let cities = select_cities(&merged, &config.cities);
    if cities.is_empty() {
        return Err(AppError::new(3, "No cities to process after merging/filtering."));
    }

    let keys: Vec<SeriesKey> = config
        .indicators
        .iter()
        .flat_map(|&indicator| {
            cities.iter().map(move |city| SeriesKey {
                indicator,
                city: city.clone(),
            })
        })
        .collect();

    let outcomes = correct_units(&merged, &keys, &config.correction, config.threads)?;

    let generated_at = Local::now().naive_local();
    let files = config
        .indicators
        .iter()
        .map(|&indicator| {
            let entries = outcomes
                .iter()
                .filter(|o| o.key.indicator == indicator)
                .map(city_entry)
                .collect();
            (indicator, build_indicator_file(indicator, generated_at, entries))
        })
        .collect();

    Ok(RunOutput {
        generated_at,
        loaded,
        conflicts: merged.conflicts,
        cities,
        files,
    })
}

/// Correct every unit in parallel. Output order follows `keys`.
pub fn correct_units(
    merged: &MergeOutput,
    keys: &[SeriesKey],
    correction: &CorrectionConfig,
    threads: Option<usize>,
) -> Result<Vec<UnitOutcome>, AppError> {
    let work = || -> Vec<UnitOutcome> {
        keys.par_iter()
            .map(|key| {
                let raw = merged.readings(key).to_vec();
                let result = isolate_unit(key, || process_unit(key, &raw, correction));
                if let Err(err) = &result {
                    tracing::error!(unit = %key, error = %err, "unit failed");
                }
                UnitOutcome {
                    key: key.clone(),
                    raw,
                    result,
                }
            })
            .collect()
    };

    match threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| AppError::new(4, format!("Failed to build worker pool: {e}")))?;
            Ok(pool.install(work))
        }
        None => Ok(work()),
    }
}

/// Run one unit's work, turning a panic into an error for that unit only.
pub fn isolate_unit<F>(key: &SeriesKey, work: F) -> Result<CorrectedUnit, AppError>
where
    F: FnOnce() -> CorrectedUnit + std::panic::UnwindSafe,
{
    std::panic::catch_unwind(work).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        AppError::new(4, format!("Processing {key} failed: {reason}"))
    })
}

/// Correct, verify and summarize one unit.
pub fn process_unit(
    key: &SeriesKey,
    readings: &[RawReading],
    correction: &CorrectionConfig,
) -> CorrectedUnit {
    let output = correct_series(readings, correction);

    for e in &output.events {
        tracing::info!(
            unit = %key,
            period = %e.period,
            mom_implied = e.mom_implied,
            yoy_implied = e.yoy_implied,
            chosen = e.chosen,
            delta = e.delta,
            "cross-validation correction"
        );
    }

    let checks = verify_series(&output.points);
    let statistics = compute_statistics(&output.points, &checks, &output.events, correction.base_value);
    let basic = basic_chain(readings, correction.base_value);

    CorrectedUnit {
        series: CitySeries {
            key: key.clone(),
            points: output.points,
        },
        events: output.events,
        basic,
        checks,
        statistics,
    }
}

/// Convert a unit outcome into its published city entry.
pub fn city_entry(outcome: &UnitOutcome) -> CityEntry {
    let raw_data: Vec<RawPoint> = outcome.raw.iter().map(RawPoint::from).collect();
    let time_range = match (outcome.raw.first(), outcome.raw.last()) {
        (Some(first), Some(last)) => Some(TimeRange {
            start: first.period,
            end: last.period,
        }),
        _ => None,
    };

    let mut entry = CityEntry {
        city: outcome.key.city.clone(),
        status: CityStatus::NoData,
        data_count: outcome.raw.len(),
        time_range,
        raw_data,
        basic_result: Vec::new(),
        corrected_result: Vec::new(),
        corrections: Vec::new(),
        statistics: None,
        error_message: None,
    };

    match &outcome.result {
        Ok(unit) if unit.series.points.is_empty() => {}
        Ok(unit) => {
            entry.status = CityStatus::Success;
            entry.basic_result = unit.basic.clone();
            entry.corrected_result = unit
                .series
                .points
                .iter()
                .zip(&unit.checks)
                .map(|(point, check)| PublishedPoint {
                    point: point.clone(),
                    check: check.clone(),
                })
                .collect();
            entry.corrections = unit.events.clone();
            entry.statistics = unit.statistics.clone();
        }
        Err(err) => {
            entry.status = CityStatus::Error;
            entry.error_message = Some(err.to_string());
        }
    }

    entry
}

/// Write every indicator file plus the summary report. Returns the written paths.
pub fn publish(run: &RunOutput, output_dir: &std::path::Path) -> Result<Vec<PathBuf>, AppError> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to create output directory '{}': {e}", output_dir.display()),
        )
    })?;

    let mut written = Vec::with_capacity(run.files.len() + 1);
    for (indicator, file) in &run.files {
        let path = write_indicator_file(output_dir, *indicator, file)?;
        tracing::info!(
            file = %path.display(),
            success = file.success_count,
            no_data = file.no_data_count,
            error = file.error_count,
            "wrote indicator file"
        );
        written.push(path);
    }

    let indicators: Vec<Indicator> = run.files.iter().map(|(i, _)| *i).collect();
    let summary = build_summary(output_dir, &indicators, &run.cities, run.generated_at);
    written.push(write_summary(output_dir, &summary)?);

    Ok(written)
}

fn select_cities(merged: &MergeOutput, requested: &[String]) -> Vec<String> {
    let mut cities = merged.cities();
    if !requested.is_empty() {
        for city in requested {
            if !cities.contains(city) {
                tracing::warn!(%city, "requested city has no readings in any indicator");
            }
        }
        cities.retain(|c| requested.contains(c));
    }
    cities
}

fn validate_correction_config(config: &CorrectionConfig) -> Result<(), AppError> {
    if !(config.base_value.is_finite() && config.base_value > 0.0) {
        return Err(AppError::new(2, "Base value must be finite and > 0."));
    }
    if !(config.tolerance.is_finite() && config.tolerance >= 0.0) {
        return Err(AppError::new(2, "Tolerance must be finite and >= 0."));
    }
    Ok(())
}

fn log_ingest(loaded: &LoadedBatches) {
    for e in &loaded.record_errors {
        tracing::warn!(source = %e.source, location = %e.location, message = %e.message, "rejected record");
    }
    tracing::info!(
        batches = loaded.batches.len(),
        skipped_files = loaded.skipped_files.len(),
        records_read = loaded.records_read,
        records_used = loaded.records_used,
        "ingest complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Period, RawBatch};
    use chrono::NaiveDate;

    fn batch(source: &str, day: u32, readings: Vec<RawReading>) -> RawBatch {
        RawBatch {
            source: source.to_string(),
            collected_at: NaiveDate::from_ymd_opt(2022, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            readings,
        }
    }

    fn reading(city: &str, indicator: Indicator, period: &str, mom: f64, yoy: Option<f64>) -> RawReading {
        RawReading {
            city: city.to_string(),
            indicator,
            period: Period::parse(period).unwrap(),
            month_on_month: Some(mom),
            year_on_year: yoy,
        }
    }

    fn config(indicators: Vec<Indicator>) -> RunConfig {
        RunConfig {
            data_dir: PathBuf::from("unused"),
            output_dir: PathBuf::from("unused"),
            correction: CorrectionConfig::default(),
            indicators,
            cities: Vec::new(),
            threads: Some(2),
        }
    }

    fn loaded(batches: Vec<RawBatch>) -> LoadedBatches {
        LoadedBatches {
            batches,
            ..LoadedBatches::default()
        }
    }

    #[test]
    fn cities_missing_from_an_indicator_are_no_data() {
        let b = batch(
            "a.csv",
            1,
            vec![
                reading("北京", Indicator::NewHouseBasic, "2021-01", 100.0, None),
                reading("北京", Indicator::NewHouseBasic, "2021-02", 100.4, None),
                reading("上海", Indicator::UsedHouseBasic, "2021-01", 100.0, None),
            ],
        );

        let run = run_with_batches(
            &config(vec![Indicator::NewHouseBasic, Indicator::UsedHouseBasic]),
            loaded(vec![b]),
        )
        .unwrap();

        assert_eq!(run.cities, vec!["上海".to_string(), "北京".to_string()]);
        let new_house = run.file(Indicator::NewHouseBasic).unwrap();
        assert_eq!(new_house.total_cities, 2);
        assert_eq!(new_house.success_count, 1);
        assert_eq!(new_house.no_data_count, 1);

        let beijing = new_house.cities.iter().find(|c| c.city == "北京").unwrap();
        assert_eq!(beijing.status, CityStatus::Success);
        assert_eq!(beijing.data_count, 2);
        assert_eq!(beijing.time_range.unwrap().end.to_string(), "2021-02");
        assert!((beijing.corrected_result[1].point.actual_value - 100.4).abs() < 1e-12);

        let shanghai = new_house.cities.iter().find(|c| c.city == "上海").unwrap();
        assert_eq!(shanghai.status, CityStatus::NoData);
        assert!(shanghai.corrected_result.is_empty());
        assert!(shanghai.time_range.is_none());
    }

    #[test]
    fn city_filter_and_invalid_tolerance() {
        let b = batch(
            "a.csv",
            1,
            vec![
                reading("北京", Indicator::NewHouseBasic, "2021-01", 100.0, None),
                reading("上海", Indicator::NewHouseBasic, "2021-01", 100.0, None),
            ],
        );

        let mut cfg = config(vec![Indicator::NewHouseBasic]);
        cfg.cities = vec!["北京".to_string()];
        let run = run_with_batches(&cfg, loaded(vec![b.clone()])).unwrap();
        assert_eq!(run.cities, vec!["北京".to_string()]);

        cfg.correction.tolerance = -1.0;
        let err = run_with_batches(&cfg, loaded(vec![b])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unit_outcomes_follow_key_order() {
        let b = batch(
            "a.csv",
            1,
            (1..=9)
                .map(|m| reading(&format!("城市{m}"), Indicator::NewHouseBasic, "2021-01", 100.0, None))
                .collect(),
        );
        let merged = merge_batches(&[b]);
        let keys: Vec<SeriesKey> = merged.series.keys().rev().cloned().collect();
        let outcomes = correct_units(&merged, &keys, &CorrectionConfig::default(), Some(3)).unwrap();
        let order: Vec<&SeriesKey> = outcomes.iter().map(|o| &o.key).collect();
        assert_eq!(order, keys.iter().collect::<Vec<_>>());
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[test]
    fn panicking_unit_is_isolated() {
        let key = SeriesKey {
            indicator: Indicator::UsedHouseBasic,
            city: "西安".to_string(),
        };
        let err = isolate_unit(&key, || panic!("bad series")).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("西安/used_house_basic"));
        assert!(err.to_string().contains("bad series"));

        let readings = vec![reading("西安", Indicator::UsedHouseBasic, "2021-01", 100.0, None)];
        let ok = isolate_unit(&key, || process_unit(&key, &readings, &CorrectionConfig::default())).unwrap();
        assert_eq!(ok.series.points.len(), 1);
    }

    #[test]
    fn failed_unit_becomes_error_entry() {
        let outcome = UnitOutcome {
            key: SeriesKey {
                indicator: Indicator::NewHouseBasic,
                city: "北京".to_string(),
            },
            raw: vec![reading("北京", Indicator::NewHouseBasic, "2021-01", 100.0, None)],
            result: Err(AppError::new(4, "boom")),
        };
        let entry = city_entry(&outcome);
        assert_eq!(entry.status, CityStatus::Error);
        assert_eq!(entry.error_message.as_deref(), Some("boom"));
        assert_eq!(entry.data_count, 1);
    }
}
