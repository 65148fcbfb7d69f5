//! Series merger.
//!
//! Scrapes overlap: a later release republishes months that an earlier one
//! already carried, sometimes with revised figures. This module folds every
//! batch into one reading per (city, indicator, period).
//!
//! Rules:
//! - batches are applied in `(collected_at, source, contents)` order, so the
//!   result does not depend on the order batches were loaded in
//! - merge is field-wise: a later batch only overrides the fields it actually has
//! - a differing value is a `MergeConflict` (kept in the output, never fatal)

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{Period, RawBatch, RawReading, SeriesKey};

/// Which reading field a conflict was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingField {
    MonthOnMonth,
    YearOnYear,
}

impl fmt::Display for ReadingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingField::MonthOnMonth => write!(f, "month_on_month"),
            ReadingField::YearOnYear => write!(f, "year_on_year"),
        }
    }
}

/// Two batches disagreed on a value; `kept` is from the later batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub key: SeriesKey,
    pub period: Period,
    pub field: ReadingField,
    pub kept: f64,
    pub kept_source: String,
    pub discarded: f64,
    pub discarded_source: String,
}

/// Merge output: deduplicated, period-ordered readings per unit + conflicts.
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub series: BTreeMap<SeriesKey, Vec<RawReading>>,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeOutput {
    /// Merged readings for one unit (empty if the unit never appeared).
    pub fn readings(&self, key: &SeriesKey) -> &[RawReading] {
        self.series.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every city seen in any indicator, sorted.
    pub fn cities(&self) -> Vec<String> {
        let mut cities: Vec<String> = self.series.keys().map(|k| k.city.clone()).collect();
        cities.sort();
        cities.dedup();
        cities
    }
}

#[derive(Debug, Clone)]
struct Slot<'a> {
    month_on_month: Option<(f64, &'a str)>,
    year_on_year: Option<(f64, &'a str)>,
}

/// Merge raw batches into one series per (city, indicator).
pub fn merge_batches(batches: &[RawBatch]) -> MergeOutput {
    let mut ordered: Vec<&RawBatch> = batches.iter().collect();
    ordered.sort_by(|a, b| {
        a.collected_at
            .cmp(&b.collected_at)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| cmp_contents(a, b))
    });

    let mut slots: BTreeMap<SeriesKey, BTreeMap<Period, Slot<'_>>> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for batch in ordered {
        for reading in &batch.readings {
            let key = reading.key();
            let slot = slots
                .entry(key.clone())
                .or_default()
                .entry(reading.period)
                .or_insert(Slot {
                    month_on_month: None,
                    year_on_year: None,
                });

            apply_field(
                &mut slot.month_on_month,
                reading.month_on_month,
                &batch.source,
                &key,
                reading.period,
                ReadingField::MonthOnMonth,
                &mut conflicts,
            );
            apply_field(
                &mut slot.year_on_year,
                reading.year_on_year,
                &batch.source,
                &key,
                reading.period,
                ReadingField::YearOnYear,
                &mut conflicts,
            );
        }
    }

    let series = slots
        .into_iter()
        .map(|(key, periods)| {
            let readings = periods
                .into_iter()
                .map(|(period, slot)| RawReading {
                    city: key.city.clone(),
                    indicator: key.indicator,
                    period,
                    month_on_month: slot.month_on_month.map(|(v, _)| v),
                    year_on_year: slot.year_on_year.map(|(v, _)| v),
                })
                .collect();
            (key, readings)
        })
        .collect();

    MergeOutput { series, conflicts }
}

/// Last-resort ordering for batches sharing both timestamp and source.
fn cmp_contents(a: &RawBatch, b: &RawBatch) -> Ordering {
    a.readings
        .iter()
        .zip(&b.readings)
        .map(|(x, y)| cmp_reading(x, y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.readings.len().cmp(&b.readings.len()))
}

fn cmp_reading(x: &RawReading, y: &RawReading) -> Ordering {
    (&x.city, x.indicator, x.period)
        .cmp(&(&y.city, y.indicator, y.period))
        .then_with(|| cmp_value(x.month_on_month, y.month_on_month))
        .then_with(|| cmp_value(x.year_on_year, y.year_on_year))
}

fn cmp_value(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        _ => a.is_some().cmp(&b.is_some()),
    }
}

fn apply_field<'a>(
    current: &mut Option<(f64, &'a str)>,
    incoming: Option<f64>,
    source: &'a str,
    key: &SeriesKey,
    period: Period,
    field: ReadingField,
    conflicts: &mut Vec<MergeConflict>,
) {
    let Some(value) = incoming else { return };

    if let Some((previous, previous_source)) = *current {
        if previous != value {
            conflicts.push(MergeConflict {
                key: key.clone(),
                period,
                field,
                kept: value,
                kept_source: source.to_string(),
                discarded: previous,
                discarded_source: previous_source.to_string(),
            });
        }
    }

    *current = Some((value, source));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Indicator;
    use chrono::NaiveDate;

    fn reading(city: &str, period: &str, mom: Option<f64>, yoy: Option<f64>) -> RawReading {
        RawReading {
            city: city.to_string(),
            indicator: Indicator::NewHouseBasic,
            period: Period::parse(period).unwrap(),
            month_on_month: mom,
            year_on_year: yoy,
        }
    }

    fn batch(source: &str, day: u32, readings: Vec<RawReading>) -> RawBatch {
        RawBatch {
            source: source.to_string(),
            collected_at: NaiveDate::from_ymd_opt(2021, 6, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            readings,
        }
    }

    fn key(city: &str) -> SeriesKey {
        SeriesKey {
            indicator: Indicator::NewHouseBasic,
            city: city.to_string(),
        }
    }

    #[test]
    fn latest_batch_wins_and_conflict_is_recorded() {
        let early = batch("a.csv", 1, vec![reading("北京", "2021-03", Some(100.4), Some(104.0))]);
        let late = batch("b.csv", 15, vec![reading("北京", "2021-03", Some(100.5), Some(104.0))]);

        let out = merge_batches(&[early, late]);
        let merged = out.readings(&key("北京"));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].month_on_month, Some(100.5));

        // Only the differing field is a conflict.
        assert_eq!(out.conflicts.len(), 1);
        let c = &out.conflicts[0];
        assert_eq!(c.field, ReadingField::MonthOnMonth);
        assert_eq!(c.kept_source, "b.csv");
        assert_eq!(c.discarded, 100.4);
    }

    #[test]
    fn merge_is_independent_of_batch_order() {
        let early = batch(
            "a.csv",
            1,
            vec![
                reading("上海", "2021-01", Some(100.1), None),
                reading("上海", "2021-02", Some(99.8), Some(103.2)),
            ],
        );
        let late = batch("b.csv", 20, vec![reading("上海", "2021-02", Some(100.2), Some(103.3))]);

        let forward = merge_batches(&[early.clone(), late.clone()]);
        let backward = merge_batches(&[late, early]);
        assert_eq!(forward.series, backward.series);
        assert_eq!(forward.conflicts, backward.conflicts);
        assert_eq!(forward.readings(&key("上海"))[1].month_on_month, Some(100.2));
    }

    #[test]
    fn identical_timestamp_and_source_still_merge_deterministically() {
        let first = batch("dup.csv", 5, vec![reading("武汉", "2021-03", Some(100.4), None)]);
        let second = batch("dup.csv", 5, vec![reading("武汉", "2021-03", Some(100.6), None)]);

        let forward = merge_batches(&[first.clone(), second.clone()]);
        let backward = merge_batches(&[second, first]);
        assert_eq!(forward.series, backward.series);
        assert_eq!(forward.conflicts, backward.conflicts);
        assert_eq!(forward.readings(&key("武汉"))[0].month_on_month, Some(100.6));
    }

    #[test]
    fn absent_fields_do_not_erase_earlier_values() {
        let early = batch("a.csv", 1, vec![reading("广州", "2021-04", Some(100.3), Some(102.0))]);
        let late = batch("b.csv", 2, vec![reading("广州", "2021-04", None, Some(102.0))]);

        let out = merge_batches(&[early, late]);
        let r = &out.readings(&key("广州"))[0];
        assert_eq!(r.month_on_month, Some(100.3));
        assert_eq!(r.year_on_year, Some(102.0));
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn single_field_periods_keep_the_other_field_absent() {
        let only = batch(
            "a.csv",
            1,
            vec![
                reading("深圳", "2021-02", None, Some(105.0)),
                reading("深圳", "2021-01", Some(100.2), None),
            ],
        );

        let out = merge_batches(&[only]);
        let merged = out.readings(&key("深圳"));
        assert_eq!(merged[0].period.to_string(), "2021-01");
        assert_eq!(merged[0].year_on_year, None);
        assert_eq!(merged[1].month_on_month, None);
        assert_eq!(out.cities(), vec!["深圳".to_string()]);
    }
}
