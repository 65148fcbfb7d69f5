//! Consistency checks and summary statistics for a corrected series.
//!
//! The statistics bureau publishes MoM and YoY rounded to one decimal, so a
//! published value "matches" its raw reading when the ratio recomputed from
//! the published index rounds to the same figure.

use crate::correct::engine::YOY_LAG;
use crate::domain::{CorrectedPoint, CorrectionEvent, PointCheck, PointStatus, SeriesStatistics};

/// Rounded-ratio difference below which a raw reading counts as matched.
const MATCH_EPS: f64 = 0.05;

/// Recompute MoM/YoY from the published values and compare them to the raw readings.
///
/// Ratios are only recomputed against periods at or after the anchor; pinned
/// pre-anchor placeholders are not a meaningful base.
pub fn verify_series(points: &[CorrectedPoint]) -> Vec<PointCheck> {
    let anchor_idx = points.iter().position(|p| p.status == PointStatus::Anchor);

    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let base_at = |lag: usize| -> Option<f64> {
                let j = i.checked_sub(lag)?;
                let anchor_idx = anchor_idx?;
                if j < anchor_idx {
                    return None;
                }
                ratio(p.actual_value, points[j].actual_value)
            };

            let calculated_mom = base_at(1);
            let calculated_yoy = base_at(YOY_LAG);

            let (mom_error, mom_match) = compare(calculated_mom, p.month_on_month);
            let (yoy_error, yoy_match) = compare(calculated_yoy, p.year_on_year);

            PointCheck {
                calculated_mom,
                calculated_yoy,
                mom_error,
                yoy_error,
                mom_match,
                yoy_match,
            }
        })
        .collect()
}

/// Summary statistics for one city; `None` for an empty series.
pub fn compute_statistics(
    points: &[CorrectedPoint],
    checks: &[PointCheck],
    events: &[CorrectionEvent],
    base_value: f64,
) -> Option<SeriesStatistics> {
    let final_value = points.last()?.actual_value;
    let max_value = points.iter().map(|p| p.actual_value).fold(f64::NEG_INFINITY, f64::max);
    let min_value = points.iter().map(|p| p.actual_value).fold(f64::INFINITY, f64::min);

    let total_growth_percent = if base_value != 0.0 {
        (final_value - base_value) / base_value * 100.0
    } else {
        0.0
    };

    let mom_errors: Vec<f64> = checks.iter().filter_map(|c| c.mom_error).collect();
    let yoy_errors: Vec<f64> = checks.iter().filter_map(|c| c.yoy_error).collect();
    let mom_matched = checks.iter().filter(|c| c.mom_error.is_some() && c.mom_match).count();
    let yoy_matched = checks.iter().filter(|c| c.yoy_error.is_some() && c.yoy_match).count();

    Some(SeriesStatistics {
        final_value,
        max_value,
        min_value,
        total_growth_percent,
        mom_match_rate: rate(mom_matched, mom_errors.len()),
        yoy_match_rate: rate(yoy_matched, yoy_errors.len()),
        mom_matches: format!("{mom_matched}/{}", mom_errors.len()),
        yoy_matches: format!("{yoy_matched}/{}", yoy_errors.len()),
        avg_mom_error: mean(&mom_errors),
        avg_yoy_error: mean(&yoy_errors),
        corrections: events.len(),
        carried_forward: points
            .iter()
            .filter(|p| p.status == PointStatus::CarriedForward)
            .count(),
        unresolved: points.iter().filter(|p| p.status == PointStatus::Unresolved).count(),
    })
}

fn ratio(current: f64, base: f64) -> Option<f64> {
    if base == 0.0 || !base.is_finite() {
        return None;
    }
    Some(current / base * 100.0).filter(|v| v.is_finite())
}

fn compare(calculated: Option<f64>, raw: Option<f64>) -> (Option<f64>, bool) {
    match (calculated, raw) {
        (Some(c), Some(r)) => {
            let rounded = (c * 10.0).round() / 10.0;
            (Some((c - r).abs()), (rounded - r).abs() < MATCH_EPS)
        }
        _ => (None, true),
    }
}

fn rate(matched: usize, checked: usize) -> f64 {
    if checked == 0 {
        0.0
    } else {
        matched as f64 / checked as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correct::engine::correct_series;
    use crate::domain::{CorrectionConfig, Indicator, Period, RawReading};

    fn readings(moms: &[f64], yoy_last: Option<f64>) -> Vec<RawReading> {
        let start = Period::new(2020, 1).unwrap();
        let mut out: Vec<RawReading> = moms
            .iter()
            .enumerate()
            .map(|(i, &m)| RawReading {
                city: "成都".to_string(),
                indicator: Indicator::UsedHouseBasic,
                period: start.offset(i as i64),
                month_on_month: Some(m),
                year_on_year: None,
            })
            .collect();
        if let Some(last) = out.last_mut() {
            last.year_on_year = yoy_last;
        }
        out
    }

    #[test]
    fn chained_values_match_their_own_mom() {
        let input = readings(&[100.0, 100.3, 99.6, 100.8], None);
        let out = correct_series(&input, &CorrectionConfig::default());
        let checks = verify_series(&out.points);

        // The anchor has no base to recompute against.
        assert_eq!(checks[0].calculated_mom, None);
        assert!(checks[0].mom_match);
        for c in &checks[1..] {
            assert!(c.mom_match);
            assert!(c.mom_error.unwrap() < 1e-9);
        }
    }

    #[test]
    fn corrected_month_reports_mom_mismatch_and_yoy_match() {
        let mut moms = vec![100.0; 12];
        moms.push(100.0);
        let input = readings(&moms, Some(103.0));
        let out = correct_series(&input, &CorrectionConfig::default());
        let checks = verify_series(&out.points);

        let last = checks.last().unwrap();
        assert!((last.calculated_yoy.unwrap() - 103.0).abs() < 1e-9);
        assert!(last.yoy_match);
        assert!(!last.mom_match);

        let stats = compute_statistics(&out.points, &checks, &out.events, 100.0).unwrap();
        assert_eq!(stats.corrections, 1);
        assert_eq!(stats.yoy_matches, "1/1");
        assert_eq!(stats.mom_matches, "11/12");
        assert!((stats.final_value - 103.0).abs() < 1e-9);
        assert!((stats.total_growth_percent - 3.0).abs() < 1e-9);
        assert_eq!(stats.min_value, 100.0);
    }

    #[test]
    fn empty_series_has_no_statistics() {
        assert!(compute_statistics(&[], &[], &[], 100.0).is_none());
    }
}
