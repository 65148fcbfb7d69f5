//! MoM/YoY reconciliation for a single (city, indicator) series.
//!
//! Given merged raw readings we build one chained index:
//!
//! - the earliest period with a MoM reading is the anchor (`base_value`)
//! - each later month is `previous * mom / 100`
//! - when the month 12 periods back is established and a YoY reading exists,
//!   the chained value is cross-checked against `value[t-12] * yoy / 100`
//! - beyond `tolerance` the YoY-implied value wins; since every later month is
//!   chained from its predecessor, the revision propagates forward
//!
//! The walk is a single ascending pass: when period `t` is visited every value
//! it depends on (`t-1`, `t-12`) is already final, so a correction at `t` is
//! equivalent to re-chaining all later months from the new base.
//!
//! Nothing here fails. Bad ratios degrade to `Unresolved`, gaps to
//! `CarriedForward`, and a series without readings to an empty output.

use std::collections::BTreeMap;

use crate::domain::{
    BasicPoint, CorrectedPoint, CorrectionConfig, CorrectionEvent, Period, PointStatus, RawReading,
};

/// Months between a period and the one its YoY reading compares against.
pub const YOY_LAG: usize = 12;

/// Corrected series + audit log of the corrections made.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CorrectionOutput {
    pub points: Vec<CorrectedPoint>,
    pub events: Vec<CorrectionEvent>,
}

/// Reconcile one unit's readings into a contiguous chained index.
///
/// `readings` should be the merger's output (sorted, one per period); if a
/// period repeats, the last occurrence is used.
pub fn correct_series(readings: &[RawReading], config: &CorrectionConfig) -> CorrectionOutput {
    let by_period: BTreeMap<Period, &RawReading> = readings.iter().map(|r| (r.period, r)).collect();

    let (Some(&first), Some(&last)) = (by_period.keys().next(), by_period.keys().next_back()) else {
        return CorrectionOutput::default();
    };

    let anchor = by_period
        .values()
        .find(|r| r.month_on_month.is_some())
        .map(|r| r.period);

    let len = usize::try_from(last.months_since(first)).unwrap_or(0) + 1;
    let mut points: Vec<CorrectedPoint> = Vec::with_capacity(len);
    let mut events = Vec::new();

    for i in 0..len {
        let period = first.offset(i as i64);
        let reading = by_period.get(&period);
        let month_on_month = reading.and_then(|r| r.month_on_month);
        let year_on_year = reading.and_then(|r| r.year_on_year);

        let (actual_value, status) = match anchor {
            Some(anchor) if period == anchor => (config.base_value, PointStatus::Anchor),
            Some(anchor) if period > anchor => {
                // Anchor precedes `period`, so index `i - 1` exists.
                let previous = points[i - 1].actual_value;
                let yoy_implied = yoy_implied_value(&points, i, year_on_year, anchor);
                resolve_period(period, previous, month_on_month, yoy_implied, config, &mut events)
            }
            // Before the anchor (or no MoM at all): pinned at the base value.
            _ => (config.base_value, PointStatus::CarriedForward),
        };

        let growth_rate = match anchor {
            Some(anchor) if period > anchor => growth(points[i - 1].actual_value, actual_value),
            _ => None,
        };

        points.push(CorrectedPoint {
            period,
            actual_value,
            month_on_month,
            year_on_year,
            growth_rate,
            observed: status.is_observed(),
            status,
        });
    }

    CorrectionOutput { points, events }
}

/// Decide the value of one post-anchor period.
fn resolve_period(
    period: Period,
    previous: f64,
    month_on_month: Option<f64>,
    yoy_implied: Option<f64>,
    config: &CorrectionConfig,
    events: &mut Vec<CorrectionEvent>,
) -> (f64, PointStatus) {
    let Some(mom) = month_on_month else {
        return match yoy_implied {
            Some(value) => (value, PointStatus::YoyDerived),
            None => (previous, PointStatus::CarriedForward),
        };
    };

    // `previous` is always a usable value: unresolved months carry it unchanged.
    let chained = previous * mom / 100.0;
    if !usable(mom) || !usable(chained) {
        return (previous, PointStatus::Unresolved);
    }

    let Some(yoy_value) = yoy_implied else {
        return (chained, PointStatus::Chained);
    };

    let relative_delta = (yoy_value - chained).abs() / chained;
    if relative_delta <= config.tolerance {
        return (chained, PointStatus::Confirmed);
    }

    events.push(CorrectionEvent {
        period,
        mom_implied: chained,
        yoy_implied: yoy_value,
        chosen: yoy_value,
        delta: yoy_value - chained,
        relative_delta,
    });
    (yoy_value, PointStatus::Corrected)
}

/// `value[t-12] * yoy / 100`, if the base is established and the result usable.
///
/// Carried-forward months after the anchor are valid bases. Pinned months
/// before the anchor and unresolved months are not.
fn yoy_implied_value(
    points: &[CorrectedPoint],
    i: usize,
    year_on_year: Option<f64>,
    anchor: Period,
) -> Option<f64> {
    let yoy = year_on_year.filter(|y| usable(*y))?;
    let base = points.get(i.checked_sub(YOY_LAG)?)?;
    if base.period < anchor || base.status == PointStatus::Unresolved || !usable(base.actual_value) {
        return None;
    }
    Some(base.actual_value * yoy / 100.0).filter(|v| usable(*v))
}

/// Plain MoM chaining over the readings as given, without any cross-check.
///
/// The first reading is the base; readings without MoM (or with an unusable
/// one) repeat the previous value. Gaps between periods are not filled.
pub fn basic_chain(readings: &[RawReading], base_value: f64) -> Vec<BasicPoint> {
    let mut out: Vec<BasicPoint> = Vec::with_capacity(readings.len());

    for r in readings {
        let (actual_value, growth_rate) = match out.last() {
            None => (base_value, None),
            Some(prev) => {
                let chained = r
                    .month_on_month
                    .map(|m| prev.actual_value * m / 100.0)
                    .filter(|v| usable(*v))
                    .unwrap_or(prev.actual_value);
                (chained, growth(prev.actual_value, chained))
            }
        };

        out.push(BasicPoint {
            date: r.period,
            actual_value,
            month_on_month: r.month_on_month,
            year_on_year: r.year_on_year,
            growth_rate,
        });
    }

    out
}

fn growth(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() {
        return None;
    }
    Some((current - previous) / previous).filter(|g| g.is_finite())
}

fn usable(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Indicator;

    fn reading(period: &str, mom: Option<f64>, yoy: Option<f64>) -> RawReading {
        RawReading {
            city: "杭州".to_string(),
            indicator: Indicator::NewHouseBasic,
            period: Period::parse(period).unwrap(),
            month_on_month: mom,
            year_on_year: yoy,
        }
    }

    /// Monthly readings starting at `start`, one per entry of `moms`.
    fn monthly(start: &str, moms: &[f64]) -> Vec<RawReading> {
        let start = Period::parse(start).unwrap();
        moms.iter()
            .enumerate()
            .map(|(i, &m)| RawReading {
                city: "杭州".to_string(),
                indicator: Indicator::NewHouseBasic,
                period: start.offset(i as i64),
                month_on_month: Some(m),
                year_on_year: None,
            })
            .collect()
    }

    fn at<'a>(out: &'a CorrectionOutput, period: &str) -> &'a CorrectedPoint {
        let p = Period::parse(period).unwrap();
        out.points.iter().find(|x| x.period == p).unwrap()
    }

    #[test]
    fn empty_input_gives_empty_series() {
        let out = correct_series(&[], &CorrectionConfig::default());
        assert!(out.points.is_empty());
        assert!(out.events.is_empty());
    }

    #[test]
    fn chains_mom_from_anchor() {
        let readings = monthly("2020-11", &[101.0, 100.5, 99.0]);
        let out = correct_series(&readings, &CorrectionConfig::default());

        assert_eq!(out.points.len(), 3);
        let anchor = &out.points[0];
        assert_eq!(anchor.status, PointStatus::Anchor);
        assert_eq!(anchor.actual_value, 100.0);
        assert_eq!(anchor.growth_rate, None);

        assert!((out.points[1].actual_value - 100.5).abs() < 1e-12);
        assert!((out.points[2].actual_value - 100.5 * 0.99).abs() < 1e-12);
        assert!((out.points[1].growth_rate.unwrap() - 0.005).abs() < 1e-12);
        assert!(out.points.iter().all(|p| p.observed));
    }

    #[test]
    fn yoy_disagreement_beyond_tolerance_is_corrected() {
        // 2020-11 anchor, 2020-12 +0.5%, then flat until 2021-10, 2021-11 brings the
        // chain to ~102.0 while YoY says 103.0.
        let mut moms = vec![100.0, 100.5];
        moms.extend(std::iter::repeat_n(100.0, 10));
        moms.push(102.0 / 100.5 * 100.0);
        let mut readings = monthly("2020-11", &moms);
        readings[12].year_on_year = Some(103.0);

        let out = correct_series(&readings, &CorrectionConfig::default());
        assert!((at(&out, "2020-12").actual_value - 100.5).abs() < 1e-9);

        let nov = at(&out, "2021-11");
        assert_eq!(nov.status, PointStatus::Corrected);
        assert!((nov.actual_value - 103.0).abs() < 1e-9);

        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.period.to_string(), "2021-11");
        assert!((event.mom_implied - 102.0).abs() < 1e-9);
        assert!((event.yoy_implied - 103.0).abs() < 1e-9);
        assert_eq!(event.chosen, nov.actual_value);
        assert!(event.relative_delta > 0.0098 && event.relative_delta < 0.0099);
    }

    #[test]
    fn yoy_agreement_within_tolerance_keeps_chained_value() {
        let mut readings = monthly("2020-01", &[100.0; 13]);
        readings[12].month_on_month = Some(100.2);
        readings[12].year_on_year = Some(100.4);

        let out = correct_series(&readings, &CorrectionConfig::default());
        let last = out.points.last().unwrap();
        assert_eq!(last.status, PointStatus::Confirmed);
        assert!((last.actual_value - 100.2).abs() < 1e-12);
        assert!(out.events.is_empty());
    }

    #[test]
    fn correction_rebases_later_months() {
        let mut moms = vec![100.0; 13];
        moms.push(101.0);
        let mut readings = monthly("2020-01", &moms);
        readings[12].year_on_year = Some(105.0);

        let out = correct_series(&readings, &CorrectionConfig::default());
        let corrected = out.points[12].actual_value;
        assert!((corrected - 105.0).abs() < 1e-12);
        assert!((out.points[13].actual_value - corrected * 1.01).abs() < 1e-12);
        assert_eq!(out.points[13].status, PointStatus::Chained);
    }

    #[test]
    fn leading_yoy_only_months_are_pinned_and_unobserved() {
        let mut readings: Vec<RawReading> = (0..11)
            .map(|i| {
                let period = Period::new(2020, 1).unwrap().offset(i).to_string();
                reading(&period, None, Some(102.0))
            })
            .collect();
        readings.push(reading("2020-12", Some(100.3), Some(102.5)));
        readings.push(reading("2021-01", Some(100.4), Some(102.4)));

        let out = correct_series(&readings, &CorrectionConfig::default());
        assert_eq!(out.points.len(), 13);
        for p in &out.points[..11] {
            assert!(!p.observed);
            assert_eq!(p.status, PointStatus::CarriedForward);
            assert_eq!(p.actual_value, 100.0);
            assert_eq!(p.growth_rate, None);
        }
        assert_eq!(out.points[11].status, PointStatus::Anchor);
        // The YoY base for 2021-01 is a pinned (unobserved) month: no cross-check.
        assert_eq!(out.points[12].status, PointStatus::Chained);
        assert!((out.points[12].actual_value - 100.4).abs() < 1e-12);
    }

    #[test]
    fn gaps_are_carried_forward_and_marked() {
        let readings = vec![
            reading("2021-01", Some(100.0), None),
            reading("2021-02", Some(101.0), None),
            reading("2021-05", Some(102.0), None),
        ];

        let out = correct_series(&readings, &CorrectionConfig::default());
        assert_eq!(out.points.len(), 5);
        let march = at(&out, "2021-03");
        assert_eq!(march.status, PointStatus::CarriedForward);
        assert!(!march.observed);
        assert_eq!(march.actual_value, 101.0);
        assert_eq!(march.growth_rate, Some(0.0));
        assert!((at(&out, "2021-05").actual_value - 101.0 * 1.02).abs() < 1e-12);
    }

    #[test]
    fn carried_forward_month_is_a_valid_yoy_base() {
        // 2020-07 is missing, so it carries 100.0 forward; 2021-07 YoY says +10%.
        let mut readings = monthly("2020-01", &[100.0; 19]);
        readings.remove(6);
        let jul = readings
            .iter_mut()
            .find(|r| r.period.to_string() == "2021-07")
            .unwrap();
        jul.year_on_year = Some(110.0);

        let out = correct_series(&readings, &CorrectionConfig::default());
        let base = at(&out, "2020-07");
        assert_eq!(base.status, PointStatus::CarriedForward);
        assert!(!base.observed);

        let corrected = at(&out, "2021-07");
        assert_eq!(corrected.status, PointStatus::Corrected);
        assert!((corrected.actual_value - 110.0).abs() < 1e-9);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].period.to_string(), "2021-07");
    }

    #[test]
    fn unresolved_month_is_not_a_yoy_base() {
        let mut readings = monthly("2020-01", &[100.0; 14]);
        readings[1].month_on_month = Some(0.0);
        readings[13].year_on_year = Some(110.0);

        let out = correct_series(&readings, &CorrectionConfig::default());
        assert_eq!(out.points[1].status, PointStatus::Unresolved);
        assert_eq!(out.points[13].status, PointStatus::Chained);
        assert!(out.events.is_empty());
    }

    #[test]
    fn yoy_only_month_with_established_base_is_derived() {
        let mut readings = monthly("2020-01", &[100.0; 12]);
        readings.push(reading("2021-01", None, Some(104.0)));

        let out = correct_series(&readings, &CorrectionConfig::default());
        let jan = out.points.last().unwrap();
        assert_eq!(jan.status, PointStatus::YoyDerived);
        assert!(jan.observed);
        assert!((jan.actual_value - 104.0).abs() < 1e-12);
    }

    #[test]
    fn zero_ratio_is_unresolved_and_chain_restarts_from_last_good_value() {
        let readings = vec![
            reading("2021-01", Some(100.0), None),
            reading("2021-02", Some(102.0), None),
            reading("2021-03", Some(0.0), None),
            reading("2021-04", Some(101.0), None),
        ];

        let out = correct_series(&readings, &CorrectionConfig::default());
        let march = at(&out, "2021-03");
        assert_eq!(march.status, PointStatus::Unresolved);
        assert!(!march.observed);
        assert_eq!(march.actual_value, 102.0);
        assert!((at(&out, "2021-04").actual_value - 102.0 * 1.01).abs() < 1e-12);
    }

    #[test]
    fn yoy_only_series_without_any_mom_is_all_pinned() {
        let readings = vec![
            reading("2021-01", None, Some(101.0)),
            reading("2021-02", None, Some(101.5)),
        ];
        let out = correct_series(&readings, &CorrectionConfig::default());
        assert_eq!(out.points.len(), 2);
        assert!(out.points.iter().all(|p| !p.observed && p.actual_value == 100.0));
    }

    #[test]
    fn rerun_is_bit_identical() {
        let mut readings = monthly(
            "2019-06",
            &[
                100.3, 99.7, 100.9, 101.1, 100.0, 99.2, 100.4, 100.6, 99.9, 100.1, 100.2, 100.8, 101.3, 99.5,
            ],
        );
        readings[12].year_on_year = Some(104.2);
        readings[13].year_on_year = Some(97.0);

        let config = CorrectionConfig::default();
        let a = correct_series(&readings, &config);
        let b = correct_series(&readings, &config);
        assert_eq!(a, b);
        for (x, y) in a.points.iter().zip(&b.points) {
            assert_eq!(x.actual_value.to_bits(), y.actual_value.to_bits());
        }
    }

    #[test]
    fn uncorrected_points_satisfy_the_mom_identity() {
        let mut readings = monthly(
            "2019-01",
            &[
                100.3, 99.7, 100.9, 101.1, 100.0, 99.2, 100.4, 100.6, 99.9, 100.1, 100.2, 100.8, 101.3, 99.5,
                100.7,
            ],
        );
        readings[12].year_on_year = Some(110.0);
        readings[13].year_on_year = Some(109.5);

        let out = correct_series(&readings, &CorrectionConfig::default());
        for w in out.points.windows(2) {
            let (prev, cur) = (&w[0], &w[1]);
            match cur.status {
                PointStatus::Chained | PointStatus::Confirmed => {
                    let expected = prev.actual_value * cur.month_on_month.unwrap() / 100.0;
                    assert!((cur.actual_value - expected).abs() < 1e-12);
                }
                PointStatus::Corrected => {
                    assert!(
                        out.events
                            .iter()
                            .any(|e| e.period == cur.period && e.chosen == cur.actual_value)
                    );
                }
                _ => {}
            }
        }
    }

    #[test]
    fn basic_chain_ignores_yoy() {
        let mut readings = monthly("2020-01", &[100.5, 101.0, 99.0]);
        readings[2].year_on_year = Some(150.0);
        let basic = basic_chain(&readings, 100.0);
        assert_eq!(basic.len(), 3);
        assert_eq!(basic[0].actual_value, 100.0);
        assert_eq!(basic[0].growth_rate, None);
        assert!((basic[2].actual_value - 101.0 * 0.99).abs() < 1e-12);
    }
}
