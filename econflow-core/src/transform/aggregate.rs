//! Standardized → aggregated.
//!
//! Attaches period-over-period change, year-over-year change and trailing
//! window statistics to every record. Value and unit pass through untouched.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::align::{join_series, GapPolicy, JoinedPanel};
use crate::domain::{DerivedMetrics, IndicatorRecord, Layer};

/// Months between a record and the one its `yoy_change` compares against.
pub const YOY_MONTHS: u32 = 12;

/// How pending (null) observations take part in derived metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// Pending periods get null metrics and are skipped when forming
    /// windows and previous values.
    #[default]
    SkipPending,
    /// Any null in the window (or as the previous value) nulls the metric.
    Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateOptions {
    pub window: usize,
    pub null_policy: NullPolicy,
    pub gap_policy: GapPolicy,
    /// Build a joined panel when two or more series are aggregated together.
    pub join: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            window: 3,
            null_policy: NullPolicy::default(),
            gap_policy: GapPolicy::default(),
            join: false,
        }
    }
}

impl AggregateOptions {
    /// History the metrics of a range's first records depend on.
    pub fn lookback(&self) -> Lookback {
        Lookback {
            periods: self.window.saturating_sub(1).max(1),
            skip_pending: self.null_policy == NullPolicy::SkipPending,
        }
    }
}

/// Earlier records needed to aggregate a range exactly as the whole series
/// would be aggregated.
///
/// Window and previous-value metrics need `periods` earlier records (only
/// published ones count when pending values are skipped); `yoy_change`
/// needs the twelve months before the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookback {
    pub periods: usize,
    pub skip_pending: bool,
}

impl Lookback {
    /// Whether `history`, records dated before `start`, is enough.
    pub fn is_covered(&self, history: &[IndicatorRecord], start: NaiveDate) -> bool {
        let counted = history
            .iter()
            .filter(|r| !self.skip_pending || r.value.is_some())
            .count();
        let year_back = start.checked_sub_months(Months::new(YOY_MONTHS));
        let reaches_year = match (history.iter().map(|r| r.reference_date).min(), year_back) {
            (Some(earliest), Some(year_back)) => earliest <= year_back,
            _ => false,
        };
        counted >= self.periods && reaches_year
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOutput {
    /// Aggregated records, one vector per input series, in input order.
    pub series: Vec<Vec<IndicatorRecord>>,
    pub panel: Option<JoinedPanel>,
}

pub fn aggregate(series: &[Vec<IndicatorRecord>], opts: &AggregateOptions) -> AggregateOutput {
    let aggregated: Vec<Vec<IndicatorRecord>> = series
        .iter()
        .map(|s| aggregate_series(s, opts))
        .collect();
    let panel = (opts.join && series.len() >= 2).then(|| build_panel(&aggregated, opts.gap_policy));
    AggregateOutput {
        series: aggregated,
        panel,
    }
}

/// Joined panel of aggregated series, plus the real interest rate column
/// when both `bcb.selic` and `bcb.ipca` are in it.
pub fn build_panel(series: &[Vec<IndicatorRecord>], gap: GapPolicy) -> JoinedPanel {
    let mut panel = join_series(series, gap);
    panel.add_real_interest_rate();
    panel
}

/// Derived metrics for one series. Input order does not matter.
pub fn aggregate_series(records: &[IndicatorRecord], opts: &AggregateOptions) -> Vec<IndicatorRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.reference_date);

    let values: Vec<Option<f64>> = sorted.iter().map(|r| r.value).collect();
    let metrics = match opts.null_policy {
        NullPolicy::SkipPending => metrics_skip_pending(&values, opts.window),
        NullPolicy::Propagate => metrics_propagate(&values, opts.window),
    };
    let yoy = year_over_year(&sorted);

    sorted
        .into_iter()
        .zip(metrics)
        .zip(yoy)
        .map(|((mut r, mut derived), yoy_change)| {
            derived.yoy_change = yoy_change;
            r.layer = Layer::Aggregated;
            r.derived = derived;
            r
        })
        .collect()
}

/// Change against the record dated exactly [`YOY_MONTHS`] earlier. Null
/// when either side is pending or absent.
fn year_over_year(sorted: &[IndicatorRecord]) -> Vec<Option<f64>> {
    let by_date: BTreeMap<NaiveDate, Option<f64>> =
        sorted.iter().map(|r| (r.reference_date, r.value)).collect();
    sorted
        .iter()
        .map(|r| {
            let cur = r.value?;
            let earlier = r.reference_date.checked_sub_months(Months::new(YOY_MONTHS))?;
            let prev = (*by_date.get(&earlier)?)?;
            pct_change(prev, cur)
        })
        .collect()
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

pub(crate) fn pct_change(prev: f64, cur: f64) -> Option<f64> {
    if prev == 0.0 {
        return None;
    }
    finite((cur - prev) / prev * 100.0)
}

/// Mean and sample variance of a full window.
pub(crate) fn window_stats(window: &[f64]) -> (Option<f64>, Option<f64>) {
    let n = window.len();
    if n == 0 {
        return (None, None);
    }
    let mean = window.iter().sum::<f64>() / n as f64;
    let variance = if n >= 2 {
        let ss: f64 = window.iter().map(|x| (x - mean).powi(2)).sum();
        finite(ss / (n - 1) as f64)
    } else {
        None
    };
    (finite(mean), variance)
}

fn metrics_skip_pending(values: &[Option<f64>], window: usize) -> Vec<DerivedMetrics> {
    let mut prev: Option<f64> = None;
    let mut buf: VecDeque<f64> = VecDeque::with_capacity(window + 1);
    values
        .iter()
        .map(|value| {
            let Some(v) = *value else {
                return DerivedMetrics::default();
            };
            let pct = prev.and_then(|p| pct_change(p, v));
            prev = Some(v);

            buf.push_back(v);
            if buf.len() > window {
                buf.pop_front();
            }
            let (mean, variance) = if window > 0 && buf.len() == window {
                window_stats(buf.make_contiguous())
            } else {
                (None, None)
            };
            DerivedMetrics {
                pct_change: pct,
                rolling_mean: mean,
                rolling_variance: variance,
                ..DerivedMetrics::default()
            }
        })
        .collect()
}

fn metrics_propagate(values: &[Option<f64>], window: usize) -> Vec<DerivedMetrics> {
    (0..values.len())
        .map(|i| {
            let pct = match (i.checked_sub(1).and_then(|p| values[p]), values[i]) {
                (Some(p), Some(v)) => pct_change(p, v),
                _ => None,
            };
            let (mean, variance) = if window > 0 && i + 1 >= window {
                let slice = &values[i + 1 - window..=i];
                match slice.iter().copied().collect::<Option<Vec<f64>>>() {
                    Some(full) => window_stats(&full),
                    None => (None, None),
                }
            } else {
                (None, None)
            };
            DerivedMetrics {
                pct_change: pct,
                rolling_mean: mean,
                rolling_variance: variance,
                ..DerivedMetrics::default()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceId, Unit};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn series(values: &[Option<f64>]) -> Vec<IndicatorRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut r = IndicatorRecord::raw(
                    SourceId::Bcb,
                    "selic",
                    NaiveDate::from_ymd_opt(2024, i as u32 + 1, 1).unwrap(),
                    *v,
                    Unit::Percent,
                    Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
                );
                r.layer = Layer::Standardized;
                r
            })
            .collect()
    }

    fn opts(window: usize, null_policy: NullPolicy) -> AggregateOptions {
        AggregateOptions {
            window,
            null_policy,
            ..AggregateOptions::default()
        }
    }

    #[test]
    fn pending_month_skipped_in_window() {
        let out = aggregate_series(
            &series(&[Some(5.0), None, Some(5.25)]),
            &opts(2, NullPolicy::SkipPending),
        );
        let means: Vec<_> = out.iter().map(|r| r.derived.rolling_mean).collect();
        assert_eq!(means, vec![None, None, Some(5.125)]);
        assert!((out[2].derived.pct_change.unwrap() - 5.0).abs() < 1e-12);
        assert!(out.iter().all(|r| r.layer == Layer::Aggregated));
        assert_eq!(out[1].value, None);
    }

    #[test]
    fn propagate_nulls_windows_with_gaps() {
        let out = aggregate_series(
            &series(&[Some(5.0), None, Some(5.25), Some(5.5)]),
            &opts(2, NullPolicy::Propagate),
        );
        let means: Vec<_> = out.iter().map(|r| r.derived.rolling_mean).collect();
        assert_eq!(means, vec![None, None, None, Some(5.375)]);
        assert_eq!(out[2].derived.pct_change, None);
    }

    #[test]
    fn sample_variance_needs_two_points() {
        let one = aggregate_series(&series(&[Some(1.0), Some(2.0)]), &opts(1, NullPolicy::SkipPending));
        assert!(one.iter().all(|r| r.derived.rolling_variance.is_none()));
        assert_eq!(one[1].derived.rolling_mean, Some(2.0));

        let three = aggregate_series(
            &series(&[Some(1.0), Some(2.0), Some(3.0)]),
            &opts(3, NullPolicy::SkipPending),
        );
        assert_eq!(three[2].derived.rolling_variance, Some(1.0));
        assert_eq!(three[2].derived.rolling_mean, Some(2.0));
    }

    #[test]
    fn change_from_zero_is_null() {
        let out = aggregate_series(&series(&[Some(0.0), Some(1.0)]), &opts(2, NullPolicy::SkipPending));
        assert_eq!(out[1].derived.pct_change, None);
    }

    #[test]
    fn input_order_irrelevant() {
        let mut input = series(&[Some(1.0), Some(2.0), Some(4.0)]);
        let a = aggregate_series(&input, &AggregateOptions::default());
        input.reverse();
        let b = aggregate_series(&input, &AggregateOptions::default());
        assert_eq!(a, b);
    }

    fn monthly(from: (i32, u32), values: &[Option<f64>]) -> Vec<IndicatorRecord> {
        let start = NaiveDate::from_ymd_opt(from.0, from.1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut r = IndicatorRecord::raw(
                    SourceId::Bcb,
                    "ipca",
                    start + Months::new(i as u32),
                    *v,
                    Unit::Percent,
                    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                );
                r.layer = Layer::Standardized;
                r
            })
            .collect()
    }

    #[test]
    fn year_over_year_compares_same_month() {
        let mut values = vec![Some(4.0); 12];
        values.extend([Some(5.0), None]);
        let out = aggregate_series(&monthly((2023, 1), &values), &AggregateOptions::default());
        assert!(out[..12].iter().all(|r| r.derived.yoy_change.is_none()));
        assert_eq!(out[12].derived.yoy_change, Some(25.0));
        // pending month has no change
        assert_eq!(out[13].derived.yoy_change, None);
    }

    #[test]
    fn year_over_year_needs_the_exact_month() {
        // March 2023 is absent, so March 2024 has nothing to compare against.
        let mut input = monthly((2023, 1), &[Some(1.0), Some(2.0)]);
        input.extend(monthly((2024, 2), &[Some(3.0), Some(4.0)]));
        let out = aggregate_series(&input, &AggregateOptions::default());
        assert_eq!(out[2].derived.yoy_change, Some(50.0));
        assert_eq!(out[3].derived.yoy_change, None);
    }

    #[test]
    fn lookback_counts_published_periods_and_a_year() {
        let opts = opts(3, NullPolicy::SkipPending);
        let lookback = opts.lookback();
        assert_eq!(lookback.periods, 2);
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let recent = monthly((2023, 12), &[Some(1.0), None, Some(2.0)]);
        assert!(!lookback.is_covered(&recent, start));

        let year = monthly((2023, 3), &[Some(1.0); 12]);
        assert!(lookback.is_covered(&year, start));

        let pending_year = monthly((2023, 3), &[None; 12]);
        assert!(!lookback.is_covered(&pending_year, start));
        let propagate = AggregateOptions {
            null_policy: NullPolicy::Propagate,
            ..opts
        };
        assert!(propagate.lookback().is_covered(&pending_year, start));
    }

    #[test]
    fn range_aggregated_with_lookback_matches_full_series() {
        let values: Vec<Option<f64>> = (0..18)
            .map(|i| (i % 5 != 2).then_some(4.0 + i as f64 * 0.1))
            .collect();
        let full_input = monthly((2023, 1), &values);
        let opts = opts(3, NullPolicy::SkipPending);
        let full = aggregate_series(&full_input, &opts);

        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let tail = aggregate_series(&full_input[2..], &opts);
        let from_tail: Vec<_> = tail.iter().filter(|r| r.reference_date >= start).collect();
        let from_full: Vec<_> = full.iter().filter(|r| r.reference_date >= start).collect();
        assert!(opts.lookback().is_covered(&full_input[2..14], start));
        assert_eq!(from_tail, from_full);
    }

    #[test]
    fn panel_only_when_joined() {
        let s = vec![series(&[Some(1.0)]), series(&[Some(2.0)])];
        assert!(aggregate(&s, &AggregateOptions::default()).panel.is_none());
        let joined = AggregateOptions {
            join: true,
            ..AggregateOptions::default()
        };
        assert!(aggregate(&s, &joined).panel.is_some());
        assert!(aggregate(&s[..1], &joined).panel.is_none());
    }
}
