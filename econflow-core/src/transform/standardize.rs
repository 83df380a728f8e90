//! Raw → standardized.
//!
//! Pure over a raw snapshot of one series: dedup, coerce, optional monthly
//! resample, validate, sort. No clock reads, so identical input always gives
//! identical output.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

use crate::domain::partition::first_of_month;
use crate::domain::{IndicatorRecord, IndicatorSpec, Layer, Resample};
use crate::schema::{Rule, SchemaValidator, ValidationResult, Violation};
use crate::store::RejectedRecord;

pub struct StandardizeContext<'a> {
    pub spec: &'a IndicatorSpec,
    pub validator: &'a SchemaValidator,
}

#[derive(Debug, Clone, Default)]
pub struct StandardizeOutput {
    pub records: Vec<IndicatorRecord>,
    pub rejected: Vec<RejectedRecord>,
    pub duplicates_dropped: usize,
}

pub fn standardize(raw: &[IndicatorRecord], ctx: &StandardizeContext<'_>) -> StandardizeOutput {
    let (deduped, duplicates_dropped) = dedup_latest(raw);

    let mut rejected = Vec::new();
    let mut coerced = Vec::with_capacity(deduped.len());
    for record in deduped {
        match coerce(record, ctx.spec) {
            Ok(r) => coerced.push(r),
            Err(reject) => rejected.push(reject),
        }
    }

    let resampled = match ctx.spec.resample {
        Resample::None => coerced,
        mode => resample_monthly(coerced, mode, ctx.spec.decimals),
    };

    let mut records = Vec::with_capacity(resampled.len());
    for record in resampled {
        match ctx.validator.validate(&record, Layer::Standardized) {
            ValidationResult::Pass => records.push(record),
            ValidationResult::Fail(violations) => rejected.push(RejectedRecord {
                record,
                violations,
            }),
        }
    }
    records.sort_by_key(|r| r.reference_date);
    rejected.sort_by_key(|r| r.record.reference_date);

    StandardizeOutput {
        records,
        rejected,
        duplicates_dropped,
    }
}

/// One record per reference date. The latest `collected_at` wins; on a tie
/// the record appearing later in the input wins.
pub fn dedup_latest(raw: &[IndicatorRecord]) -> (Vec<&IndicatorRecord>, usize) {
    let mut latest: BTreeMap<NaiveDate, &IndicatorRecord> = BTreeMap::new();
    for record in raw {
        match latest.get(&record.reference_date) {
            Some(kept) if kept.collected_at > record.collected_at => {}
            _ => {
                latest.insert(record.reference_date, record);
            }
        }
    }
    let dropped = raw.len() - latest.len();
    (latest.into_values().collect(), dropped)
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(15) as i32);
    normalize_zero((value * factor).round() / factor)
}

fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

fn coerce(record: &IndicatorRecord, spec: &IndicatorSpec) -> Result<IndicatorRecord, RejectedRecord> {
    let mut out = record.clone();
    out.layer = Layer::Standardized;

    let reject = |out: IndicatorRecord, violation: Violation| RejectedRecord {
        record: out,
        violations: vec![violation],
    };

    if let Some(v) = record.value {
        if !v.is_finite() {
            return Err(reject(
                out,
                Violation {
                    field: "value".into(),
                    rule: Rule::NotFinite,
                    observed: v.to_string(),
                },
            ));
        }
        let converted = match record.unit.convert(normalize_zero(v), spec.canonical_unit) {
            Ok(c) => c,
            Err(e) => {
                return Err(reject(
                    out,
                    Violation {
                        field: "unit".into(),
                        rule: Rule::UnitMismatch,
                        observed: e.to_string(),
                    },
                ))
            }
        };
        out.value = Some(round_to(converted, spec.decimals));
    }
    out.unit = spec.canonical_unit;
    Ok(out)
}

fn resample_monthly(records: Vec<IndicatorRecord>, mode: Resample, decimals: u32) -> Vec<IndicatorRecord> {
    let mut months: BTreeMap<NaiveDate, Vec<IndicatorRecord>> = BTreeMap::new();
    for record in records {
        months
            .entry(first_of_month(record.reference_date))
            .or_default()
            .push(record);
    }

    months
        .into_iter()
        .filter_map(|(month, mut group)| {
            group.sort_by_key(|r| r.reference_date);
            let collected_at: DateTime<Utc> = group.iter().map(|r| r.collected_at).max()?;
            let published: Vec<f64> = group.iter().filter_map(|r| r.value).collect();
            let value = match mode {
                _ if published.is_empty() => None,
                Resample::MonthlyMean => Some(round_to(
                    published.iter().sum::<f64>() / published.len() as f64,
                    decimals,
                )),
                Resample::MonthlyLast | Resample::None => published.last().copied(),
            };
            let mut out = group.pop()?;
            out.reference_date = month;
            out.value = value;
            out.collected_at = collected_at;
            Some(out)
        })
        .collect()
}
