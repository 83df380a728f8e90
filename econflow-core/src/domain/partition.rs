//! Partition keys and inclusive time ranges.
//!
//! Layout: `{layer}/source={source}/indicator={code}/year={yyyy}/month={mm}`

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::record::{IndicatorRecord, Layer, SourceId};

/// The unit of idempotent overwrite in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub layer: Layer,
    pub source: SourceId,
    pub indicator_code: String,
    pub year: i32,
    pub month: u32,
}

impl PartitionKey {
    pub fn new(
        layer: Layer,
        source: SourceId,
        indicator_code: impl Into<String>,
        year: i32,
        month: u32,
    ) -> Self {
        Self {
            layer,
            source,
            indicator_code: indicator_code.into(),
            year,
            month,
        }
    }

    /// Key of the partition `record` belongs to when written at `layer`.
    pub fn for_record(record: &IndicatorRecord, layer: Layer) -> Self {
        Self::new(
            layer,
            record.source,
            record.indicator_code.clone(),
            record.reference_date.year(),
            record.reference_date.month(),
        )
    }

    /// Relative Hive-style directory of the partition.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.layer.as_str())
            .join(format!("source={}", self.source))
            .join(format!("indicator={}", self.indicator_code))
            .join(format!("year={:04}", self.year))
            .join(format!("month={:02}", self.month))
    }

    /// First day of the partition's month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/source={}/indicator={}/year={:04}/month={:02}",
            self.layer, self.source, self.indicator_code, self.year, self.month
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time range: start {start} is after end {end}")]
pub struct InvalidRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// `(year, month)` buckets touched by the range, ascending.
    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut out = Vec::new();
        let (mut y, mut m) = (self.start.year(), self.start.month());
        let last = (self.end.year(), self.end.month());
        while (y, m) <= last {
            out.push((y, m));
            if m == 12 {
                y += 1;
                m = 1;
            } else {
                m += 1;
            }
        }
        out
    }

    /// Same range widened to whole months.
    pub fn to_month_bounds(&self) -> Self {
        let start = first_of_month(self.start);
        let end = last_of_month(self.end);
        Self { start, end }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_of_month(date: NaiveDate) -> NaiveDate {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn hive_path_layout() {
        let key = PartitionKey::new(Layer::Standardized, SourceId::Bcb, "selic", 2024, 3);
        assert_eq!(
            key.relative_dir(),
            PathBuf::from("standardized/source=bcb/indicator=selic/year=2024/month=03")
        );
        assert_eq!(
            key.to_string(),
            "standardized/source=bcb/indicator=selic/year=2024/month=03"
        );
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(TimeRange::new(d(2024, 2, 1), d(2024, 1, 1)).is_err());
        assert!(TimeRange::new(d(2024, 1, 1), d(2024, 1, 1)).is_ok());
    }

    #[test]
    fn months_cross_year_boundary() {
        let r = TimeRange::new(d(2023, 11, 15), d(2024, 2, 3)).unwrap();
        assert_eq!(r.months(), vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2)]);
    }

    #[test]
    fn month_bounds_widen() {
        let r = TimeRange::new(d(2024, 2, 10), d(2024, 2, 12)).unwrap().to_month_bounds();
        assert_eq!(r.start(), d(2024, 2, 1));
        assert_eq!(r.end(), d(2024, 2, 29));
        assert_eq!(last_of_month(d(2023, 12, 5)), d(2023, 12, 31));
    }
}
