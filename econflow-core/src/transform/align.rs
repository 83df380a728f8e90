//! Multi-series alignment on a common date axis.
//!
//! Dates a series has no record for are `Missing`, never silently filled.
//! Linear interpolation is opt-in and only bridges a gap between two
//! observed values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{IndicatorRecord, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Leave missing dates as `Missing`.
    #[default]
    Represent,
    /// Fill `Missing` cells lying between two observed cells.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Observed(f64),
    /// Record present but not yet published.
    Pending,
    /// No record for this date.
    Missing,
    Interpolated(f64),
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Observed(v) | Cell::Interpolated(v) => Some(*v),
            Cell::Pending | Cell::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId {
    pub source: SourceId,
    pub indicator_code: String,
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.source, self.indicator_code)
    }
}

/// Name of the panel column holding `bcb.selic - bcb.ipca`.
pub const REAL_INTEREST_RATE: &str = "real_interest_rate";

/// Column computed from other columns of a panel.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: String,
    pub cells: Vec<Cell>,
}

/// Series aligned on the union of their reference dates.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedPanel {
    /// Common date axis, ascending.
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<SeriesId>,
    /// One column of cells per series, each as long as `dates`.
    pub cells: Vec<Vec<Cell>>,
    pub derived: Vec<DerivedColumn>,
}

impl JoinedPanel {
    pub fn column(&self, source: SourceId, indicator_code: &str) -> Option<&[Cell]> {
        self.columns
            .iter()
            .position(|c| c.source == source && c.indicator_code == indicator_code)
            .map(|i| self.cells[i].as_slice())
    }

    pub fn cell(&self, column: usize, date: NaiveDate) -> Option<Cell> {
        let row = self.dates.binary_search(&date).ok()?;
        self.cells.get(column).map(|c| c[row])
    }

    pub fn derived_column(&self, name: &str) -> Option<&[Cell]> {
        self.derived
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.cells.as_slice())
    }

    /// Append `minuend - subtrahend` as a derived column. Returns false,
    /// leaving the panel as is, when either series is not in it.
    pub fn add_difference(
        &mut self,
        name: impl Into<String>,
        minuend: (SourceId, &str),
        subtrahend: (SourceId, &str),
    ) -> bool {
        let (Some(a), Some(b)) = (
            self.column(minuend.0, minuend.1),
            self.column(subtrahend.0, subtrahend.1),
        ) else {
            return false;
        };
        let cells = a.iter().zip(b).map(|(x, y)| difference(*x, *y)).collect();
        self.derived.push(DerivedColumn {
            name: name.into(),
            cells,
        });
        true
    }

    /// Real interest rate: Selic minus IPCA on each date both are known.
    pub fn add_real_interest_rate(&mut self) -> bool {
        self.add_difference(
            REAL_INTEREST_RATE,
            (SourceId::Bcb, "selic"),
            (SourceId::Bcb, "ipca"),
        )
    }
}

/// A missing side makes the difference missing; otherwise a pending side
/// makes it pending. Interpolated inputs give an interpolated result.
fn difference(a: Cell, b: Cell) -> Cell {
    match (a, b) {
        (Cell::Missing, _) | (_, Cell::Missing) => Cell::Missing,
        (Cell::Pending, _) | (_, Cell::Pending) => Cell::Pending,
        (Cell::Observed(x), Cell::Observed(y)) => Cell::Observed(x - y),
        (x, y) => match (x.value(), y.value()) {
            (Some(x), Some(y)) => Cell::Interpolated(x - y),
            _ => Cell::Missing,
        },
    }
}

/// Align series (each one `(source, code)`) on the union of their dates.
pub fn join_series(series: &[Vec<IndicatorRecord>], gap: GapPolicy) -> JoinedPanel {
    let dates: Vec<NaiveDate> = series
        .iter()
        .flatten()
        .map(|r| r.reference_date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut columns = Vec::new();
    let mut cells = Vec::new();
    for records in series.iter().filter(|s| !s.is_empty()) {
        let first = &records[0];
        columns.push(SeriesId {
            source: first.source,
            indicator_code: first.indicator_code.clone(),
        });

        let by_date: BTreeMap<NaiveDate, Option<f64>> = records
            .iter()
            .map(|r| (r.reference_date, r.value))
            .collect();
        let mut column: Vec<Cell> = dates
            .iter()
            .map(|d| match by_date.get(d) {
                Some(Some(v)) => Cell::Observed(*v),
                Some(None) => Cell::Pending,
                None => Cell::Missing,
            })
            .collect();
        if gap == GapPolicy::Linear {
            interpolate(&dates, &mut column);
        }
        cells.push(column);
    }

    JoinedPanel {
        dates,
        columns,
        cells,
        derived: Vec::new(),
    }
}

/// Fill runs of `Missing` bounded by `Observed` on both sides, weighting by
/// calendar distance.
fn interpolate(dates: &[NaiveDate], column: &mut [Cell]) {
    let mut i = 0;
    while i < column.len() {
        if column[i] != Cell::Missing {
            i += 1;
            continue;
        }
        let start = i;
        while i < column.len() && column[i] == Cell::Missing {
            i += 1;
        }
        let end = i;
        let (Some(left), Some(right)) = (start.checked_sub(1), (end < column.len()).then_some(end)) else {
            continue;
        };
        let (Cell::Observed(lv), Cell::Observed(rv)) = (column[left], column[right]) else {
            continue;
        };
        let span = (dates[right] - dates[left]).num_days() as f64;
        for k in start..end {
            let t = (dates[k] - dates[left]).num_days() as f64 / span;
            column[k] = Cell::Interpolated(lv + (rv - lv) * t);
        }
    }
}
