//! Indicator record: the unit that flows through every layer.

use chrono::{DateTime, Datelike, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::unit::Unit;

/// External statistical agency that produced a series.
///
/// The set is closed: adding an agency means adding a variant, a strategy,
/// and a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Banco Central do Brasil, SGS time series API.
    Bcb,
    /// Instituto Brasileiro de Geografia e Estatística, SIDRA aggregates API.
    Ibge,
}

impl SourceId {
    pub const ALL: [SourceId; 2] = [SourceId::Bcb, SourceId::Ibge];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Bcb => "bcb",
            SourceId::Ibge => "ibge",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source id '{0}'")]
pub struct ParseSourceError(pub String);

impl FromStr for SourceId {
    type Err = ParseSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bcb" => Ok(SourceId::Bcb),
            "ibge" => Ok(SourceId::Ibge),
            _ => Err(ParseSourceError(s.to_string())),
        }
    }
}

/// Refinement stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Raw,
    Standardized,
    Aggregated,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Raw => "raw",
            Layer::Standardized => "standardized",
            Layer::Aggregated => "aggregated",
        }
    }

    /// The layer a transform from `self` produces, if any.
    pub fn next(&self) -> Option<Layer> {
        match self {
            Layer::Raw => Some(Layer::Standardized),
            Layer::Standardized => Some(Layer::Aggregated),
            Layer::Aggregated => None,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "bronze" => Ok(Layer::Raw),
            "standardized" | "silver" => Ok(Layer::Standardized),
            "aggregated" | "gold" => Ok(Layer::Aggregated),
            other => Err(format!("unknown layer '{other}'")),
        }
    }
}

/// Derived value columns attached at the aggregated layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Period-over-period change in percent.
    pub pct_change: Option<f64>,
    /// Change in percent against the record dated one year earlier.
    pub yoy_change: Option<f64>,
    pub rolling_mean: Option<f64>,
    /// Sample variance (n - 1) over the trailing window.
    pub rolling_variance: Option<f64>,
}

impl DerivedMetrics {
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, metric)| metric.is_none())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> {
        [
            ("pct_change", self.pct_change),
            ("yoy_change", self.yoy_change),
            ("rolling_mean", self.rolling_mean),
            ("rolling_variance", self.rolling_variance),
        ]
        .into_iter()
    }
}

/// One observation of one indicator at one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub source: SourceId,
    pub indicator_code: String,
    /// Date (or first day of the month/quarter) the observation describes.
    pub reference_date: NaiveDate,
    /// `None` only when the agency has not yet published the value.
    pub value: Option<f64>,
    pub unit: Unit,
    pub collected_at: DateTime<Utc>,
    pub layer: Layer,
    #[serde(default)]
    pub derived: DerivedMetrics,
}

impl IndicatorRecord {
    /// A freshly collected raw observation.
    pub fn raw(
        source: SourceId,
        indicator_code: impl Into<String>,
        reference_date: NaiveDate,
        value: Option<f64>,
        unit: Unit,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            indicator_code: indicator_code.into(),
            reference_date,
            value,
            unit,
            collected_at: truncate_collected_at(collected_at),
            layer: Layer::Raw,
            derived: DerivedMetrics::default(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.value.is_none()
    }

    /// `(year, month)` bucket of the reference date.
    pub fn period(&self) -> (i32, u32) {
        (self.reference_date.year(), self.reference_date.month())
    }
}

/// Storage keeps microsecond precision; stamping at that precision keeps
/// records equal across an encode/decode cycle.
pub fn truncate_collected_at(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}
