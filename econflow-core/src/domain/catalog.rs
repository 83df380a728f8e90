//! Per-source indicator catalogs.
//!
//! A catalog lists the series a source can deliver together with the
//! metadata every later stage needs: the unit the agency publishes in, the
//! canonical unit the standardized layer stores, plausible bounds, and how
//! daily series collapse to monthly observations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::record::SourceId;
use super::unit::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Monthly,
    Quarterly,
}

/// How a standardized series is bucketed before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resample {
    #[default]
    None,
    /// One record per month holding the mean of the published values.
    MonthlyMean,
    /// One record per month holding the last published value.
    MonthlyLast,
}

/// Where a series lives on the agency's API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteSeries {
    /// BCB SGS series number.
    Sgs { series: u32 },
    /// IBGE SIDRA aggregate table and variable.
    Sidra { table: u32, variable: u32 },
}

/// Plausible value range, in the canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub code: String,
    pub name: String,
    pub frequency: Frequency,
    pub raw_unit: Unit,
    pub canonical_unit: Unit,
    pub bounds: Bounds,
    /// Decimal places kept after unit conversion.
    pub decimals: u32,
    #[serde(default)]
    pub resample: Resample,
    pub remote: RemoteSeries,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("catalog for '{source_id}' is empty")]
    Empty { source_id: SourceId },

    #[error("catalog for '{source_id}' lists '{code}' more than once")]
    DuplicateCode { source_id: SourceId, code: String },

    #[error("bounds for '{source_id}/{code}' are invalid: min {min} > max {max} or not finite")]
    InvalidBounds {
        source_id: SourceId,
        code: String,
        min: f64,
        max: f64,
    },

    #[error("'{source_id}/{code}' publishes in {raw} which cannot be converted to {canonical}")]
    UnconvertibleUnit {
        source_id: SourceId,
        code: String,
        raw: Unit,
        canonical: Unit,
    },

    #[error("bounds override names unknown indicator '{source_id}/{code}'")]
    UnknownOverride { source_id: SourceId, code: String },
}

/// The indicator catalog of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    source: SourceId,
    specs: BTreeMap<String, IndicatorSpec>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicates and inconsistent metadata.
    pub fn new(source: SourceId, specs: Vec<IndicatorSpec>) -> Result<Self, CatalogError> {
        if specs.is_empty() {
            return Err(CatalogError::Empty { source_id: source });
        }
        let mut map = BTreeMap::new();
        for spec in specs {
            validate_spec(source, &spec)?;
            if map.contains_key(&spec.code) {
                return Err(CatalogError::DuplicateCode {
                    source_id: source,
                    code: spec.code,
                });
            }
            map.insert(spec.code.clone(), spec);
        }
        Ok(Self { source, specs: map })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn get(&self, code: &str) -> Option<&IndicatorSpec> {
        self.specs.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.specs.contains_key(code)
    }

    pub fn codes(&self) -> BTreeSet<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &IndicatorSpec> {
        self.specs.values()
    }

    /// Replace the plausible bounds of one indicator.
    pub fn override_bounds(&mut self, code: &str, bounds: Bounds) -> Result<(), CatalogError> {
        let source = self.source;
        let spec = self
            .specs
            .get_mut(code)
            .ok_or_else(|| CatalogError::UnknownOverride {
                source_id: source,
                code: code.to_string(),
            })?;
        let mut candidate = spec.clone();
        candidate.bounds = bounds;
        validate_spec(source, &candidate)?;
        spec.bounds = bounds;
        Ok(())
    }

    /// Default BCB SGS catalog.
    pub fn bcb() -> Self {
        let specs = vec![
            IndicatorSpec {
                code: "ipca".into(),
                name: "IPCA - monthly consumer price inflation".into(),
                frequency: Frequency::Monthly,
                raw_unit: Unit::Percent,
                canonical_unit: Unit::Percent,
                bounds: Bounds::new(-5.0, 30.0),
                decimals: 2,
                resample: Resample::None,
                remote: RemoteSeries::Sgs { series: 433 },
            },
            IndicatorSpec {
                code: "selic".into(),
                name: "Selic - daily policy rate".into(),
                frequency: Frequency::Daily,
                raw_unit: Unit::Percent,
                canonical_unit: Unit::Percent,
                bounds: Bounds::new(0.0, 5.0),
                decimals: 6,
                resample: Resample::MonthlyMean,
                remote: RemoteSeries::Sgs { series: 11 },
            },
            IndicatorSpec {
                code: "pib".into(),
                name: "Monthly GDP estimate".into(),
                frequency: Frequency::Monthly,
                raw_unit: Unit::BrlMillions,
                canonical_unit: Unit::BrlMillions,
                bounds: Bounds::new(0.0, 5_000_000.0),
                decimals: 1,
                resample: Resample::None,
                remote: RemoteSeries::Sgs { series: 4380 },
            },
            IndicatorSpec {
                code: "cambio".into(),
                name: "USD/BRL exchange rate (sell)".into(),
                frequency: Frequency::Daily,
                raw_unit: Unit::BrlPerUsd,
                canonical_unit: Unit::BrlPerUsd,
                bounds: Bounds::new(0.5, 20.0),
                decimals: 4,
                resample: Resample::MonthlyLast,
                remote: RemoteSeries::Sgs { series: 1 },
            },
            IndicatorSpec {
                code: "desemprego".into(),
                name: "Unemployment rate".into(),
                frequency: Frequency::Monthly,
                raw_unit: Unit::Percent,
                canonical_unit: Unit::Percent,
                bounds: Bounds::new(0.0, 40.0),
                decimals: 1,
                resample: Resample::None,
                remote: RemoteSeries::Sgs { series: 24369 },
            },
        ];
        Self::new(SourceId::Bcb, specs).expect("built-in BCB catalog is consistent")
    }

    /// Default IBGE SIDRA catalog.
    pub fn ibge() -> Self {
        let specs = vec![
            IndicatorSpec {
                code: "ipca15".into(),
                name: "IPCA-15 - monthly change".into(),
                frequency: Frequency::Monthly,
                raw_unit: Unit::Percent,
                canonical_unit: Unit::Percent,
                bounds: Bounds::new(-5.0, 30.0),
                decimals: 2,
                resample: Resample::None,
                remote: RemoteSeries::Sidra {
                    table: 7062,
                    variable: 355,
                },
            },
            IndicatorSpec {
                code: "inpc".into(),
                name: "INPC - monthly change".into(),
                frequency: Frequency::Monthly,
                raw_unit: Unit::Percent,
                canonical_unit: Unit::Percent,
                bounds: Bounds::new(-5.0, 30.0),
                decimals: 2,
                resample: Resample::None,
                remote: RemoteSeries::Sidra {
                    table: 7063,
                    variable: 44,
                },
            },
            IndicatorSpec {
                code: "pib_ibge".into(),
                name: "Quarterly GDP at current prices".into(),
                frequency: Frequency::Quarterly,
                raw_unit: Unit::BrlThousands,
                canonical_unit: Unit::BrlMillions,
                bounds: Bounds::new(0.0, 20_000_000.0),
                decimals: 1,
                resample: Resample::None,
                remote: RemoteSeries::Sidra {
                    table: 1621,
                    variable: 584,
                },
            },
        ];
        Self::new(SourceId::Ibge, specs).expect("built-in IBGE catalog is consistent")
    }

    /// Built-in catalog for a source.
    pub fn builtin(source: SourceId) -> Self {
        match source {
            SourceId::Bcb => Self::bcb(),
            SourceId::Ibge => Self::ibge(),
        }
    }
}

fn validate_spec(source: SourceId, spec: &IndicatorSpec) -> Result<(), CatalogError> {
    let Bounds { min, max } = spec.bounds;
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(CatalogError::InvalidBounds {
            source_id: source,
            code: spec.code.clone(),
            min,
            max,
        });
    }
    if !spec.raw_unit.can_convert_to(spec.canonical_unit) {
        return Err(CatalogError::UnconvertibleUnit {
            source_id: source,
            code: spec.code.clone(),
            raw: spec.raw_unit,
            canonical: spec.canonical_unit,
        });
    }
    Ok(())
}
