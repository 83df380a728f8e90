//! Semantic units and conversion between them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Semantic unit of an observation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Percent,
    BasisPoints,
    Fraction,
    IndexPoints,
    BrlPerUsd,
    BrlThousands,
    BrlMillions,
}

/// Units only convert within a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Rate,
    Index,
    ExchangeRate,
    Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("cannot convert {from} to {to}: different dimensions")]
    Incompatible { from: Unit, to: Unit },

    #[error("unknown unit '{0}'")]
    Unknown(String),
}

impl Unit {
    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Percent | Unit::BasisPoints | Unit::Fraction => Dimension::Rate,
            Unit::IndexPoints => Dimension::Index,
            Unit::BrlPerUsd => Dimension::ExchangeRate,
            Unit::BrlThousands | Unit::BrlMillions => Dimension::Currency,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Percent => "percent",
            Unit::BasisPoints => "basis_points",
            Unit::Fraction => "fraction",
            Unit::IndexPoints => "index_points",
            Unit::BrlPerUsd => "brl_per_usd",
            Unit::BrlThousands => "brl_thousands",
            Unit::BrlMillions => "brl_millions",
        }
    }

    /// Multiplier from this unit to the base unit of its dimension.
    fn scale(&self) -> f64 {
        match self {
            Unit::Percent => 1.0,
            Unit::BasisPoints => 0.01,
            Unit::Fraction => 100.0,
            Unit::IndexPoints => 1.0,
            Unit::BrlPerUsd => 1.0,
            Unit::BrlThousands => 0.001,
            Unit::BrlMillions => 1.0,
        }
    }

    pub fn can_convert_to(&self, to: Unit) -> bool {
        self.dimension() == to.dimension()
    }

    /// Convert `value` expressed in `self` into `to`.
    pub fn convert(&self, value: f64, to: Unit) -> Result<f64, UnitError> {
        if !self.can_convert_to(to) {
            return Err(UnitError::Incompatible { from: *self, to });
        }
        if *self == to {
            return Ok(value);
        }
        Ok(value * self.scale() / to.scale())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent" | "%" => Ok(Unit::Percent),
            "basis_points" | "bp" => Ok(Unit::BasisPoints),
            "fraction" => Ok(Unit::Fraction),
            "index_points" => Ok(Unit::IndexPoints),
            "brl_per_usd" => Ok(Unit::BrlPerUsd),
            "brl_thousands" => Ok(Unit::BrlThousands),
            "brl_millions" => Ok(Unit::BrlMillions),
            other => Err(UnitError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn rate_conversions() {
        approx(Unit::BasisPoints.convert(25.0, Unit::Percent).unwrap(), 0.25);
        approx(Unit::Fraction.convert(0.1375, Unit::Percent).unwrap(), 13.75);
        approx(Unit::Percent.convert(1.0, Unit::BasisPoints).unwrap(), 100.0);
    }

    #[test]
    fn currency_conversion() {
        approx(
            Unit::BrlThousands.convert(2_500_000.0, Unit::BrlMillions).unwrap(),
            2_500.0,
        );
    }

    #[test]
    fn cross_dimension_fails() {
        let err = Unit::Percent.convert(1.0, Unit::BrlMillions).unwrap_err();
        assert!(matches!(err, UnitError::Incompatible { .. }));
    }

    #[test]
    fn identity_is_exact() {
        assert_eq!(Unit::IndexPoints.convert(1234.5678, Unit::IndexPoints).unwrap(), 1234.5678);
    }

    #[test]
    fn string_roundtrip() {
        for u in [
            Unit::Percent,
            Unit::BasisPoints,
            Unit::Fraction,
            Unit::IndexPoints,
            Unit::BrlPerUsd,
            Unit::BrlThousands,
            Unit::BrlMillions,
        ] {
            assert_eq!(u.as_str().parse::<Unit>().unwrap(), u);
        }
    }
}
