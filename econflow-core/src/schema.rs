//! Record-level contract checks run at every write boundary.
//!
//! The validator never repairs a record. It reports every violated rule so
//! the writer can refuse or quarantine the record with a full explanation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{Catalog, IndicatorRecord, Layer, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    LayerMismatch,
    UnknownIndicator,
    Empty,
    FutureDated,
    NotFinite,
    OutOfBounds,
    UnitMismatch,
    DerivedOnLowerLayer,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::LayerMismatch => "layer_mismatch",
            Rule::UnknownIndicator => "unknown_indicator",
            Rule::Empty => "empty",
            Rule::FutureDated => "future_dated",
            Rule::NotFinite => "not_finite",
            Rule::OutOfBounds => "out_of_bounds",
            Rule::UnitMismatch => "unit_mismatch",
            Rule::DerivedOnLowerLayer => "derived_on_lower_layer",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub rule: Rule,
    pub observed: String,
}

impl Violation {
    fn new(field: &str, rule: Rule, observed: impl fmt::Display) -> Self {
        Self {
            field: field.to_string(),
            rule,
            observed: observed.to_string(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.field, self.rule, self.observed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Pass,
    Fail(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationResult::Pass)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Pass => &[],
            ValidationResult::Fail(v) => v,
        }
    }

    pub fn into_violations(self) -> Vec<Violation> {
        match self {
            ValidationResult::Pass => Vec::new(),
            ValidationResult::Fail(v) => v,
        }
    }
}

/// Validates records against the catalogs of every known source.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    catalogs: BTreeMap<SourceId, Catalog>,
}

impl SchemaValidator {
    pub fn new(catalogs: impl IntoIterator<Item = Catalog>) -> Self {
        Self {
            catalogs: catalogs.into_iter().map(|c| (c.source(), c)).collect(),
        }
    }

    /// Validator over the built-in catalogs.
    pub fn builtin() -> Self {
        Self::new(SourceId::ALL.map(Catalog::builtin))
    }

    pub fn catalog(&self, source: SourceId) -> Option<&Catalog> {
        self.catalogs.get(&source)
    }

    pub fn validate(&self, record: &IndicatorRecord, expected: Layer) -> ValidationResult {
        let mut out = Vec::new();

        if record.layer != expected {
            out.push(Violation::new(
                "layer",
                Rule::LayerMismatch,
                format!("{} (expected {expected})", record.layer),
            ));
        }

        if record.indicator_code.trim().is_empty() {
            out.push(Violation::new("indicator_code", Rule::Empty, "blank"));
        }

        if record.reference_date > record.collected_at.date_naive() {
            out.push(Violation::new(
                "reference_date",
                Rule::FutureDated,
                format!(
                    "{} after collection on {}",
                    record.reference_date,
                    record.collected_at.date_naive()
                ),
            ));
        }

        if let Some(v) = record.value {
            if !v.is_finite() {
                out.push(Violation::new("value", Rule::NotFinite, v));
            }
        }
        for (name, metric) in record.derived.iter() {
            if let Some(m) = metric {
                if !m.is_finite() {
                    out.push(Violation::new(name, Rule::NotFinite, m));
                }
            }
        }

        if expected != Layer::Aggregated && !record.derived.is_empty() {
            out.push(Violation::new(
                "derived",
                Rule::DerivedOnLowerLayer,
                format!("derived metrics on {expected} layer"),
            ));
        }

        let spec = self
            .catalogs
            .get(&record.source)
            .and_then(|c| c.get(&record.indicator_code));
        match spec {
            None if !record.indicator_code.trim().is_empty() => {
                out.push(Violation::new(
                    "indicator_code",
                    Rule::UnknownIndicator,
                    format!("{}/{}", record.source, record.indicator_code),
                ));
            }
            None => {}
            Some(spec) => {
                let expected_unit = match expected {
                    Layer::Raw => spec.raw_unit,
                    Layer::Standardized | Layer::Aggregated => spec.canonical_unit,
                };
                if record.unit != expected_unit {
                    out.push(Violation::new(
                        "unit",
                        Rule::UnitMismatch,
                        format!("{} (expected {expected_unit})", record.unit),
                    ));
                }
                if expected != Layer::Raw {
                    if let Some(v) = record.value.filter(|v| v.is_finite()) {
                        if !spec.bounds.contains(v) {
                            out.push(Violation::new(
                                "value",
                                Rule::OutOfBounds,
                                format!("{v} outside [{}, {}]", spec.bounds.min, spec.bounds.max),
                            ));
                        }
                    }
                }
            }
        }

        if out.is_empty() {
            ValidationResult::Pass
        } else {
            ValidationResult::Fail(out)
        }
    }
}
