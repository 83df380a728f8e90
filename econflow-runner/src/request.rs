//! Requests the pipeline accepts.

use chrono::NaiveDate;
use econflow_core::collect::RegistryError;
use econflow_core::domain::{IndicatorSelection, InvalidRange, Layer, TimeRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error(transparent)]
    Range(#[from] InvalidRange),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("cannot transform {from} -> {to}; only raw -> standardized and standardized -> aggregated")]
    IllegalTransform { from: Layer, to: Layer },
}

/// Collect, then refine, a set of indicators of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub source: String,
    pub indicators: IndicatorSelection,
    pub range: TimeRange,
}

impl CollectionRequest {
    pub fn new(
        source: impl Into<String>,
        indicators: IndicatorSelection,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, RequestError> {
        Ok(Self {
            source: source.into(),
            indicators,
            range: TimeRange::new(start, end)?,
        })
    }
}

/// Re-run one transform over data already in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub from: Layer,
    pub to: Layer,
    pub source: String,
    pub indicators: IndicatorSelection,
    pub range: TimeRange,
}

impl TransformRequest {
    pub fn new(
        from: Layer,
        to: Layer,
        source: impl Into<String>,
        indicators: IndicatorSelection,
        range: TimeRange,
    ) -> Result<Self, RequestError> {
        let request = Self {
            from,
            to,
            source: source.into(),
            indicators,
            range,
        };
        request.check_layers()?;
        Ok(request)
    }

    pub fn check_layers(&self) -> Result<(), RequestError> {
        if self.from.next() == Some(self.to) {
            Ok(())
        } else {
            Err(RequestError::IllegalTransform {
                from: self.from,
                to: self.to,
            })
        }
    }
}
