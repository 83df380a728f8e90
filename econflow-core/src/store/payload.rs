//! Parquet encoding of partition payloads.
//!
//! Records are sorted before encoding so the same set of records always
//! produces the same bytes.

use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use std::io::Cursor;
use thiserror::Error;

use crate::domain::{DerivedMetrics, IndicatorRecord, Layer, SourceId, Unit};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("parquet: {0}")]
    Polars(#[from] PolarsError),

    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("type mismatch in column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("bad value in column {column} at row {row}: {reason}")]
    BadValue {
        column: String,
        row: usize,
        reason: String,
    },
}

/// Column layout of a partition file.
pub struct PartitionSchema;

impl PartitionSchema {
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new("source".into(), DataType::String),
            Field::new("indicator_code".into(), DataType::String),
            Field::new("reference_date".into(), DataType::Date),
            Field::new("value".into(), DataType::Float64),
            Field::new("unit".into(), DataType::String),
            Field::new(
                "collected_at".into(),
                DataType::Datetime(TimeUnit::Microseconds, None),
            ),
            Field::new("layer".into(), DataType::String),
            Field::new("pct_change".into(), DataType::Float64),
            Field::new("yoy_change".into(), DataType::Float64),
            Field::new("rolling_mean".into(), DataType::Float64),
            Field::new("rolling_variance".into(), DataType::Float64),
        ])
    }

    pub fn validate(df: &DataFrame) -> Result<(), CodecError> {
        let actual = df.schema();
        for field in Self::schema().iter_fields() {
            let dtype = actual
                .get(field.name())
                .ok_or_else(|| CodecError::MissingColumn(field.name().to_string()))?;
            if dtype != field.dtype() {
                return Err(CodecError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: format!("{:?}", field.dtype()),
                    actual: format!("{dtype:?}"),
                });
            }
        }
        Ok(())
    }
}

fn epoch() -> NaiveDate {
    // 1970-01-01
    NaiveDate::default()
}

/// Canonical ordering of records inside a payload.
pub fn sort_records(records: &mut [IndicatorRecord]) {
    records.sort_by(|a, b| {
        (a.reference_date, a.source, &a.indicator_code, a.layer)
            .cmp(&(b.reference_date, b.source, &b.indicator_code, b.layer))
    });
}

pub fn to_dataframe(records: &[IndicatorRecord]) -> Result<DataFrame, CodecError> {
    let mut sorted = records.to_vec();
    sort_records(&mut sorted);
    let records = sorted;

    let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
    let codes: Vec<&str> = records.iter().map(|r| r.indicator_code.as_str()).collect();
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.reference_date - epoch()).num_days() as i32)
        .collect();
    let values: Vec<Option<f64>> = records.iter().map(|r| r.value).collect();
    let units: Vec<&str> = records.iter().map(|r| r.unit.as_str()).collect();
    let collected: Vec<i64> = records
        .iter()
        .map(|r| r.collected_at.timestamp_micros())
        .collect();
    let layers: Vec<&str> = records.iter().map(|r| r.layer.as_str()).collect();
    let pct: Vec<Option<f64>> = records.iter().map(|r| r.derived.pct_change).collect();
    let yoy: Vec<Option<f64>> = records.iter().map(|r| r.derived.yoy_change).collect();
    let mean: Vec<Option<f64>> = records.iter().map(|r| r.derived.rolling_mean).collect();
    let var: Vec<Option<f64>> = records.iter().map(|r| r.derived.rolling_variance).collect();

    let df = DataFrame::new(vec![
        Column::new("source".into(), sources),
        Column::new("indicator_code".into(), codes),
        Column::new("reference_date".into(), dates).cast(&DataType::Date)?,
        Column::new("value".into(), values),
        Column::new("unit".into(), units),
        Column::new("collected_at".into(), collected)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
        Column::new("layer".into(), layers),
        Column::new("pct_change".into(), pct),
        Column::new("yoy_change".into(), yoy),
        Column::new("rolling_mean".into(), mean),
        Column::new("rolling_variance".into(), var),
    ])?;
    Ok(df)
}

pub fn encode(records: &[IndicatorRecord]) -> Result<Vec<u8>, CodecError> {
    let mut df = to_dataframe(records)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df)?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<IndicatorRecord>, CodecError> {
    let df = ParquetReader::new(Cursor::new(bytes)).finish()?;
    PartitionSchema::validate(&df)?;
    from_dataframe(&df)
}

fn bad(column: &str, row: usize, reason: impl Into<String>) -> CodecError {
    CodecError::BadValue {
        column: column.to_string(),
        row,
        reason: reason.into(),
    }
}

fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series, CodecError> {
    Ok(df.column(name)?.as_materialized_series())
}

pub fn from_dataframe(df: &DataFrame) -> Result<Vec<IndicatorRecord>, CodecError> {
    let sources = series(df, "source")?.str()?;
    let codes = series(df, "indicator_code")?.str()?;
    let dates_physical = series(df, "reference_date")?.cast(&DataType::Int32)?;
    let dates = dates_physical.i32()?;
    let values = series(df, "value")?.f64()?;
    let units = series(df, "unit")?.str()?;
    let collected_physical = series(df, "collected_at")?.cast(&DataType::Int64)?;
    let collected = collected_physical.i64()?;
    let layers = series(df, "layer")?.str()?;
    let pct = series(df, "pct_change")?.f64()?;
    let yoy = series(df, "yoy_change")?.f64()?;
    let mean = series(df, "rolling_mean")?.f64()?;
    let var = series(df, "rolling_variance")?.f64()?;

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let source: SourceId = sources
            .get(i)
            .ok_or_else(|| bad("source", i, "null"))?
            .parse()
            .map_err(|e: crate::domain::ParseSourceError| bad("source", i, e.to_string()))?;
        let indicator_code = codes
            .get(i)
            .ok_or_else(|| bad("indicator_code", i, "null"))?
            .to_string();
        let days = dates.get(i).ok_or_else(|| bad("reference_date", i, "null"))?;
        let reference_date = epoch() + chrono::Duration::days(i64::from(days));
        let unit: Unit = units
            .get(i)
            .ok_or_else(|| bad("unit", i, "null"))?
            .parse()
            .map_err(|e: crate::domain::UnitError| bad("unit", i, e.to_string()))?;
        let micros = collected.get(i).ok_or_else(|| bad("collected_at", i, "null"))?;
        let collected_at = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| bad("collected_at", i, format!("out of range: {micros}")))?;
        let layer: Layer = layers
            .get(i)
            .ok_or_else(|| bad("layer", i, "null"))?
            .parse()
            .map_err(|e: String| bad("layer", i, e))?;

        out.push(IndicatorRecord {
            source,
            indicator_code,
            reference_date,
            value: values.get(i),
            unit,
            collected_at,
            layer,
            derived: DerivedMetrics {
                pct_change: pct.get(i),
                yoy_change: yoy.get(i),
                rolling_mean: mean.get(i),
                rolling_variance: var.get(i),
            },
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Vec<IndicatorRecord> {
        let ts = Utc.with_ymd_and_hms(2024, 4, 2, 9, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let mut a = IndicatorRecord::raw(
            SourceId::Bcb,
            "selic",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Some(5.25),
            Unit::Percent,
            ts,
        );
        a.layer = Layer::Aggregated;
        a.derived = DerivedMetrics {
            pct_change: Some(5.0),
            yoy_change: Some(-12.5),
            rolling_mean: Some(5.125),
            rolling_variance: None,
        };
        let mut b = a.clone();
        b.reference_date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        b.value = None;
        b.derived = DerivedMetrics::default();
        vec![a, b]
    }

    #[test]
    fn decode_restores_every_field_sorted() {
        let records = sample();
        let decoded = decode(&encode(&records).unwrap()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], records[1]);
        assert_eq!(decoded[1], records[0]);
    }

    #[test]
    fn encoding_is_order_independent() {
        let mut records = sample();
        let a = encode(&records).unwrap();
        records.reverse();
        let b = encode(&records).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_column_detected() {
        let mut df = to_dataframe(&sample()).unwrap().drop("unit").unwrap();
        let mut buf = Vec::new();
        ParquetWriter::new(&mut buf).finish(&mut df).unwrap();
        assert!(matches!(decode(&buf), Err(CodecError::MissingColumn(c)) if c == "unit"));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode(b"not parquet").is_err());
    }
}
