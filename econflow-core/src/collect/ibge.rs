//! IBGE SIDRA aggregates strategy (API v3).
//!
//! `GET {base}/{table}/periodos/{from}-{to}/variaveis/{variable}?localidades=N1[all]`
//!
//! Periods are `YYYYMM` for monthly tables and `YYYYQQ` (quarter number) for
//! quarterly ones. Values come back as strings; SIDRA uses symbols such as
//! `...` or `-` for figures not yet released.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::collector::{parse_decimal, Observation, ParseError, SourceStrategy};
use crate::domain::{Catalog, Frequency, IndicatorSpec, RemoteSeries, SourceId, TimeRange};

pub const DEFAULT_BASE_URL: &str = "https://servicodados.ibge.gov.br/api/v3/agregados";

/// Placeholders SIDRA publishes instead of a number.
const PENDING_MARKERS: [&str; 4] = ["...", "..", "-", "X"];

#[derive(Debug, Deserialize)]
struct Variable {
    #[serde(default)]
    resultados: Vec<Resultado>,
}

#[derive(Debug, Deserialize)]
struct Resultado {
    #[serde(default)]
    series: Vec<Serie>,
}

#[derive(Debug, Deserialize)]
struct Serie {
    #[serde(default)]
    serie: BTreeMap<String, Option<String>>,
}

pub struct IbgeStrategy {
    catalog: Catalog,
    base_url: String,
}

impl IbgeStrategy {
    pub fn new(catalog: Catalog, base_url: impl Into<String>) -> Self {
        Self {
            catalog,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for IbgeStrategy {
    fn default() -> Self {
        Self::new(Catalog::ibge(), DEFAULT_BASE_URL)
    }
}

/// SIDRA period code for the period containing `date`.
pub(crate) fn period_code(frequency: Frequency, date: NaiveDate) -> String {
    match frequency {
        Frequency::Quarterly => format!("{:04}{:02}", date.year(), (date.month() - 1) / 3 + 1),
        Frequency::Daily | Frequency::Monthly => format!("{:04}{:02}", date.year(), date.month()),
    }
}

/// First day of the period named by a SIDRA period code.
pub(crate) fn parse_period(frequency: Frequency, code: &str) -> Result<NaiveDate, ParseError> {
    let bad = || ParseError::new(format!("bad period code '{code}'"));
    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let year: i32 = code[..4].parse().map_err(|_| bad())?;
    let sub: u32 = code[4..].parse().map_err(|_| bad())?;
    let month = match frequency {
        Frequency::Quarterly if (1..=4).contains(&sub) => (sub - 1) * 3 + 1,
        Frequency::Daily | Frequency::Monthly if (1..=12).contains(&sub) => sub,
        _ => return Err(bad()),
    };
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(bad)
}

fn parse_value(spec: &IndicatorSpec, period: &str, raw: Option<&str>) -> Result<Option<f64>, ParseError> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() || PENDING_MARKERS.contains(&raw) {
        return Ok(None);
    }
    parse_decimal(raw).map(Some).ok_or_else(|| {
        ParseError::new(format!("{}: unparseable value '{raw}' for {period}", spec.code))
    })
}

impl SourceStrategy for IbgeStrategy {
    fn source(&self) -> SourceId {
        SourceId::Ibge
    }

    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn page_urls(&self, spec: &IndicatorSpec, range: &TimeRange) -> Vec<String> {
        let RemoteSeries::Sidra { table, variable } = spec.remote else {
            return Vec::new();
        };
        vec![format!(
            "{}/{table}/periodos/{}-{}/variaveis/{variable}?localidades=N1[all]",
            self.base_url,
            period_code(spec.frequency, range.start()),
            period_code(spec.frequency, range.end()),
        )]
    }

    fn parse_page(&self, spec: &IndicatorSpec, body: &str) -> Result<Vec<Observation>, ParseError> {
        let variables: Vec<Variable> = serde_json::from_str(body)
            .map_err(|e| ParseError::new(format!("{}: malformed SIDRA body: {e}", spec.code)))?;

        let mut out = Vec::new();
        for serie in variables
            .iter()
            .flat_map(|v| &v.resultados)
            .flat_map(|r| &r.series)
        {
            for (period, raw) in &serie.serie {
                out.push(Observation {
                    reference_date: parse_period(spec.frequency, period)?,
                    value: parse_value(spec, period, raw.as_deref())?,
                });
            }
        }
        Ok(out)
    }
}
