//! Banco Central do Brasil SGS strategy.
//!
//! `GET {base}/bcdata.sgs.{series}/dados?formato=json&dataInicial=dd/mm/yyyy&dataFinal=dd/mm/yyyy`
//!
//! The API refuses windows longer than ten years for daily series, so ranges
//! are paged. A 404 means the series has no values in the window.

use chrono::{Months, NaiveDate};
use serde::Deserialize;

use super::collector::{parse_decimal, Observation, ParseError, SourceStrategy};
use crate::domain::partition::first_of_month;
use crate::domain::{Catalog, Frequency, IndicatorSpec, RemoteSeries, SourceId, TimeRange};

pub const DEFAULT_BASE_URL: &str = "https://api.bcb.gov.br/dados/serie";

const PAGE_YEARS: u32 = 10;

#[derive(Debug, Deserialize)]
struct SgsRow {
    data: String,
    valor: Option<serde_json::Value>,
}

pub struct BcbStrategy {
    catalog: Catalog,
    base_url: String,
}

impl BcbStrategy {
    pub fn new(catalog: Catalog, base_url: impl Into<String>) -> Self {
        Self {
            catalog,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn series_url(&self, series: u32, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/bcdata.sgs.{series}/dados?formato=json&dataInicial={}&dataFinal={}",
            self.base_url,
            start.format("%d/%m/%Y"),
            end.format("%d/%m/%Y"),
        )
    }
}

impl Default for BcbStrategy {
    fn default() -> Self {
        Self::new(Catalog::bcb(), DEFAULT_BASE_URL)
    }
}

/// Split `[start, end]` into consecutive windows of at most `years` years.
pub(crate) fn page_windows(start: NaiveDate, end: NaiveDate, years: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let page_end = cursor
            .checked_add_months(Months::new(12 * years))
            .and_then(|d| d.pred_opt())
            .map_or(end, |d| d.min(end));
        out.push((cursor, page_end));
        match page_end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    out
}

fn parse_value(spec: &IndicatorSpec, date: &str, valor: Option<serde_json::Value>) -> Result<Option<f64>, ParseError> {
    match valor {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| ParseError::new(format!("{}: unrepresentable value on {date}", spec.code))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => parse_decimal(&s)
            .map(Some)
            .ok_or_else(|| ParseError::new(format!("{}: unparseable value '{s}' on {date}", spec.code))),
        Some(other) => Err(ParseError::new(format!(
            "{}: unexpected value {other} on {date}",
            spec.code
        ))),
    }
}

impl SourceStrategy for BcbStrategy {
    fn source(&self) -> SourceId {
        SourceId::Bcb
    }

    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn page_urls(&self, spec: &IndicatorSpec, range: &TimeRange) -> Vec<String> {
        let RemoteSeries::Sgs { series } = spec.remote else {
            return Vec::new();
        };
        page_windows(range.start(), range.end(), PAGE_YEARS)
            .into_iter()
            .map(|(start, end)| self.series_url(series, start, end))
            .collect()
    }

    fn parse_page(&self, spec: &IndicatorSpec, body: &str) -> Result<Vec<Observation>, ParseError> {
        let rows: Vec<SgsRow> = serde_json::from_str(body)
            .map_err(|e| ParseError::new(format!("{}: malformed SGS body: {e}", spec.code)))?;
        rows.into_iter()
            .map(|row| {
                let date = NaiveDate::parse_from_str(row.data.trim(), "%d/%m/%Y").map_err(|e| {
                    ParseError::new(format!("{}: bad date '{}': {e}", spec.code, row.data))
                })?;
                let reference_date = match spec.frequency {
                    Frequency::Daily => date,
                    Frequency::Monthly | Frequency::Quarterly => first_of_month(date),
                };
                Ok(Observation {
                    reference_date,
                    value: parse_value(spec, &row.data, row.valor)?,
                })
            })
            .collect()
    }

    fn empty_statuses(&self) -> &[u16] {
        &[404]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::circuit_breaker::CircuitBreaker;
    use crate::collect::collector::{CollectError, Collector, FixedClock, SourceCollector};
    use crate::collect::fake::ScriptedTransport;
    use crate::collect::retry::RetryPolicy;
    use crate::collect::transport::{HttpResponse, TransportError};
    use crate::domain::{Layer, Unit};
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn collector(transport: ScriptedTransport, attempts: u32) -> SourceCollector<BcbStrategy> {
        SourceCollector::new(
            BcbStrategy::new(Catalog::bcb(), "http://sgs.test"),
            Arc::new(transport),
            RetryPolicy::immediate(attempts),
            Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))),
            Arc::new(FixedClock(now())),
        )
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // ── Paging ──

    #[test]
    fn long_ranges_split_into_ten_year_pages() {
        let pages = page_windows(d(2000, 1, 1), d(2024, 12, 31), 10);
        assert_eq!(
            pages,
            vec![
                (d(2000, 1, 1), d(2009, 12, 31)),
                (d(2010, 1, 1), d(2019, 12, 31)),
                (d(2020, 1, 1), d(2024, 12, 31)),
            ]
        );
        assert_eq!(page_windows(d(2024, 1, 1), d(2024, 1, 1), 10).len(), 1);
    }

    #[test]
    fn url_uses_brazilian_dates() {
        let s = BcbStrategy::new(Catalog::bcb(), "http://sgs.test/");
        let spec = s.catalog().get("ipca").unwrap().clone();
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 3, 31)).unwrap();
        assert_eq!(
            s.page_urls(&spec, &range),
            vec!["http://sgs.test/bcdata.sgs.433/dados?formato=json&dataInicial=01/01/2024&dataFinal=31/03/2024"]
        );
    }

    // ── Parsing ──

    #[test]
    fn parses_comma_decimals_and_pending_values() {
        let s = BcbStrategy::default();
        let spec = s.catalog().get("ipca").unwrap().clone();
        let body = r#"[
            {"data":"01/01/2024","valor":"0,42"},
            {"data":"01/02/2024","valor":"0.83"},
            {"data":"01/03/2024","valor":""},
            {"data":"01/04/2024","valor":null}
        ]"#;
        let obs = s.parse_page(&spec, body).unwrap();
        assert_eq!(obs.len(), 4);
        assert_eq!(obs[0].value, Some(0.42));
        assert_eq!(obs[1].value, Some(0.83));
        assert_eq!(obs[2].value, None);
        assert_eq!(obs[3].value, None);
    }

    #[test]
    fn garbage_value_is_protocol_error() {
        let s = BcbStrategy::default();
        let spec = s.catalog().get("ipca").unwrap().clone();
        assert!(s
            .parse_page(&spec, r#"[{"data":"01/01/2024","valor":"n/a"}]"#)
            .is_err());
        assert!(s.parse_page(&spec, r#"{"erro":"x"}"#).is_err());
        assert!(s
            .parse_page(&spec, r#"[{"data":"01/01/2024","valor":"NaN"}]"#)
            .is_err());
    }

    // ── Collection ──

    #[test]
    fn collects_raw_records() {
        let transport = ScriptedTransport::new().ok(
            "bcdata.sgs.433",
            r#"[{"data":"01/01/2024","valor":"0.42"},{"data":"01/02/2024","valor":"0.83"}]"#,
        );
        let c = collector(transport, 1);
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 2, 29)).unwrap();
        let mut report = c.fetch(&codes(&["ipca"]), &range).unwrap();
        let records = report.take("ipca").unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.layer == Layer::Raw
            && r.unit == Unit::Percent
            && r.collected_at == now()
            && r.source == SourceId::Bcb));
    }

    #[test]
    fn partial_month_is_fetched_whole() {
        let transport = Arc::new(ScriptedTransport::new().ok(
            "bcdata.sgs.11",
            r#"[{"data":"02/01/2024","valor":"1.0"},{"data":"16/01/2024","valor":"3.0"}]"#,
        ));
        let c = SourceCollector::new(
            BcbStrategy::new(Catalog::bcb(), "http://sgs.test"),
            transport.clone(),
            RetryPolicy::immediate(1),
            Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))),
            Arc::new(FixedClock(now())),
        );
        let range = TimeRange::new(d(2024, 1, 15), d(2024, 1, 31)).unwrap();
        let mut report = c.fetch(&codes(&["selic"]), &range).unwrap();
        let records = report.take("selic").unwrap().unwrap();

        assert_eq!(
            transport.calls(),
            vec!["http://sgs.test/bcdata.sgs.11/dados?formato=json&dataInicial=01/01/2024&dataFinal=31/01/2024"]
        );
        let dates: Vec<_> = records.iter().map(|r| r.reference_date).collect();
        assert_eq!(dates, vec![d(2024, 1, 2), d(2024, 1, 16)]);
    }

    #[test]
    fn not_found_means_empty() {
        let transport = ScriptedTransport::new()
            .route("bcdata.sgs.433", vec![Ok(HttpResponse::new(404, "not found"))]);
        let c = collector(transport, 3);
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 2, 29)).unwrap();
        let mut report = c.fetch(&codes(&["ipca"]), &range).unwrap();
        assert!(report.take("ipca").unwrap().unwrap().is_empty());
    }

    #[test]
    fn retries_transient_then_succeeds() {
        let transport = ScriptedTransport::new().route(
            "bcdata.sgs.11",
            vec![
                Err(TransportError::Timeout("slow".into())),
                Ok(HttpResponse::new(503, "")),
                Ok(HttpResponse::new(200, r#"[{"data":"02/01/2024","valor":"0,043739"}]"#)),
            ],
        );
        let transport = Arc::new(transport);
        let c = SourceCollector::new(
            BcbStrategy::new(Catalog::bcb(), "http://sgs.test"),
            transport.clone(),
            RetryPolicy::immediate(3),
            Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))),
            Arc::new(FixedClock(now())),
        );
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let mut report = c.fetch(&codes(&["selic"]), &range).unwrap();
        let records = report.take("selic").unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(transport.call_count("bcdata.sgs.11"), 3);
    }

    #[test]
    fn exhausted_retries_fail_only_that_indicator() {
        let transport = ScriptedTransport::new()
            .route("bcdata.sgs.11", vec![Ok(HttpResponse::new(500, ""))])
            .ok("bcdata.sgs.433", r#"[{"data":"01/01/2024","valor":"0.42"}]"#);
        let c = collector(transport, 2);
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let report = c.fetch(&codes(&["ipca", "selic"]), &range).unwrap();
        assert_eq!(report.succeeded().count(), 1);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "selic");
        assert!(matches!(
            failed[0].1,
            CollectError::TransientFetch { attempts: 2, .. }
        ));
    }

    #[test]
    fn client_error_is_not_retried() {
        let transport = Arc::new(
            ScriptedTransport::new().route("bcdata.sgs.433", vec![Ok(HttpResponse::new(400, "bad"))]),
        );
        let c = SourceCollector::new(
            BcbStrategy::new(Catalog::bcb(), "http://sgs.test"),
            transport.clone(),
            RetryPolicy::immediate(5),
            Arc::new(CircuitBreaker::new(10, Duration::from_secs(60))),
            Arc::new(FixedClock(now())),
        );
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let mut report = c.fetch(&codes(&["ipca"]), &range).unwrap();
        assert!(matches!(
            report.take("ipca").unwrap(),
            Err(CollectError::SourceProtocol { .. })
        ));
        assert_eq!(transport.call_count("bcdata"), 1);
    }

    #[test]
    fn open_breaker_aborts_whole_request() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        breaker.record_failure();
        let c = SourceCollector::new(
            BcbStrategy::new(Catalog::bcb(), "http://sgs.test"),
            Arc::new(ScriptedTransport::new()),
            RetryPolicy::immediate(1),
            breaker,
            Arc::new(FixedClock(now())),
        );
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let err = c.fetch(&codes(&["ipca"]), &range).unwrap_err();
        assert!(matches!(err, CollectError::SourceUnavailable { .. }));
    }

    #[test]
    fn unknown_code_rejected_before_io() {
        let transport = Arc::new(ScriptedTransport::new());
        let c = SourceCollector::new(
            BcbStrategy::new(Catalog::bcb(), "http://sgs.test"),
            transport.clone(),
            RetryPolicy::immediate(1),
            Arc::new(CircuitBreaker::default()),
            Arc::new(FixedClock(now())),
        );
        let range = TimeRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let err = c.fetch(&codes(&["ipca", "gdp"]), &range).unwrap_err();
        assert!(matches!(err, CollectError::UnknownIndicator { .. }));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn overlapping_pages_keep_last_value() {
        let transport = ScriptedTransport::new()
            .ok(
                "dataInicial=01/01/2000",
                r#"[{"data":"31/12/2009","valor":"1.0"}]"#,
            )
            .ok(
                "dataInicial=01/01/2010",
                r#"[{"data":"31/12/2009","valor":"2.0"},{"data":"04/01/2010","valor":"3.0"}]"#,
            );
        let c = collector(transport, 1);
        let range = TimeRange::new(d(2000, 1, 1), d(2010, 1, 31)).unwrap();
        let mut report = c.fetch(&codes(&["cambio"]), &range).unwrap();
        let records = report.take("cambio").unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reference_date, d(2009, 12, 31));
        assert_eq!(records[0].value, Some(2.0));
    }
}
