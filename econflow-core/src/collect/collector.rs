//! Collector capability and the shared collection skeleton.
//!
//! Every source is driven by [`SourceCollector`]: it plans pages through a
//! [`SourceStrategy`], fetches each page with retry and the circuit breaker,
//! lets the strategy parse the body, and turns the observations into raw
//! [`IndicatorRecord`]s. Strategies only know URLs and payload formats.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryPolicy;
use super::transport::HttpTransport;
use crate::domain::{Catalog, CatalogError, IndicatorRecord, IndicatorSpec, SourceId, TimeRange};

// ── Clock ───────────────────────────────────────────────────────────

/// Source of `collected_at` stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ── Errors and reports ──────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum CollectError {
    #[error("{source_id}/{code}: gave up after {attempts} attempts: {reason}")]
    TransientFetch {
        source_id: SourceId,
        code: String,
        attempts: u32,
        reason: String,
    },

    #[error("{source_id}/{code}: unexpected response: {reason}")]
    SourceProtocol {
        source_id: SourceId,
        code: String,
        reason: String,
    },

    #[error("source {source_id} unavailable: circuit breaker open ({remaining_secs}s left)")]
    SourceUnavailable {
        source_id: SourceId,
        remaining_secs: u64,
    },

    #[error("indicator '{code}' is not in the {source_id} catalog")]
    UnknownIndicator { source_id: SourceId, code: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl CollectError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectError::TransientFetch { .. } | CollectError::SourceUnavailable { .. }
        )
    }
}

/// Per-indicator outcome of one fetch call.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub source: SourceId,
    pub outcomes: BTreeMap<String, Result<Vec<IndicatorRecord>, CollectError>>,
}

impl FetchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &[IndicatorRecord])> {
        self.outcomes
            .iter()
            .filter_map(|(code, r)| r.as_ref().ok().map(|recs| (code.as_str(), recs.as_slice())))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &CollectError)> {
        self.outcomes
            .iter()
            .filter_map(|(code, r)| r.as_ref().err().map(|e| (code.as_str(), e)))
    }

    /// Take the outcome of one indicator out of the report.
    pub fn take(&mut self, code: &str) -> Option<Result<Vec<IndicatorRecord>, CollectError>> {
        self.outcomes.remove(code)
    }
}

/// Capability every source collector offers.
pub trait Collector: Send + Sync {
    fn source(&self) -> SourceId;

    fn catalog(&self) -> &Catalog;

    /// Codes this collector can fetch.
    fn list_indicators(&self) -> Result<Vec<String>, CatalogError>;

    /// Fetch raw records for `codes` over `range`.
    ///
    /// Failures of one indicator are reported in its slot and never affect
    /// the others. The whole call fails only when the request cannot start.
    fn fetch(&self, codes: &[String], range: &TimeRange) -> Result<FetchReport, CollectError>;
}

// ── Strategy ────────────────────────────────────────────────────────

/// One parsed data point, before it becomes a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub reference_date: NaiveDate,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Source-specific part of a collector.
pub trait SourceStrategy: Send + Sync {
    fn source(&self) -> SourceId;

    fn catalog(&self) -> &Catalog;

    /// URLs covering `range`, in order. Later pages win on overlapping dates.
    fn page_urls(&self, spec: &IndicatorSpec, range: &TimeRange) -> Vec<String>;

    fn parse_page(&self, spec: &IndicatorSpec, body: &str) -> Result<Vec<Observation>, ParseError>;

    /// HTTP statuses that mean "no data for this page".
    fn empty_statuses(&self) -> &[u16] {
        &[]
    }
}

// ── Skeleton ────────────────────────────────────────────────────────

pub struct SourceCollector<S> {
    strategy: S,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl<S: SourceStrategy> SourceCollector<S> {
    pub fn new(
        strategy: S,
        transport: Arc<dyn HttpTransport>,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            strategy,
            transport,
            retry,
            breaker,
            clock,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    fn unavailable(&self) -> CollectError {
        CollectError::SourceUnavailable {
            source_id: self.strategy.source(),
            remaining_secs: self.breaker.remaining_cooldown().as_secs(),
        }
    }

    /// GET one page. `Ok(None)` means the source reported no data.
    fn get_page(&self, spec: &IndicatorSpec, url: &str) -> Result<Option<String>, CollectError> {
        let source_id = self.strategy.source();
        let attempts = self.retry.attempts();
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=attempts {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if !self.breaker.is_allowed() {
                return Err(self.unavailable());
            }

            match self.transport.get(url) {
                Ok(resp) if resp.is_success() => {
                    self.breaker.record_success();
                    return Ok(Some(resp.body));
                }
                Ok(resp) if self.strategy.empty_statuses().contains(&resp.status) => {
                    self.breaker.record_success();
                    debug!(source = %source_id, code = %spec.code, status = resp.status, "empty page");
                    return Ok(None);
                }
                Ok(resp) if resp.is_retryable() => {
                    self.breaker.record_failure();
                    last_reason = format!("HTTP {}", resp.status);
                }
                Ok(resp) => {
                    return Err(CollectError::SourceProtocol {
                        source_id,
                        code: spec.code.clone(),
                        reason: format!("HTTP {} for {url}", resp.status),
                    });
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure();
                    last_reason = e.to_string();
                }
                Err(e) => {
                    return Err(CollectError::SourceProtocol {
                        source_id,
                        code: spec.code.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            warn!(
                source = %source_id,
                code = %spec.code,
                attempt,
                max_attempts = attempts,
                reason = %last_reason,
                "page fetch failed"
            );
        }

        Err(CollectError::TransientFetch {
            source_id,
            code: spec.code.clone(),
            attempts,
            reason: last_reason,
        })
    }

    fn collect_indicator(
        &self,
        spec: &IndicatorSpec,
        range: &TimeRange,
    ) -> Result<Vec<IndicatorRecord>, CollectError> {
        let source_id = self.strategy.source();
        // A raw partition holds a whole month, so ask the agency for whole months.
        let window = range.to_month_bounds();
        let mut by_date: BTreeMap<NaiveDate, Option<f64>> = BTreeMap::new();

        for url in self.strategy.page_urls(spec, &window) {
            let Some(body) = self.get_page(spec, &url)? else {
                continue;
            };
            let observations =
                self.strategy
                    .parse_page(spec, &body)
                    .map_err(|e| CollectError::SourceProtocol {
                        source_id,
                        code: spec.code.clone(),
                        reason: e.0,
                    })?;
            for obs in observations {
                if window.contains(obs.reference_date) {
                    by_date.insert(obs.reference_date, obs.value);
                }
            }
        }

        let collected_at = self.clock.now();
        let records: Vec<IndicatorRecord> = by_date
            .into_iter()
            .map(|(date, value)| {
                IndicatorRecord::raw(
                    source_id,
                    spec.code.clone(),
                    date,
                    value,
                    spec.raw_unit,
                    collected_at,
                )
            })
            .collect();
        info!(source = %source_id, code = %spec.code, records = records.len(), "collected");
        Ok(records)
    }
}

impl<S: SourceStrategy> Collector for SourceCollector<S> {
    fn source(&self) -> SourceId {
        self.strategy.source()
    }

    fn catalog(&self) -> &Catalog {
        self.strategy.catalog()
    }

    fn list_indicators(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.strategy.catalog().codes().into_iter().collect())
    }

    fn fetch(&self, codes: &[String], range: &TimeRange) -> Result<FetchReport, CollectError> {
        let source_id = self.strategy.source();
        let catalog = self.strategy.catalog();
        let specs = codes
            .iter()
            .map(|code| {
                catalog
                    .get(code)
                    .ok_or_else(|| CollectError::UnknownIndicator {
                        source_id,
                        code: code.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !self.breaker.is_allowed() {
            return Err(self.unavailable());
        }

        let mut outcomes = BTreeMap::new();
        for spec in specs {
            let outcome = self.collect_indicator(spec, range);
            if let Err(e) = &outcome {
                warn!(source = %source_id, code = %spec.code, error = %e, "collection failed");
            }
            outcomes.insert(spec.code.clone(), outcome);
        }
        Ok(FetchReport {
            source: source_id,
            outcomes,
        })
    }
}

/// Parse a decimal published with either `.` or `,` as separator.
///
/// `1.234,56` (dot thousands, comma decimals) is accepted too. `NaN` and
/// infinities are not numbers an agency publishes, so they fail to parse.
pub(crate) fn parse_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = if s.contains(',') {
        s.replace('.', "").replace(',', ".")
    } else {
        s.to_string()
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_separators() {
        assert_eq!(parse_decimal("0.42"), Some(0.42));
        assert_eq!(parse_decimal(" 0,42 "), Some(0.42));
        assert_eq!(parse_decimal("1.234,5"), Some(1234.5));
        assert_eq!(parse_decimal("-0,1"), Some(-0.1));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn non_finite_text_is_not_a_decimal() {
        for raw in ["NaN", "nan", "inf", "-inf", "infinity", "-Infinity", "1e999"] {
            assert_eq!(parse_decimal(raw), None, "{raw}");
        }
    }
}
