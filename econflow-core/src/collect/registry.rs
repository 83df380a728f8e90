//! Explicit registry of collectors, keyed by source id.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use super::bcb::{self, BcbStrategy};
use super::circuit_breaker::{BreakerConfig, CircuitBreaker};
use super::collector::{Clock, Collector, SourceCollector};
use super::ibge::{self, IbgeStrategy};
use super::retry::RetryPolicy;
use super::transport::HttpTransport;
use crate::domain::{Catalog, CatalogError, IndicatorSelection, SourceId};

/// Settings shared by the built-in collectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub bcb_base_url: String,
    pub ibge_base_url: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            timeout_secs: 30,
            user_agent: concat!("econflow/", env!("CARGO_PKG_VERSION")).to_string(),
            bcb_base_url: bcb::DEFAULT_BASE_URL.to_string(),
            ibge_base_url: ibge::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("source {source_id} does not support: {}", .codes.join(", "))]
    UnsupportedIndicator {
        source_id: SourceId,
        codes: Vec<String>,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Default, Clone)]
pub struct CollectorRegistry {
    collectors: BTreeMap<SourceId, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `bcb` and `ibge` with their built-in catalogs.
    pub fn with_defaults(
        settings: &CollectorSettings,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_catalogs(
            settings,
            vec![Catalog::bcb(), Catalog::ibge()],
            transport,
            clock,
        )
    }

    /// Built-in collectors driven by the given catalogs, one per source.
    pub fn with_catalogs(
        settings: &CollectorSettings,
        catalogs: Vec<Catalog>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut registry = Self::new();
        for catalog in catalogs {
            let breaker = Arc::new(CircuitBreaker::from_config(&settings.breaker));
            let collector: Arc<dyn Collector> = match catalog.source() {
                SourceId::Bcb => Arc::new(SourceCollector::new(
                    BcbStrategy::new(catalog, settings.bcb_base_url.clone()),
                    transport.clone(),
                    settings.retry,
                    breaker,
                    clock.clone(),
                )),
                SourceId::Ibge => Arc::new(SourceCollector::new(
                    IbgeStrategy::new(catalog, settings.ibge_base_url.clone()),
                    transport.clone(),
                    settings.retry,
                    breaker,
                    clock.clone(),
                )),
            };
            registry.register(collector);
        }
        registry
    }

    /// Add a collector, replacing any previous one for the same source.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.insert(collector.source(), collector);
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.collectors.keys().copied().collect()
    }

    pub fn get(&self, source: SourceId) -> Option<Arc<dyn Collector>> {
        self.collectors.get(&source).cloned()
    }

    pub fn create(&self, source_id: &str) -> Result<Arc<dyn Collector>, RegistryError> {
        let source: SourceId = source_id
            .parse()
            .map_err(|_| RegistryError::UnknownSource(source_id.to_string()))?;
        self.get(source)
            .ok_or_else(|| RegistryError::UnknownSource(source_id.to_string()))
    }

    /// Expand a selection into catalog codes.
    ///
    /// Requested codes keep their order with duplicates removed. Any code the
    /// catalog does not list fails the whole selection.
    pub fn resolve_indicators(
        &self,
        source_id: &str,
        selection: &IndicatorSelection,
    ) -> Result<Vec<String>, RegistryError> {
        let collector = self.create(source_id)?;
        let available: BTreeSet<String> = collector.list_indicators()?.into_iter().collect();
        match selection {
            IndicatorSelection::All => Ok(available.into_iter().collect()),
            IndicatorSelection::Codes(codes) => {
                let mut seen = BTreeSet::new();
                let requested: Vec<String> = codes
                    .iter()
                    .filter(|c| seen.insert(c.as_str()))
                    .cloned()
                    .collect();
                let unsupported: Vec<String> = requested
                    .iter()
                    .filter(|c| !available.contains(*c))
                    .cloned()
                    .collect();
                if !unsupported.is_empty() {
                    return Err(RegistryError::UnsupportedIndicator {
                        source_id: collector.source(),
                        codes: unsupported,
                    });
                }
                Ok(requested)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::collector::SystemClock;
    use crate::collect::fake::ScriptedTransport;

    fn registry() -> CollectorRegistry {
        CollectorRegistry::with_defaults(
            &CollectorSettings::default(),
            Arc::new(ScriptedTransport::new()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn defaults_register_both_sources() {
        assert_eq!(registry().sources(), vec![SourceId::Bcb, SourceId::Ibge]);
    }

    #[test]
    fn create_parses_source_id() {
        let r = registry();
        assert_eq!(r.create("IBGE").unwrap().source(), SourceId::Ibge);
        assert!(matches!(r.create("fred"), Err(RegistryError::UnknownSource(_))));
        assert!(matches!(
            CollectorRegistry::new().create("bcb"),
            Err(RegistryError::UnknownSource(_))
        ));
    }

    #[test]
    fn all_expands_to_catalog() {
        let codes = registry()
            .resolve_indicators("bcb", &IndicatorSelection::All)
            .unwrap();
        assert_eq!(codes, vec!["cambio", "desemprego", "ipca", "pib", "selic"]);
    }

    #[test]
    fn requested_codes_dedup_in_order() {
        let codes = registry()
            .resolve_indicators("bcb", &IndicatorSelection::codes(["selic", "ipca", "selic"]))
            .unwrap();
        assert_eq!(codes, vec!["selic", "ipca"]);
    }

    #[test]
    fn unsupported_codes_are_all_listed() {
        let err = registry()
            .resolve_indicators("ibge", &IndicatorSelection::codes(["inpc", "gdp", "cpi"]))
            .unwrap_err();
        match err {
            RegistryError::UnsupportedIndicator { source_id, codes } => {
                assert_eq!(source_id, SourceId::Ibge);
                assert_eq!(codes, vec!["gdp", "cpi"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
