//! Reads promoted partitions back into records.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

use super::object_store::{ObjectStore, StoreError};
use super::payload;
use crate::domain::{IndicatorRecord, Layer, PartitionKey, SourceId, TimeRange};
use crate::transform::Lookback;

pub struct LayerReader {
    store: Arc<dyn ObjectStore>,
}

impl LayerReader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Records of one series inside `range`, ascending by reference date.
    ///
    /// A partition that fails to decode is quarantined and skipped.
    pub fn read(
        &self,
        layer: Layer,
        source: SourceId,
        indicator_code: &str,
        range: &TimeRange,
    ) -> Result<Vec<IndicatorRecord>, StoreError> {
        let mut out = Vec::new();
        for key in self
            .store
            .list_partitions(layer, source, indicator_code, range)?
        {
            out.extend(
                self.load(&key)?
                    .into_iter()
                    .filter(|r| range.contains(r.reference_date)),
            );
        }
        out.sort_by_key(|r| r.reference_date);
        Ok(out)
    }

    /// Records of one series dated before `start`, newest partitions first,
    /// until `lookback` is covered or the series runs out. Ascending.
    pub fn read_before(
        &self,
        layer: Layer,
        source: SourceId,
        indicator_code: &str,
        start: NaiveDate,
        lookback: &Lookback,
    ) -> Result<Vec<IndicatorRecord>, StoreError> {
        let mut keys = self.store.list_series(layer, source, indicator_code)?;
        keys.retain(|k| k.first_day().is_some_and(|d| d < start));

        let mut out = Vec::new();
        for key in keys.iter().rev() {
            if lookback.is_covered(&out, start) {
                break;
            }
            out.extend(
                self.load(key)?
                    .into_iter()
                    .filter(|r| r.reference_date < start),
            );
        }
        out.sort_by_key(|r| r.reference_date);
        debug!(
            layer = %layer,
            source = %source,
            indicator = indicator_code,
            records = out.len(),
            "lookback read"
        );
        Ok(out)
    }

    fn load(&self, key: &PartitionKey) -> Result<Vec<IndicatorRecord>, StoreError> {
        let Some(bytes) = self.store.get_partition(key)? else {
            return Ok(Vec::new());
        };
        match payload::decode(&bytes) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(partition = %key, error = %e, "quarantining unreadable partition");
                self.store.quarantine_partition(key)?;
                Ok(Vec::new())
            }
        }
    }
}
