//! Layered, partitioned, idempotent writes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::object_store::{ObjectStore, StoreError};
use super::payload::{self, CodecError};
use crate::domain::{IndicatorRecord, Layer, PartitionKey, SourceId, TimeRange};
use crate::schema::{SchemaValidator, ValidationResult, Violation};

/// What to do with records that fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Refuse the whole write if any record is invalid.
    Strict,
    /// Divert invalid records to the rejected area and write the rest.
    #[default]
    Quarantine,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteMode::Strict => "strict",
            WriteMode::Quarantine => "quarantine",
        })
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(WriteMode::Strict),
            "quarantine" => Ok(WriteMode::Quarantine),
            other => Err(format!("unknown write mode '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("partition {key} rejected: {} violation(s), first: {}", .violations.len(), first_violation(.violations))]
    Rejected {
        key: PartitionKey,
        violations: Vec<Violation>,
    },

    #[error("partition {key} has more than one record for {reference_date}")]
    DuplicateKey {
        key: PartitionKey,
        reference_date: NaiveDate,
    },

    #[error("failed to write partition {key}: {source}")]
    Partition {
        key: PartitionKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to list stored partitions: {0}")]
    Listing(#[source] StoreError),

    #[error("failed to encode partition {key}: {source}")]
    Codec {
        key: PartitionKey,
        #[source]
        source: CodecError,
    },
}

fn first_violation(violations: &[Violation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Line of the rejected-records file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub record: IndicatorRecord,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub partitions_written: usize,
    pub partitions_unchanged: usize,
    /// Stored partitions deleted because nothing valid is left for them.
    pub partitions_removed: usize,
    /// Partitions with nothing valid to store and nothing stored before.
    pub partitions_skipped: usize,
    pub partitions_quarantined: usize,
    pub records_written: usize,
    pub records_quarantined: usize,
    /// blake3 of each payload now stored, by partition.
    pub hashes: BTreeMap<PartitionKey, String>,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.partitions_written += other.partitions_written;
        self.partitions_unchanged += other.partitions_unchanged;
        self.partitions_removed += other.partitions_removed;
        self.partitions_skipped += other.partitions_skipped;
        self.partitions_quarantined += other.partitions_quarantined;
        self.records_written += other.records_written;
        self.records_quarantined += other.records_quarantined;
        self.hashes.extend(other.hashes);
    }
}

/// One series over a span of months, rewritten as a whole.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSpan<'a> {
    pub layer: Layer,
    pub source: SourceId,
    pub indicator_code: &'a str,
    pub range: &'a TimeRange,
}

#[derive(Default)]
struct PartitionInput<'a> {
    records: Vec<&'a IndicatorRecord>,
    /// Rejected upstream, before reaching the writer.
    diverted: Vec<&'a RejectedRecord>,
}

struct PartitionPlan {
    key: PartitionKey,
    valid: Vec<IndicatorRecord>,
    rejected: Vec<RejectedRecord>,
}

pub struct LayerWriter {
    store: Arc<dyn ObjectStore>,
    validator: Arc<SchemaValidator>,
    mode: WriteMode,
}

impl LayerWriter {
    pub fn new(store: Arc<dyn ObjectStore>, validator: Arc<SchemaValidator>, mode: WriteMode) -> Self {
        Self {
            store,
            validator,
            mode,
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Write `records` into `layer`, one partition per `(source, code, month)`.
    ///
    /// Every partition is planned and validated before any is touched, so a
    /// strict-mode rejection or a duplicate key leaves the store unchanged.
    /// A partition whose records are all rejected is removed.
    pub fn write(&self, records: &[IndicatorRecord], layer: Layer) -> Result<WriteSummary, WriteError> {
        let mut groups: BTreeMap<PartitionKey, PartitionInput<'_>> = BTreeMap::new();
        for record in records {
            groups
                .entry(PartitionKey::for_record(record, layer))
                .or_default()
                .records
                .push(record);
        }
        self.apply(groups, layer)
    }

    /// Rewrite every month of `span` so the layer holds exactly what
    /// `records` make of it.
    ///
    /// `diverted` are records a transform already rejected; they join the
    /// validator's rejections in the rejected area (strict mode refuses
    /// them). Stored partitions of the span left without a valid record are
    /// removed. Records outside the span are ignored.
    pub fn replace_span(
        &self,
        span: SeriesSpan<'_>,
        records: &[IndicatorRecord],
        diverted: &[RejectedRecord],
    ) -> Result<WriteSummary, WriteError> {
        let bounds = span.range.to_month_bounds();
        let in_span = |r: &IndicatorRecord| {
            r.source == span.source
                && r.indicator_code == span.indicator_code
                && bounds.contains(r.reference_date)
        };

        let mut groups: BTreeMap<PartitionKey, PartitionInput<'_>> = BTreeMap::new();
        for record in records.iter().filter(|r| in_span(*r)) {
            groups
                .entry(PartitionKey::for_record(record, span.layer))
                .or_default()
                .records
                .push(record);
        }
        for line in diverted.iter().filter(|l| in_span(&l.record)) {
            groups
                .entry(PartitionKey::for_record(&line.record, span.layer))
                .or_default()
                .diverted
                .push(line);
        }
        for key in self
            .store
            .list_partitions(span.layer, span.source, span.indicator_code, &bounds)
            .map_err(WriteError::Listing)?
        {
            groups.entry(key).or_default();
        }
        self.apply(groups, span.layer)
    }

    fn apply(
        &self,
        groups: BTreeMap<PartitionKey, PartitionInput<'_>>,
        layer: Layer,
    ) -> Result<WriteSummary, WriteError> {
        let mut plans = Vec::with_capacity(groups.len());
        for (key, input) in groups {
            plans.push(self.plan(key, input, layer)?);
        }

        let mut summary = WriteSummary::default();
        for plan in plans {
            self.execute(plan, &mut summary)?;
        }
        info!(
            layer = %layer,
            written = summary.partitions_written,
            unchanged = summary.partitions_unchanged,
            removed = summary.partitions_removed,
            quarantined = summary.records_quarantined,
            "layer write complete"
        );
        Ok(summary)
    }

    fn plan(
        &self,
        key: PartitionKey,
        input: PartitionInput<'_>,
        layer: Layer,
    ) -> Result<PartitionPlan, WriteError> {
        let mut seen = BTreeSet::new();
        for record in &input.records {
            if !seen.insert(record.reference_date) {
                return Err(WriteError::DuplicateKey {
                    key,
                    reference_date: record.reference_date,
                });
            }
        }

        let mut valid = Vec::with_capacity(input.records.len());
        let mut rejected: Vec<RejectedRecord> =
            input.diverted.into_iter().cloned().collect();
        for record in input.records {
            match self.validator.validate(record, layer) {
                ValidationResult::Pass => valid.push(record.clone()),
                ValidationResult::Fail(violations) => rejected.push(RejectedRecord {
                    record: record.clone(),
                    violations,
                }),
            }
        }

        if self.mode == WriteMode::Strict && !rejected.is_empty() {
            let violations = rejected.into_iter().flat_map(|r| r.violations).collect();
            return Err(WriteError::Rejected { key, violations });
        }
        Ok(PartitionPlan {
            key,
            valid,
            rejected,
        })
    }

    fn execute(&self, plan: PartitionPlan, summary: &mut WriteSummary) -> Result<(), WriteError> {
        let PartitionPlan {
            key,
            valid,
            rejected,
        } = plan;
        let store_err = |source: StoreError| WriteError::Partition {
            key: key.clone(),
            source,
        };

        if rejected.is_empty() {
            self.store.remove_rejected(&key).map_err(store_err)?;
        } else {
            let mut lines = Vec::new();
            for line in &rejected {
                // Violations and records are plain data; serializing them cannot fail.
                if let Ok(json) = serde_json::to_vec(line) {
                    lines.extend_from_slice(&json);
                    lines.push(b'\n');
                }
            }
            self.store.put_rejected(&key, &lines).map_err(store_err)?;
            warn!(partition = %key, records = rejected.len(), "records quarantined");
            summary.partitions_quarantined += 1;
            summary.records_quarantined += rejected.len();
        }

        if valid.is_empty() {
            if self.store.remove_partition(&key).map_err(store_err)? {
                info!(partition = %key, "no valid records left, partition removed");
                summary.partitions_removed += 1;
            } else {
                debug!(partition = %key, "nothing to store");
                summary.partitions_skipped += 1;
            }
            return Ok(());
        }

        let bytes = payload::encode(&valid).map_err(|source| WriteError::Codec {
            key: key.clone(),
            source,
        })?;
        let hash = blake3::hash(&bytes).to_hex().to_string();

        let existing = self.store.get_partition(&key).map_err(store_err)?;
        let unchanged = existing
            .as_deref()
            .is_some_and(|old| blake3::hash(old).to_hex().as_str() == hash);

        if unchanged {
            summary.partitions_unchanged += 1;
        } else {
            self.store.put_partition(&key, &bytes).map_err(store_err)?;
            summary.partitions_written += 1;
            summary.records_written += valid.len();
        }
        summary.hashes.insert(key, hash);
        Ok(())
    }
}
