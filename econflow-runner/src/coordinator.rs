//! Pipeline coordinator.
//!
//! A batch of collection requests expands into `(source, indicator)` units.
//! Units run in parallel on a bounded rayon pool; inside a unit the stages
//! run in order: collect into raw, standardize, aggregate. A failure is
//! recorded against its unit and never aborts the siblings.

use econflow_core::collect::{
    Clock, CollectError, Collector, CollectorRegistry, HttpTransport,
};
use econflow_core::domain::{IndicatorRecord, Layer, SourceId, TimeRange};
use econflow_core::schema::SchemaValidator;
use econflow_core::store::{
    LayerReader, LayerWriter, LocalObjectStore, ObjectStore, SeriesSpan, StoreError, WriteError,
    WriteMode, WriteSummary,
};
use econflow_core::transform::{
    aggregate_series, build_panel, standardize, AggregateOptions, JoinedPanel, StandardizeContext,
};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::request::{CollectionRequest, RequestError, TransformRequest};
use crate::summary::{
    BatchReport, LogNotifier, NotificationSink, RequestFailure, Stage, UnitCounts, UnitOutcome,
    UnitReport, UnitState,
};

/// Why a stage of a unit failed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Read(#[from] StoreError),

    #[error("indicator '{code}' is missing from the {source_id} catalog")]
    MissingSpec { source_id: SourceId, code: String },
}

/// Tuning the coordinator takes at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub write_mode: WriteMode,
    pub max_workers: usize,
    pub aggregate: AggregateOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            max_workers: 4,
            aggregate: AggregateOptions::default(),
        }
    }
}

/// Result of [`Pipeline::transform`], one entry per indicator.
#[derive(Debug, Default)]
pub struct TransformReport {
    pub outcomes: BTreeMap<String, Result<UnitCounts, StageError>>,
    pub panel: Option<JoinedPanel>,
}

impl TransformReport {
    pub fn failed(&self) -> usize {
        self.outcomes.values().filter(|r| r.is_err()).count()
    }
}

struct UnitPlan {
    collector: Arc<dyn Collector>,
    code: String,
    range: TimeRange,
}

struct UnitRun {
    report: UnitReport,
    aggregated: Vec<IndicatorRecord>,
}

pub struct Pipeline {
    registry: CollectorRegistry,
    validator: Arc<SchemaValidator>,
    writer: LayerWriter,
    reader: LayerReader,
    options: PipelineOptions,
    notifier: Arc<dyn NotificationSink>,
}

impl Pipeline {
    pub fn new(
        registry: CollectorRegistry,
        store: Arc<dyn ObjectStore>,
        validator: Arc<SchemaValidator>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            writer: LayerWriter::new(store.clone(), validator.clone(), options.write_mode),
            reader: LayerReader::new(store),
            validator,
            options,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Local store, built-in collectors and catalogs with config overrides.
    pub fn from_config(
        config: &PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let catalogs = config.catalogs()?;
        let validator = Arc::new(SchemaValidator::new(catalogs.clone()));
        let registry =
            CollectorRegistry::with_catalogs(&config.collector, catalogs, transport, clock);
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(config.store.root.clone()));
        let options = PipelineOptions {
            write_mode: config.store.write_mode,
            max_workers: config.pipeline.max_workers,
            aggregate: config.aggregate_options(),
        };
        Ok(Self::new(registry, store, validator, options))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    pub fn reader(&self) -> &LayerReader {
        &self.reader
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    // ─── Full batch ───────────────────────────────────────────────────

    /// Run every unit of `requests` through all stages.
    ///
    /// Requests that fail validation are reported without touching the
    /// network or the store. Once `cancel` is set no further unit starts;
    /// units already running finish their current stage sequence.
    pub fn run(&self, requests: &[CollectionRequest], cancel: &AtomicBool) -> BatchReport {
        self.run_through(requests, cancel, Layer::Aggregated)
    }

    /// Like [`Pipeline::run`] but stops once the raw layer is written.
    pub fn collect(&self, requests: &[CollectionRequest], cancel: &AtomicBool) -> BatchReport {
        self.run_through(requests, cancel, Layer::Raw)
    }

    fn run_through(
        &self,
        requests: &[CollectionRequest],
        cancel: &AtomicBool,
        last: Layer,
    ) -> BatchReport {
        let (plans, rejected_requests) = self.plan(requests);
        info!(
            requests = requests.len(),
            units = plans.len(),
            rejected = rejected_requests.len(),
            workers = self.options.max_workers,
            through = %last,
            "starting batch"
        );

        let runs: Vec<UnitRun> = self.install(|| {
            plans
                .par_iter()
                .map(|plan| self.run_unit(plan, cancel, last))
                .collect()
        });

        let mut units = Vec::with_capacity(runs.len());
        let mut finished_series = Vec::new();
        for run in runs {
            if matches!(
                run.report.outcome(),
                UnitOutcome::Succeeded | UnitOutcome::Quarantined
            ) && !run.aggregated.is_empty()
            {
                finished_series.push(run.aggregated);
            }
            units.push(run.report);
        }

        let panel = (self.options.aggregate.join && finished_series.len() >= 2)
            .then(|| build_panel(&finished_series, self.options.aggregate.gap_policy));

        let report = BatchReport {
            units,
            rejected_requests,
            panel,
        };
        self.notifier.notify(&report.summary(), &report);
        report
    }

    fn plan(&self, requests: &[CollectionRequest]) -> (Vec<UnitPlan>, Vec<RequestFailure>) {
        let mut plans = Vec::new();
        let mut failures = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            let resolved = self
                .registry
                .resolve_indicators(&request.source, &request.indicators)
                .and_then(|codes| Ok((self.registry.create(&request.source)?, codes)));
            match resolved {
                Ok((collector, codes)) => plans.extend(codes.into_iter().map(|code| UnitPlan {
                    collector: collector.clone(),
                    code,
                    range: request.range,
                })),
                Err(e) => failures.push(RequestFailure {
                    index,
                    source: request.source.clone(),
                    error: RequestError::from(e),
                }),
            }
        }
        (plans, failures)
    }

    fn run_unit(&self, plan: &UnitPlan, cancel: &AtomicBool, last: Layer) -> UnitRun {
        let source = plan.collector.source();
        let mut report = UnitReport::new(source, plan.code.clone());
        let mut aggregated = Vec::new();

        if cancel.load(Ordering::Relaxed) {
            debug!(source = %source, indicator = %plan.code, "cancelled before dispatch");
            return UnitRun { report, aggregated };
        }

        report.transition(UnitState::Collecting);
        if let Err(e) = self.collect_stage(plan, &mut report.counts) {
            report.fail(Stage::Collecting, e.to_string());
            return UnitRun { report, aggregated };
        }
        if last == Layer::Raw {
            report.transition(UnitState::Done);
            return UnitRun { report, aggregated };
        }

        report.transition(UnitState::Standardizing);
        if let Err(e) = self.standardize_stage(
            plan.collector.as_ref(),
            &plan.code,
            &plan.range,
            &mut report.counts,
        ) {
            report.fail(Stage::Standardizing, e.to_string());
            return UnitRun { report, aggregated };
        }

        report.transition(UnitState::Aggregating);
        match self.aggregate_stage(source, &plan.code, &plan.range, &mut report.counts) {
            Ok(records) => {
                aggregated = records;
                report.transition(UnitState::Done);
            }
            Err(e) => report.fail(Stage::Aggregating, e.to_string()),
        }
        if let UnitState::Failed { stage, reason } = &report.state {
            warn!(source = %source, indicator = %plan.code, stage = %stage, reason = %reason, "unit failed");
        }
        UnitRun { report, aggregated }
    }

    // ─── Stages ───────────────────────────────────────────────────────

    fn collect_stage(&self, plan: &UnitPlan, counts: &mut UnitCounts) -> Result<(), StageError> {
        let mut fetched = plan
            .collector
            .fetch(std::slice::from_ref(&plan.code), &plan.range)?;
        let records = fetched.take(&plan.code).transpose()?.unwrap_or_default();
        counts.raw_records = records.len();
        let summary = self.writer.write(&records, Layer::Raw)?;
        absorb(counts, &summary);
        Ok(())
    }

    /// Raw partitions of the range's months → standardized layer.
    ///
    /// Each standardized month of the range ends up as `standardize` makes
    /// it from the raw month, removed if nothing valid comes out.
    fn standardize_stage(
        &self,
        collector: &dyn Collector,
        code: &str,
        range: &TimeRange,
        counts: &mut UnitCounts,
    ) -> Result<(), StageError> {
        let source = collector.source();
        let spec = collector
            .catalog()
            .get(code)
            .ok_or_else(|| StageError::MissingSpec {
                source_id: source,
                code: code.to_string(),
            })?;
        let months = range.to_month_bounds();
        let raw = self.reader.read(Layer::Raw, source, code, &months)?;
        let out = standardize(
            &raw,
            &StandardizeContext {
                spec,
                validator: &self.validator,
            },
        );
        counts.duplicates_dropped += out.duplicates_dropped;
        counts.standardized_records = out.records.len();

        let span = SeriesSpan {
            layer: Layer::Standardized,
            source,
            indicator_code: code,
            range: &months,
        };
        let summary = self.writer.replace_span(span, &out.records, &out.rejected)?;
        absorb(counts, &summary);
        Ok(())
    }

    /// Standardized → aggregated for the range's months.
    ///
    /// Metrics are computed over enough earlier history that a month's
    /// aggregated partition does not depend on where the range starts.
    fn aggregate_stage(
        &self,
        source: SourceId,
        code: &str,
        range: &TimeRange,
        counts: &mut UnitCounts,
    ) -> Result<Vec<IndicatorRecord>, StageError> {
        let months = range.to_month_bounds();
        let mut standardized = self.reader.read_before(
            Layer::Standardized,
            source,
            code,
            months.start(),
            &self.options.aggregate.lookback(),
        )?;
        let history = standardized.len();
        standardized.extend(self.reader.read(Layer::Standardized, source, code, &months)?);

        let mut aggregated = aggregate_series(&standardized, &self.options.aggregate);
        aggregated.retain(|r| months.contains(r.reference_date));
        counts.aggregated_records = aggregated.len();
        debug!(source = %source, indicator = code, history, records = aggregated.len(), "aggregated");

        let span = SeriesSpan {
            layer: Layer::Aggregated,
            source,
            indicator_code: code,
            range: &months,
        };
        let summary = self.writer.replace_span(span, &aggregated, &[])?;
        absorb(counts, &summary);
        Ok(aggregated)
    }

    // ─── Transform only ───────────────────────────────────────────────

    /// Re-run one transform over data already in the store.
    pub fn transform(&self, request: &TransformRequest) -> Result<TransformReport, RequestError> {
        request.check_layers()?;
        let codes = self
            .registry
            .resolve_indicators(&request.source, &request.indicators)?;
        let collector = self.registry.create(&request.source)?;
        info!(
            source = %collector.source(),
            from = %request.from,
            to = %request.to,
            indicators = codes.len(),
            range = %request.range,
            "starting transform"
        );

        let results: Vec<(String, Result<(UnitCounts, Vec<IndicatorRecord>), StageError>)> =
            self.install(|| {
                codes
                    .par_iter()
                    .map(|code| {
                        let mut counts = UnitCounts::default();
                        let result = match request.to {
                            Layer::Standardized => self
                                .standardize_stage(
                                    collector.as_ref(),
                                    code,
                                    &request.range,
                                    &mut counts,
                                )
                                .map(|()| Vec::new()),
                            _ => self.aggregate_stage(
                                collector.source(),
                                code,
                                &request.range,
                                &mut counts,
                            ),
                        };
                        (code.clone(), result.map(|records| (counts, records)))
                    })
                    .collect()
            });

        let mut report = TransformReport::default();
        let mut series = Vec::new();
        for (code, result) in results {
            let outcome = result.map(|(counts, records)| {
                if !records.is_empty() {
                    series.push(records);
                }
                counts
            });
            if let Err(e) = &outcome {
                warn!(indicator = %code, error = %e, "transform failed");
            }
            report.outcomes.insert(code, outcome);
        }
        if self.options.aggregate.join && series.len() >= 2 {
            report.panel = Some(build_panel(&series, self.options.aggregate.gap_policy));
        }
        Ok(report)
    }

    /// Run `f` on a pool of `max_workers` threads, or inline if the pool
    /// cannot be built.
    fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_workers.max(1))
            .build()
        {
            Ok(pool) => pool.install(f),
            Err(e) => {
                warn!(error = %e, "failed to build worker pool, running on the caller's thread");
                f()
            }
        }
    }
}

fn absorb(counts: &mut UnitCounts, summary: &WriteSummary) {
    counts.records_quarantined += summary.records_quarantined;
    counts.partitions_written += summary.partitions_written;
    counts.partitions_unchanged += summary.partitions_unchanged;
    counts.partitions_removed += summary.partitions_removed;
}
