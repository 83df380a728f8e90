//! econflow runner: batch coordination on top of `econflow-core`.
//!
//! - Pipeline configuration (TOML, `.env`, environment overrides)
//! - Collection and transform requests
//! - The coordinator: per-unit state machine on a bounded worker pool
//! - Batch summary and notification
//! - CSV / JSON export

pub mod config;
pub mod coordinator;
pub mod export;
pub mod request;
pub mod summary;

pub use config::{BoundsOverride, ConfigError, PipelineConfig, PipelineSection, StoreSection};
pub use coordinator::{Pipeline, PipelineOptions, StageError, TransformReport};
pub use export::{export_panel_csv, export_records_csv, export_report_json};
pub use request::{CollectionRequest, RequestError, TransformRequest};
pub use summary::{
    BatchReport, BatchSummary, LogNotifier, NotificationSink, RequestFailure, Stage, UnitCounts,
    UnitOutcome, UnitReport, UnitState,
};
