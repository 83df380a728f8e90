//! Layered object store: raw, standardized and aggregated partitions.

pub mod object_store;
pub mod payload;
pub mod reader;
pub mod writer;

pub use object_store::{LocalObjectStore, ObjectStore, StoreError};
pub use payload::{CodecError, PartitionSchema};
pub use reader::LayerReader;
pub use writer::{LayerWriter, RejectedRecord, SeriesSpan, WriteError, WriteMode, WriteSummary};
