//! Domain types shared by every stage of the lake.

pub mod catalog;
pub mod partition;
pub mod record;
pub mod selection;
pub mod unit;

pub use catalog::{Bounds, Catalog, CatalogError, Frequency, IndicatorSpec, RemoteSeries, Resample};
pub use partition::{InvalidRange, PartitionKey, TimeRange};
pub use record::{DerivedMetrics, IndicatorRecord, Layer, ParseSourceError, SourceId};
pub use selection::IndicatorSelection;
pub use unit::{Unit, UnitError};
