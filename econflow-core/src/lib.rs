//! econflow core: the economic indicator lake.
//!
//! - Domain types (records, units, catalogs, partitions)
//! - Source collectors behind a capability trait, selected through a registry
//! - Record schema validation at every write boundary
//! - Layered, partitioned parquet store with atomic replacement
//! - Standardization and aggregation transforms

pub mod collect;
pub mod domain;
pub mod schema;
pub mod store;
pub mod transform;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the coordinator shares across worker
    /// threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::IndicatorRecord>();
        require_sync::<domain::IndicatorRecord>();
        require_send::<domain::Catalog>();
        require_sync::<domain::Catalog>();

        require_send::<collect::CollectorRegistry>();
        require_sync::<collect::CollectorRegistry>();
        require_send::<collect::CollectError>();
        require_sync::<collect::CollectError>();
        require_send::<collect::CircuitBreaker>();
        require_sync::<collect::CircuitBreaker>();

        require_send::<schema::SchemaValidator>();
        require_sync::<schema::SchemaValidator>();

        require_send::<store::LayerWriter>();
        require_sync::<store::LayerWriter>();
        require_send::<store::LayerReader>();
        require_sync::<store::LayerReader>();
        require_send::<store::WriteError>();
        require_sync::<store::WriteError>();

        require_send::<transform::JoinedPanel>();
        require_sync::<transform::JoinedPanel>();
    }

    /// Collectors are trait objects behind the registry.
    #[test]
    fn collector_trait_is_object_safe() {
        fn _takes(_: &dyn collect::Collector) {}
    }
}
