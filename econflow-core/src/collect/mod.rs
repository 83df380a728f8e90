//! Collection from external statistical agencies.

pub mod bcb;
pub mod circuit_breaker;
pub mod collector;
pub mod fake;
pub mod ibge;
pub mod registry;
pub mod retry;
pub mod transport;

pub use bcb::BcbStrategy;
pub use circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use collector::{
    Clock, CollectError, Collector, FetchReport, FixedClock, Observation, ParseError,
    SourceCollector, SourceStrategy, SystemClock,
};
pub use fake::ScriptedTransport;
pub use ibge::IbgeStrategy;
pub use registry::{CollectorRegistry, CollectorSettings, RegistryError};
pub use retry::RetryPolicy;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
