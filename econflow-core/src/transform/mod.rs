//! Layer-to-layer transforms.

pub mod aggregate;
pub mod align;
pub mod standardize;

pub use aggregate::{
    aggregate, aggregate_series, build_panel, AggregateOptions, AggregateOutput, Lookback,
    NullPolicy, YOY_MONTHS,
};
pub use align::{
    join_series, Cell, DerivedColumn, GapPolicy, JoinedPanel, SeriesId, REAL_INTEREST_RATE,
};
pub use standardize::{dedup_latest, standardize, StandardizeContext, StandardizeOutput};
