pub mod format;
pub mod normalizer;

pub use normalizer::{AggregationPolicy, CounterMetric, Fold, NormalizedSample, Normalizer};
