pub mod exporter;

pub use exporter::{PowerMetric, SampleExporter};
