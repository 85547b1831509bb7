pub mod retrieve_metrics;
pub mod sync_spreadsheet;

pub use retrieve_metrics::{MetricsPipeline, RunReport};
