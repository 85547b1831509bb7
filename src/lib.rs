pub mod aggregation;
pub mod config;
pub mod cron;
pub mod db;
pub mod retriever;

pub use aggregation::{Aggregator, CompoundMetrics};
pub use config::Settings;
pub use cron::{CronScheduler, MetricsPipeline};
pub use db::{MetricStore, Store};
pub use retriever::{build_retrievers, OutputsBag, Retriever, SourceId};
