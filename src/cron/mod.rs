pub mod jobs;
pub mod scheduler;

pub use jobs::{MetricsPipeline, RunReport};
pub use scheduler::CronScheduler;
