use chrono::NaiveDate;
use serde::Serialize;

/// One named value of one day, unique per (date, metric_name) within its
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub metric_name: String,
    pub metric_value: f64,
}

impl MetricRecord {
    pub fn new(date: NaiveDate, metric_name: impl Into<String>, metric_value: f64) -> Self {
        Self {
            date,
            metric_name: metric_name.into(),
            metric_value,
        }
    }
}
