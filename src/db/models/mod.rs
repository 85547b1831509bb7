use std::fmt;

use serde::Serialize;

pub mod daily;
pub mod metric;

pub use daily::{ChainAnalyticsRecord, DailyRecord, GovernanceRecord, PriceRecord};
pub use metric::MetricRecord;

/// Persistent collections, one table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Price,
    Governance,
    ChainAnalytics,
    Spreadsheet,
    Compound,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Price,
        Collection::Governance,
        Collection::ChainAnalytics,
        Collection::Spreadsheet,
        Collection::Compound,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Price => "price_metrics",
            Collection::Governance => "governance_metrics",
            Collection::ChainAnalytics => "chain_analytics_metrics",
            Collection::Spreadsheet => "spreadsheet_metrics",
            Collection::Compound => "compound_metrics",
        }
    }

    /// Daily collections hold one record per date. The others hold one row
    /// per (date, metric_name).
    pub fn is_daily(&self) -> bool {
        matches!(
            self,
            Collection::Price | Collection::Governance | Collection::ChainAnalytics
        )
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_collections() {
        let daily: Vec<_> = Collection::ALL.into_iter().filter(Collection::is_daily).collect();
        assert_eq!(
            daily,
            vec![
                Collection::Price,
                Collection::Governance,
                Collection::ChainAnalytics
            ]
        );
    }
}
