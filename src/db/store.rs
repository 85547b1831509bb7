use std::{collections::HashSet, ops::AddAssign, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use super::models::{
    ChainAnalyticsRecord, Collection, DailyRecord, GovernanceRecord, MetricRecord, PriceRecord,
};
use crate::{
    aggregation::CompoundMetrics,
    retriever::{ChainAnalyticsOutput, GovernanceOutput, PriceOutput, SpreadsheetOutput},
};

/// Storage backend seam.
///
/// Implementations provide existence checks and inserts by natural key. The
/// insert methods must not overwrite an existing key.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn daily_record_exists(&self, collection: Collection, date: NaiveDate) -> Result<bool>;

    /// Returns false when a record for that date already exists.
    async fn insert_daily_record(&self, record: &DailyRecord) -> Result<bool>;

    async fn metric_exists(
        &self,
        collection: Collection,
        date: NaiveDate,
        metric_name: &str,
    ) -> Result<bool>;

    /// Returns the number of rows actually inserted.
    async fn insert_metrics(&self, collection: Collection, rows: &[MetricRecord]) -> Result<u64>;

    /// Delete every row of `collection`, then insert `rows`, atomically.
    async fn replace_metrics(&self, collection: Collection, rows: &[MetricRecord]) -> Result<u64>;

    async fn list_metrics(&self, collection: Collection) -> Result<Vec<MetricRecord>>;
}

/// Outcome of one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub inserted: u64,
    /// Key already present.
    pub skipped: u64,
    /// Value undefined, nothing to write.
    pub omitted: u64,
}

impl AddAssign for StoreReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.omitted += other.omitted;
    }
}

pub(crate) fn ensure_metric_collection(collection: Collection) -> Result<()> {
    if collection.is_daily() {
        bail!("{} holds daily records, not named metrics", collection);
    }
    Ok(())
}

/// Write-once persistence over any [`MetricStore`].
///
/// Check-then-insert runs under a per-collection lock so that concurrent
/// writers never race on the same key.
pub struct Store {
    backend: Arc<dyn MetricStore>,
    locks: [Mutex<()>; Collection::ALL.len()],
}

impl Store {
    pub fn new(backend: Arc<dyn MetricStore>) -> Self {
        Self {
            backend,
            locks: Default::default(),
        }
    }

    async fn lock(&self, collection: Collection) -> MutexGuard<'_, ()> {
        self.locks[collection as usize].lock().await
    }

    /// Insert `record` unless its date is already present.
    pub async fn store_daily(&self, record: DailyRecord) -> Result<StoreReport> {
        let collection = record.collection();
        if !record.has_values() {
            debug!("[{}] {} has no values, omitted", collection, record.date());
            return Ok(StoreReport {
                omitted: 1,
                ..Default::default()
            });
        }

        let _guard = self.lock(collection).await;

        if self
            .backend
            .daily_record_exists(collection, record.date())
            .await?
        {
            debug!("[{}] {} duplicate, skipped", collection, record.date());
            return Ok(StoreReport {
                skipped: 1,
                ..Default::default()
            });
        }

        let report = if self.backend.insert_daily_record(&record).await? {
            StoreReport {
                inserted: 1,
                ..Default::default()
            }
        } else {
            debug!("[{}] {} duplicate, skipped", collection, record.date());
            StoreReport {
                skipped: 1,
                ..Default::default()
            }
        };

        Ok(report)
    }

    pub async fn store_price(
        &self,
        date: NaiveDate,
        output: Option<&PriceOutput>,
    ) -> Result<StoreReport> {
        match output {
            Some(output) => {
                self.store_daily(DailyRecord::Price(PriceRecord::new(date, output)))
                    .await
            },
            None => Ok(StoreReport::default()),
        }
    }

    pub async fn store_governance(
        &self,
        date: NaiveDate,
        output: Option<&GovernanceOutput>,
    ) -> Result<StoreReport> {
        match output {
            Some(output) => {
                let record = GovernanceRecord::new(date, output)?;
                self.store_daily(DailyRecord::Governance(record)).await
            },
            None => Ok(StoreReport::default()),
        }
    }

    pub async fn store_chain_analytics(
        &self,
        date: NaiveDate,
        output: Option<&ChainAnalyticsOutput>,
    ) -> Result<StoreReport> {
        match output {
            Some(output) => {
                self.store_daily(DailyRecord::ChainAnalytics(ChainAnalyticsRecord::new(
                    date, output,
                )))
                .await
            },
            None => Ok(StoreReport::default()),
        }
    }

    /// Insert each defined `(date, name, value)` whose key is not present.
    pub async fn store_metrics(
        &self,
        collection: Collection,
        rows: Vec<(NaiveDate, String, Option<f64>)>,
    ) -> Result<StoreReport> {
        ensure_metric_collection(collection)?;

        let mut report = StoreReport::default();
        let _guard = self.lock(collection).await;

        let mut fresh = Vec::with_capacity(rows.len());
        for (date, metric_name, value) in rows {
            let Some(value) = value else {
                report.omitted += 1;
                continue;
            };

            if self
                .backend
                .metric_exists(collection, date, &metric_name)
                .await?
            {
                debug!("[{}] {} {} duplicate, skipped", collection, date, metric_name);
                report.skipped += 1;
                continue;
            }

            fresh.push(MetricRecord::new(date, metric_name, value));
        }

        if !fresh.is_empty() {
            let inserted = self.backend.insert_metrics(collection, &fresh).await?;
            report.inserted += inserted;
            report.skipped += fresh.len() as u64 - inserted.min(fresh.len() as u64);
        }

        Ok(report)
    }

    /// Persist the defined compound metrics of `date`.
    pub async fn store_compound(
        &self,
        date: NaiveDate,
        metrics: &CompoundMetrics,
    ) -> Result<StoreReport> {
        let rows = metrics
            .iter()
            .map(|(name, value)| (date, name.as_str().to_string(), value))
            .collect();
        self.store_metrics(Collection::Compound, rows).await
    }

    /// Persist the latest numeric row of each sheet dated on or before
    /// `date`. A sheet without such a row is omitted. Older history is left
    /// to [`Store::replace_spreadsheet`].
    pub async fn store_spreadsheet(
        &self,
        date: NaiveDate,
        output: Option<&SpreadsheetOutput>,
    ) -> Result<StoreReport> {
        let Some(output) = output else {
            return Ok(StoreReport::default());
        };

        let mut rows = Vec::with_capacity(output.metrics.len());
        for metric_name in output.metrics.keys() {
            let row = match output.latest_row_on_or_before(metric_name, date) {
                Some((row_date, value)) => (row_date, metric_name.clone(), Some(value)),
                None => (date, metric_name.clone(), None),
            };
            rows.push(row);
        }
        self.store_metrics(Collection::Spreadsheet, rows).await
    }

    /// Clear the spreadsheet collection and write the full history of
    /// `output` in its place.
    pub async fn replace_spreadsheet(&self, output: &SpreadsheetOutput) -> Result<StoreReport> {
        let mut report = StoreReport::default();
        let mut rows = Vec::new();
        let mut seen = HashSet::new();

        for (date, metric_name, value) in spreadsheet_rows(output) {
            match value {
                Some(value) if seen.insert((date, metric_name.clone())) => {
                    rows.push(MetricRecord::new(date, metric_name, value))
                },
                Some(_) => report.skipped += 1,
                None => report.omitted += 1,
            }
        }

        let _guard = self.lock(Collection::Spreadsheet).await;
        report.inserted = self
            .backend
            .replace_metrics(Collection::Spreadsheet, &rows)
            .await?;

        Ok(report)
    }
}

fn spreadsheet_rows(output: &SpreadsheetOutput) -> Vec<(NaiveDate, String, Option<f64>)> {
    output
        .metrics
        .iter()
        .flat_map(|(metric_name, rows)| {
            rows.iter()
                .map(move |row| (row.date, metric_name.clone(), row.value.as_number()))
        })
        .collect()
}
