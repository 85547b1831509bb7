use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use super::{
    models::{Collection, DailyRecord, MetricRecord},
    store::{ensure_metric_collection, MetricStore},
};

#[derive(Default)]
struct Tables {
    daily: BTreeMap<(Collection, NaiveDate), DailyRecord>,
    metrics: BTreeMap<(Collection, NaiveDate, String), f64>,
}

/// In-process backend, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub fn daily_records(&self, collection: Collection) -> Vec<DailyRecord> {
        self.tables()
            .map(|tables| {
                tables
                    .daily
                    .iter()
                    .filter(|((c, _), _)| *c == collection)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn metric_count(&self, collection: Collection) -> usize {
        self.tables()
            .map(|tables| {
                tables
                    .metrics
                    .keys()
                    .filter(|(c, _, _)| *c == collection)
                    .count()
            })
            .unwrap_or_default()
    }

    pub fn metric_value(
        &self,
        collection: Collection,
        date: NaiveDate,
        metric_name: &str,
    ) -> Option<f64> {
        self.tables().ok().and_then(|tables| {
            tables
                .metrics
                .get(&(collection, date, metric_name.to_string()))
                .copied()
        })
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn daily_record_exists(&self, collection: Collection, date: NaiveDate) -> Result<bool> {
        Ok(self.tables()?.daily.contains_key(&(collection, date)))
    }

    async fn insert_daily_record(&self, record: &DailyRecord) -> Result<bool> {
        let mut tables = self.tables()?;
        let key = (record.collection(), record.date());
        if tables.daily.contains_key(&key) {
            return Ok(false);
        }
        tables.daily.insert(key, record.clone());
        Ok(true)
    }

    async fn metric_exists(
        &self,
        collection: Collection,
        date: NaiveDate,
        metric_name: &str,
    ) -> Result<bool> {
        ensure_metric_collection(collection)?;
        Ok(self
            .tables()?
            .metrics
            .contains_key(&(collection, date, metric_name.to_string())))
    }

    async fn insert_metrics(&self, collection: Collection, rows: &[MetricRecord]) -> Result<u64> {
        ensure_metric_collection(collection)?;
        let mut tables = self.tables()?;
        let mut inserted = 0;
        for row in rows {
            let key = (collection, row.date, row.metric_name.clone());
            if !tables.metrics.contains_key(&key) {
                tables.metrics.insert(key, row.metric_value);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn replace_metrics(&self, collection: Collection, rows: &[MetricRecord]) -> Result<u64> {
        ensure_metric_collection(collection)?;
        let mut tables = self.tables()?;
        tables.metrics.retain(|(c, _, _), _| *c != collection);
        let mut inserted = 0;
        for row in rows {
            let key = (collection, row.date, row.metric_name.clone());
            if tables.metrics.insert(key, row.metric_value).is_none() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_metrics(&self, collection: Collection) -> Result<Vec<MetricRecord>> {
        ensure_metric_collection(collection)?;
        Ok(self
            .tables()?
            .metrics
            .iter()
            .filter(|((c, _, _), _)| *c == collection)
            .map(|((_, date, name), value)| MetricRecord::new(*date, name.clone(), *value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[tokio::test]
    async fn test_insert_keeps_first_value() {
        let store = MemoryStore::new();
        let rows = [
            MetricRecord::new(date(1), "a", 1.0),
            MetricRecord::new(date(1), "a", 2.0),
            MetricRecord::new(date(2), "a", 3.0),
        ];

        let inserted = store.insert_metrics(Collection::Compound, &rows).await.unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(
            store.metric_value(Collection::Compound, date(1), "a"),
            Some(1.0)
        );
        assert!(store
            .metric_exists(Collection::Compound, date(2), "a")
            .await
            .unwrap());
        assert!(!store
            .metric_exists(Collection::Spreadsheet, date(2), "a")
            .await
            .unwrap());
    }
}
