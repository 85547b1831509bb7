//! Job retrieving yesterday's metrics from every configured source.
//!
//! One run fans out to all retrievers, settles every retrieval, aggregates
//! compound metrics from whatever succeeded, then writes raw and compound
//! metrics concurrently. A failed source only removes its own contribution.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    aggregation::{Aggregator, CompoundMetrics},
    db::{Collection, Store, StoreReport},
    retriever::{OutputsBag, RetrieveError, RetrieveWindow, Retriever, SourceId, SourceOutput},
};

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub reference_date: NaiveDate,
    pub failed_sources: Vec<SourceId>,
    pub compound: CompoundMetrics,
    pub writes: BTreeMap<Collection, StoreReport>,
    pub failed_writes: Vec<Collection>,
}

impl RunReport {
    pub fn total(&self) -> StoreReport {
        let mut total = StoreReport::default();
        for report in self.writes.values() {
            total += *report;
        }
        total
    }
}

pub struct MetricsPipeline {
    retrievers: Vec<Arc<dyn Retriever>>,
    store: Arc<Store>,
    aggregator: Aggregator,
    source_timeout: Duration,
}

impl MetricsPipeline {
    pub fn new(
        retrievers: Vec<Arc<dyn Retriever>>,
        store: Arc<Store>,
        aggregator: Aggregator,
        source_timeout: Duration,
    ) -> Self {
        Self {
            retrievers,
            store,
            aggregator,
            source_timeout,
        }
    }

    pub fn retriever(&self, source: SourceId) -> Option<Arc<dyn Retriever>> {
        self.retrievers
            .iter()
            .find(|retriever| retriever.source() == source)
            .cloned()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    async fn retrieve_one(
        &self,
        retriever: &dyn Retriever,
        window: &RetrieveWindow,
    ) -> Result<SourceOutput, RetrieveError> {
        match tokio::time::timeout(self.source_timeout, retriever.retrieve(window)).await {
            Ok(result) => result,
            Err(_) => Err(RetrieveError::Timeout(self.source_timeout)),
        }
    }

    /// Invoke every retriever concurrently and wait for all of them to
    /// settle. Failed sources get an empty entry.
    pub async fn collect(&self, window: &RetrieveWindow) -> OutputsBag {
        let retrievals = self.retrievers.iter().map(|retriever| async move {
            let start = std::time::Instant::now();
            let result = self.retrieve_one(retriever.as_ref(), window).await;
            (retriever.source(), result, start.elapsed())
        });

        let mut bag = OutputsBag::new();
        for (source, result, elapsed) in join_all(retrievals).await {
            match result {
                Ok(output) => {
                    info!("[{}] Retrieved metrics in {:?}", source, elapsed);
                    bag.insert(source, Some(output));
                },
                Err(e) => {
                    error!(
                        "[{}] Failed to retrieve metrics after {:?}: {:#}",
                        source,
                        elapsed,
                        anyhow::Error::from(e)
                    );
                    bag.insert(source, None);
                },
            }
        }

        bag
    }

    /// Dispatch all writes concurrently and wait for every one of them.
    async fn persist(
        &self,
        date: NaiveDate,
        bag: &OutputsBag,
        compound: &CompoundMetrics,
    ) -> (BTreeMap<Collection, StoreReport>, Vec<Collection>) {
        let store = &self.store;
        let (price, governance, chain_analytics, spreadsheet, compound_write) = tokio::join!(
            store.store_price(date, bag.price()),
            store.store_governance(date, bag.governance()),
            store.store_chain_analytics(date, bag.chain_analytics()),
            store.store_spreadsheet(date, bag.spreadsheet()),
            store.store_compound(date, compound),
        );

        let mut writes = BTreeMap::new();
        let mut failed = Vec::new();
        for (collection, result) in [
            (Collection::Price, price),
            (Collection::Governance, governance),
            (Collection::ChainAnalytics, chain_analytics),
            (Collection::Spreadsheet, spreadsheet),
            (Collection::Compound, compound_write),
        ] {
            match result {
                Ok(report) => {
                    writes.insert(collection, report);
                },
                Err(e) => {
                    error!("[{}] Failed to persist metrics: {:#}", collection, e);
                    failed.push(collection);
                },
            }
        }

        (writes, failed)
    }

    /// Run the whole pipeline for `reference_date`.
    ///
    /// Fails only when a write failed. Writes that succeeded stay persisted.
    pub async fn run_for(&self, reference_date: NaiveDate) -> Result<RunReport> {
        let window = RetrieveWindow::for_date(reference_date);

        let bag = self.collect(&window).await;
        if bag.is_empty() {
            warn!("No sources configured, nothing to retrieve for {}", reference_date);
        }
        let failed_sources = bag.failed_sources();
        if !failed_sources.is_empty() {
            warn!(
                "{} of {} sources failed for {}: {:?}",
                failed_sources.len(),
                bag.len(),
                reference_date,
                failed_sources
            );
        }

        let compound = self.aggregator.compute(reference_date, &bag);

        let (writes, failed_writes) = self.persist(reference_date, &bag, &compound).await;

        let report = RunReport {
            reference_date,
            failed_sources,
            compound,
            writes,
            failed_writes,
        };

        if !report.failed_writes.is_empty() {
            bail!(
                "{} writes failed for {}: {:?}",
                report.failed_writes.len(),
                reference_date,
                report.failed_writes
            );
        }

        Ok(report)
    }
}

/// Retrieve, aggregate and persist the previous UTC day.
pub async fn run(pipeline: &MetricsPipeline) -> Result<()> {
    info!("Starting retrieve_metrics job...");

    let start = std::time::Instant::now();
    let reference_date = RetrieveWindow::previous_day(Utc::now()).reference_date();

    let report = pipeline.run_for(reference_date).await?;
    let total = report.total();

    info!(
        "Completed retrieve_metrics job for {} in {:?} \
         ({} inserted, {} skipped, {} omitted, {} failed sources)",
        reference_date,
        start.elapsed(),
        total.inserted,
        total.skipped,
        total.omitted,
        report.failed_sources.len()
    );
    if let Ok(json) = serde_json::to_string(&report) {
        debug!("retrieve_metrics report: {}", json);
    }
    Ok(())
}
