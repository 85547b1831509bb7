//! Job reloading the full spreadsheet history.
//!
//! Replaces the whole spreadsheet collection with the current sheet contents,
//! so corrections made to past rows reach the store. The collection is only
//! cleared once a complete, non-empty retrieval is in hand.

use anyhow::{bail, Result};
use chrono::Utc;
use log::info;

use crate::{
    db::{Store, StoreReport},
    retriever::{RetrieveWindow, Retriever, SourceOutput},
};

pub async fn run(retriever: &dyn Retriever, store: &Store) -> Result<StoreReport> {
    info!("Starting sync_spreadsheet job...");

    let start = std::time::Instant::now();
    let window = RetrieveWindow::previous_day(Utc::now());

    let output = match retriever.retrieve(&window).await? {
        SourceOutput::Spreadsheet(output) => output,
        other => bail!("expected spreadsheet output, got {} output", other.source()),
    };

    if output.metrics.is_empty() {
        bail!("spreadsheet returned no sheets, keeping stored history");
    }

    let report = store.replace_spreadsheet(&output).await?;

    info!(
        "Completed sync_spreadsheet job in {:?} ({} sheets, {} rows written, {} omitted)",
        start.elapsed(),
        output.metrics.len(),
        report.inserted,
        report.omitted
    );
    Ok(report)
}
