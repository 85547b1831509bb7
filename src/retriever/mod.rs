//! Upstream data source retrievers.
//!
//! Every source implements [`Retriever`]: one async call per run that fetches
//! the source's data for the run window and normalizes it into a
//! [`SourceOutput`]. Fields the upstream could not supply are `None`, never 0.
//!
//! - [`price`] - token price oracle
//! - [`governance`] - governance snapshot space (votes, proposals)
//! - [`spreadsheet`] - manually curated metric sheets
//! - [`chain_analytics`] - treasury, supply and network share analytics

mod bag;
pub mod chain_analytics;
pub mod governance;
mod http;
pub mod price;
pub mod spreadsheet;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::SourcesSettings;

pub use bag::OutputsBag;
pub use chain_analytics::{ChainAnalyticsOutput, ChainAnalyticsRetriever};
pub use governance::{GovernanceOutput, GovernanceRetriever};
pub use price::{PriceOutput, PriceRetriever};
pub use spreadsheet::{CellValue, SheetRow, SpreadsheetOutput, SpreadsheetRetriever};

/// Identifier of one configured upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SourceId {
    Price,
    Governance,
    Spreadsheet,
    ChainAnalytics,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Price => "price",
            SourceId::Governance => "governance",
            SourceId::Spreadsheet => "spreadsheet",
            SourceId::ChainAnalytics => "chain_analytics",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized output of one source for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SourceOutput {
    Price(PriceOutput),
    Governance(GovernanceOutput),
    Spreadsheet(SpreadsheetOutput),
    ChainAnalytics(ChainAnalyticsOutput),
}

impl SourceOutput {
    pub fn source(&self) -> SourceId {
        match self {
            SourceOutput::Price(_) => SourceId::Price,
            SourceOutput::Governance(_) => SourceId::Governance,
            SourceOutput::Spreadsheet(_) => SourceId::Spreadsheet,
            SourceOutput::ChainAnalytics(_) => SourceId::ChainAnalytics,
        }
    }
}

/// Time window a run retrieves metrics for: one whole UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RetrieveWindow {
    /// Window covering `date` from 00:00:00.000 to 23:59:59.999 UTC.
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + ChronoDuration::days(1) - ChronoDuration::milliseconds(1);
        Self { start, end }
    }

    /// Window for the calendar day before `now`.
    pub fn previous_day(now: DateTime<Utc>) -> Self {
        Self::for_date(now.date_naive() - ChronoDuration::days(1))
    }

    /// Reference date metrics of this window are stored under.
    pub fn reference_date(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Failure of one source's retrieval. Any variant makes that source's
/// contribution to the run absent.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("authentication rejected by upstream (HTTP {status})")]
    Authentication { status: u16 },

    #[error("unexpected upstream payload: {0}")]
    Schema(String),

    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid source configuration: {0}")]
    Config(String),
}

/// A single upstream source.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn source(&self) -> SourceId;

    async fn retrieve(&self, window: &RetrieveWindow) -> Result<SourceOutput, RetrieveError>;
}

/// Maximum number of items one paginated GraphQL request may ask for.
pub const PAGE_SIZE: u64 = 1000;

/// One page of a `first`/`skip` paginated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub first: u64,
    pub skip: u64,
}

/// Split `total` items into consecutive pages of [`PAGE_SIZE`] with a final
/// remainder page. Zero items need no request at all.
pub fn pagination(total: u64) -> Vec<Page> {
    let mut pages = Vec::with_capacity(total.div_ceil(PAGE_SIZE) as usize);
    let mut skip = 0;

    while skip < total {
        let first = PAGE_SIZE.min(total - skip);
        pages.push(Page { first, skip });
        skip += first;
    }

    pages
}

/// Build a retriever for every source present in the configuration.
pub fn build_retrievers(
    sources: &SourcesSettings,
    request_timeout: Duration,
) -> Result<Vec<Arc<dyn Retriever>>, RetrieveError> {
    let mut retrievers: Vec<Arc<dyn Retriever>> = Vec::new();

    if let Some(settings) = &sources.price {
        retrievers.push(Arc::new(PriceRetriever::new(settings, request_timeout)?));
    }
    if let Some(settings) = &sources.governance {
        retrievers.push(Arc::new(GovernanceRetriever::new(settings, request_timeout)?));
    }
    if let Some(settings) = &sources.spreadsheet {
        retrievers.push(Arc::new(SpreadsheetRetriever::new(settings, request_timeout)?));
    }
    if let Some(settings) = &sources.chain_analytics {
        retrievers.push(Arc::new(ChainAnalyticsRetriever::new(settings, request_timeout)?));
    }

    Ok(retrievers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pagination_single_page() {
        assert_eq!(pagination(99), vec![Page { first: 99, skip: 0 }]);
        assert_eq!(pagination(1000), vec![Page { first: 1000, skip: 0 }]);
    }

    #[test]
    fn test_pagination_with_remainder() {
        let pages = pagination(3500);
        assert_eq!(pages.len(), 4);
        assert_eq!(
            pages.iter().map(|p| p.first).collect::<Vec<_>>(),
            vec![1000, 1000, 1000, 500]
        );
        assert_eq!(
            pages.iter().map(|p| p.skip).collect::<Vec<_>>(),
            vec![0, 1000, 2000, 3000]
        );
    }

    #[test]
    fn test_pagination_exact_multiple() {
        let pages = pagination(4000);
        assert_eq!(pages.len(), 4);
        assert!(pages.iter().all(|p| p.first == 1000));
        assert_eq!(pages[3].skip, 3000);
    }

    #[test]
    fn test_pagination_empty() {
        assert!(pagination(0).is_empty());
    }

    #[test]
    fn test_previous_day_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 13, 45, 0).unwrap();
        let window = RetrieveWindow::previous_day(now);

        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(window.end.date_naive(), window.start.date_naive());
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap()
                + ChronoDuration::milliseconds(999)
        );
        assert_eq!(
            window.reference_date(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_previous_day_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let window = RetrieveWindow::previous_day(now);
        assert_eq!(
            window.reference_date(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
    }
}
