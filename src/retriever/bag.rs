use std::collections::BTreeMap;

use serde::Serialize;

use super::{
    ChainAnalyticsOutput, GovernanceOutput, PriceOutput, SourceId, SourceOutput, SpreadsheetOutput,
};

/// Outputs of one run keyed by source.
///
/// Every configured source has exactly one entry. A `None` value means the
/// source failed this run; a missing key means the source is not configured.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputsBag {
    entries: BTreeMap<SourceId, Option<SourceOutput>>,
}

impl OutputsBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the settled result of `source`. An output of another source's
    /// variant is treated as a failure.
    pub fn insert(&mut self, source: SourceId, output: Option<SourceOutput>) {
        let output = output.filter(|o| o.source() == source);
        self.entries.insert(source, output);
    }

    pub fn contains(&self, source: SourceId) -> bool {
        self.entries.contains_key(&source)
    }

    pub fn get(&self, source: SourceId) -> Option<&SourceOutput> {
        self.entries.get(&source).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured sources whose retrieval failed.
    pub fn failed_sources(&self) -> Vec<SourceId> {
        self.entries
            .iter()
            .filter(|(_, output)| output.is_none())
            .map(|(source, _)| *source)
            .collect()
    }

    pub fn price(&self) -> Option<&PriceOutput> {
        match self.get(SourceId::Price) {
            Some(SourceOutput::Price(output)) => Some(output),
            _ => None,
        }
    }

    pub fn governance(&self) -> Option<&GovernanceOutput> {
        match self.get(SourceId::Governance) {
            Some(SourceOutput::Governance(output)) => Some(output),
            _ => None,
        }
    }

    pub fn spreadsheet(&self) -> Option<&SpreadsheetOutput> {
        match self.get(SourceId::Spreadsheet) {
            Some(SourceOutput::Spreadsheet(output)) => Some(output),
            _ => None,
        }
    }

    pub fn chain_analytics(&self) -> Option<&ChainAnalyticsOutput> {
        match self.get(SourceId::ChainAnalytics) {
            Some(SourceOutput::ChainAnalytics(output)) => Some(output),
            _ => None,
        }
    }
}
