use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use super::Collection;
use crate::retriever::{ChainAnalyticsOutput, GovernanceOutput, PriceOutput};

/// Token price of one day (PostgreSQL `price_metrics`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub price: Option<f64>,
}

impl PriceRecord {
    pub fn new(date: NaiveDate, output: &PriceOutput) -> Self {
        Self {
            date,
            price: output.price,
        }
    }
}

/// Governance space counts of one day (PostgreSQL `governance_metrics`).
///
/// Counts are stored as BIGINT. A count beyond `i64::MAX` is rejected rather
/// than clamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernanceRecord {
    pub date: NaiveDate,
    pub community_proposals_count: i64,
    pub core_proposals_count: i64,
    pub votes_count: i64,
    pub voters_count: i64,
}

impl GovernanceRecord {
    pub fn new(date: NaiveDate, output: &GovernanceOutput) -> Result<Self> {
        let count = |name: &str, value: u64| {
            i64::try_from(value)
                .with_context(|| format!("governance {} {} does not fit a BIGINT", name, value))
        };
        Ok(Self {
            date,
            community_proposals_count: count(
                "community_proposals_count",
                output.community_proposals_count,
            )?,
            core_proposals_count: count("core_proposals_count", output.core_proposals_count)?,
            votes_count: count("votes_count", output.votes_count)?,
            voters_count: count("voters_count", output.voters_count)?,
        })
    }
}

/// Chain analytics figures of one day (PostgreSQL `chain_analytics_metrics`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainAnalyticsRecord {
    pub date: NaiveDate,
    pub total_balance: Option<f64>,
    pub token_burn: Option<f64>,
    pub token_issuance: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub validators_to_control_protocol_count: Option<f64>,
    pub primary_gateway_relays_share: Option<f64>,
    pub secondary_gateway_relays_share: Option<f64>,
}

impl ChainAnalyticsRecord {
    pub fn new(date: NaiveDate, output: &ChainAnalyticsOutput) -> Self {
        Self {
            date,
            total_balance: output.total_balance,
            token_burn: output.token_burn,
            token_issuance: output.token_issuance,
            circulating_supply: output.circulating_supply,
            validators_to_control_protocol_count: output.validators_to_control_protocol_count,
            primary_gateway_relays_share: output.primary_gateway_relays_share,
            secondary_gateway_relays_share: output.secondary_gateway_relays_share,
        }
    }

    fn values(&self) -> [Option<f64>; 7] {
        [
            self.total_balance,
            self.token_burn,
            self.token_issuance,
            self.circulating_supply,
            self.validators_to_control_protocol_count,
            self.primary_gateway_relays_share,
            self.secondary_gateway_relays_share,
        ]
    }
}

/// A single-record-per-day row, keyed by date alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "collection", rename_all = "snake_case")]
pub enum DailyRecord {
    Price(PriceRecord),
    Governance(GovernanceRecord),
    ChainAnalytics(ChainAnalyticsRecord),
}

impl DailyRecord {
    pub fn collection(&self) -> Collection {
        match self {
            DailyRecord::Price(_) => Collection::Price,
            DailyRecord::Governance(_) => Collection::Governance,
            DailyRecord::ChainAnalytics(_) => Collection::ChainAnalytics,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            DailyRecord::Price(record) => record.date,
            DailyRecord::Governance(record) => record.date,
            DailyRecord::ChainAnalytics(record) => record.date,
        }
    }

    /// False when the record carries no defined field and is not worth
    /// persisting.
    pub fn has_values(&self) -> bool {
        match self {
            DailyRecord::Price(record) => record.price.is_some(),
            DailyRecord::Governance(_) => true,
            DailyRecord::ChainAnalytics(record) => record.values().iter().any(Option::is_some),
        }
    }
}
