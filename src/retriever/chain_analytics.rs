//! Chain analytics retriever.
//!
//! Issues four GraphQL queries concurrently (DAO treasury balances, supply
//! summary, largest node runners, relays by gateway) and reduces them to the
//! daily chain record. Upstream amounts are in micro-units.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::{
    http::{endpoint_url, HttpClient},
    RetrieveError, RetrieveWindow, Retriever, SourceId, SourceOutput,
};
use crate::config::ChainAnalyticsSettings;

/// Upstream amounts are expressed in micro-units of the token.
const MICRO_UNITS: f64 = 1_000_000.0;

/// Validators needed to control the protocol (two thirds of 1000).
pub const CONTROL_VALIDATORS_THRESHOLD: u64 = 667;

/// Gateway ids as reported by the relays-by-gateway query.
const PRIMARY_GATEWAY: u32 = 1;
const SECONDARY_GATEWAY: u32 = 2;

const DATE_FORMAT: &str = "YYYY-MM-DDTHH:mm:ss.SSSZ";

const TREASURY_QUERY: &str = r#"
    query daoTreasury($pagination: ListInput) {
      DAO_total_balance: ListPoktAccount(pagination: $pagination) {
        items {
          amount
        }
      }
    }"#;

const SUPPLY_QUERY: &str = r#"
    query(
      $listSummaryInput: SummaryWithBlockInput!
      $supplyInput: GetSupplySummaryFromStartDateInput!
    ) {
      circulating_supply: ListSummaryBetweenDates(input: $listSummaryInput) {
        points {
          point
          amount: m0
        }
      }
      supply: GetSupplySummaryFromStartToCurrentDate(input: $supplyInput) {
        token_burn: total_burned {
          amount: current
        }
        token_issuance: total_minted {
          amount: current
        }
      }
    }"#;

const LARGEST_NODE_RUNNERS_QUERY: &str = r#"
    query ListLargestNodeRunners {
      ListLargestNodeRunners(input: { sort_by: validators }) {
        items {
          service_domain
          validators
        }
      }
    }"#;

const RELAYS_QUERY: &str = r#"
    query($listSummaryInput: ListRelaysByGatewayAndUnitBetweenDatesInput!) {
      ListRelays: ListRelaysByGatewayAndUnitBetweenDates(input: $listSummaryInput) {
        points {
          point
          total_relays
          relays_by_gateway {
            gateway
            total_relays
          }
        }
      }
    }"#;

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PointList<T> {
    #[serde(default = "Vec::new")]
    points: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TreasuryData {
    #[serde(rename = "DAO_total_balance")]
    dao_total_balance: ItemList<Amount>,
}

#[derive(Debug, Deserialize)]
struct Supply {
    token_burn: Option<Amount>,
    token_issuance: Option<Amount>,
}

#[derive(Debug, Deserialize)]
struct SupplyData {
    circulating_supply: PointList<Amount>,
    supply: Option<Supply>,
}

#[derive(Debug, Deserialize)]
struct NodeRunner {
    validators: u64,
}

#[derive(Debug, Deserialize)]
struct NodeRunnersData {
    #[serde(rename = "ListLargestNodeRunners")]
    runners: ItemList<NodeRunner>,
}

#[derive(Debug, Deserialize)]
struct GatewayRelays {
    gateway: u32,
    total_relays: f64,
}

#[derive(Debug, Deserialize)]
struct RelaysPoint {
    total_relays: f64,
    #[serde(default)]
    relays_by_gateway: Vec<GatewayRelays>,
}

#[derive(Debug, Deserialize)]
struct RelaysData {
    #[serde(rename = "ListRelays")]
    relays: PointList<RelaysPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainAnalyticsOutput {
    pub total_balance: Option<f64>,
    pub token_burn: Option<f64>,
    pub token_issuance: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub validators_to_control_protocol_count: Option<f64>,
    pub primary_gateway_relays_share: Option<f64>,
    pub secondary_gateway_relays_share: Option<f64>,
}

pub struct ChainAnalyticsRetriever {
    http: HttpClient,
    url: Url,
    api_token: String,
    dao_addresses: Vec<String>,
}

impl ChainAnalyticsRetriever {
    pub fn new(
        settings: &ChainAnalyticsSettings,
        request_timeout: Duration,
    ) -> Result<Self, RetrieveError> {
        Ok(Self {
            http: HttpClient::new(SourceId::ChainAnalytics, request_timeout)?,
            url: endpoint_url(&settings.base_url)?,
            api_token: settings.api_token.clone(),
            dao_addresses: settings.dao_addresses.clone(),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, RetrieveError> {
        self.http
            .post_graphql(&self.url, Some(&self.api_token), query, variables)
            .await
    }

    fn treasury_variables(&self, window: &RetrieveWindow) -> Value {
        json!({
            "pagination": {
                "filter": {
                    "operator": "AND",
                    "properties": [
                        {
                            "operator": "IN",
                            "property": "address",
                            "type": "STRING",
                            "value": serde_json::to_string(&self.dao_addresses).unwrap_or_default(),
                        },
                        {
                            "operator": "GTE",
                            "property": "parse_time",
                            "type": "DATE",
                            "value": iso(window.start),
                        },
                    ],
                },
                "limit": self.dao_addresses.len().max(1),
            }
        })
    }

    fn summary_input(window: &RetrieveWindow) -> Value {
        json!({
            "start_date": iso(window.start),
            "end_date": iso(window.end),
            "date_format": DATE_FORMAT,
            "unit_time": "day",
            "interval": 1,
        })
    }

    fn supply_variables(window: &RetrieveWindow) -> Value {
        json!({
            "listSummaryInput": Self::summary_input(window),
            "supplyInput": {
                "start_date": iso(window.start),
                "date_format": DATE_FORMAT,
            },
        })
    }

    fn relays_variables(window: &RetrieveWindow) -> Value {
        json!({ "listSummaryInput": Self::summary_input(window) })
    }
}

fn iso(datetime: chrono::DateTime<chrono::Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[inline]
fn from_micro(amount: f64) -> Option<f64> {
    let value = amount / MICRO_UNITS;
    value.is_finite().then_some(value)
}

/// Sum of the present amounts; absent when nothing was reported.
fn sum_amounts(amounts: &[Amount]) -> Option<f64> {
    let present: Vec<f64> = amounts.iter().filter_map(|a| a.amount).collect();
    if present.is_empty() {
        return None;
    }
    from_micro(present.iter().sum())
}

/// Number of largest node runners whose cumulative validators first reach
/// the control threshold. Runners arrive sorted by validators, descending.
fn validators_to_control_protocol(runners: &[NodeRunner]) -> Option<f64> {
    if runners.is_empty() {
        return None;
    }

    let mut validators = 0;
    let mut count = 0;
    for runner in runners {
        if validators >= CONTROL_VALIDATORS_THRESHOLD {
            break;
        }
        validators += runner.validators;
        count += 1;
    }

    Some(count as f64)
}

fn gateway_share(point: &RelaysPoint, gateway: u32) -> Option<f64> {
    if point.total_relays <= 0.0 {
        return None;
    }

    point
        .relays_by_gateway
        .iter()
        .find(|relays| relays.gateway == gateway)
        .map(|relays| relays.total_relays / point.total_relays)
        .filter(|share| share.is_finite())
}

fn serialize(
    treasury: TreasuryData,
    supply: SupplyData,
    runners: NodeRunnersData,
    relays: RelaysData,
) -> ChainAnalyticsOutput {
    let totals = supply.supply.as_ref();
    let first_point = relays.relays.points.first();

    ChainAnalyticsOutput {
        total_balance: sum_amounts(&treasury.dao_total_balance.items),
        token_burn: totals
            .and_then(|s| s.token_burn.as_ref())
            .and_then(|a| a.amount)
            .and_then(from_micro),
        token_issuance: totals
            .and_then(|s| s.token_issuance.as_ref())
            .and_then(|a| a.amount)
            .and_then(from_micro),
        circulating_supply: sum_amounts(&supply.circulating_supply.points),
        validators_to_control_protocol_count: validators_to_control_protocol(
            &runners.runners.items,
        ),
        primary_gateway_relays_share: first_point
            .and_then(|p| gateway_share(p, PRIMARY_GATEWAY)),
        secondary_gateway_relays_share: first_point
            .and_then(|p| gateway_share(p, SECONDARY_GATEWAY)),
    }
}

#[async_trait]
impl Retriever for ChainAnalyticsRetriever {
    fn source(&self) -> SourceId {
        SourceId::ChainAnalytics
    }

    async fn retrieve(&self, window: &RetrieveWindow) -> Result<SourceOutput, RetrieveError> {
        let (treasury, supply, runners, relays) = futures::try_join!(
            self.request::<TreasuryData>(TREASURY_QUERY, self.treasury_variables(window)),
            self.request::<SupplyData>(SUPPLY_QUERY, Self::supply_variables(window)),
            self.request::<NodeRunnersData>(LARGEST_NODE_RUNNERS_QUERY, json!({})),
            self.request::<RelaysData>(RELAYS_QUERY, Self::relays_variables(window)),
        )?;

        Ok(SourceOutput::ChainAnalytics(serialize(
            treasury, supply, runners, relays,
        )))
    }
}
