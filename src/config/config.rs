use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Raw per-source daily records (price, governance, chain analytics)
/// - Spreadsheet metric series
/// - Compound metrics
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    8
}

/// Scheduling and aggregation configuration.
///
/// The metrics window is always the previous UTC day; the interval only
/// controls how often that window is re-checked. Hourly and daily
/// deployments differ only in `retrieve_interval_secs`.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSettings {
    /// Interval between metric retrieval runs - default 1 hour
    #[serde(default = "default_retrieve_interval")]
    pub retrieve_interval_secs: u64,
    /// Interval for the full spreadsheet history reload, disabled when unset
    #[serde(default)]
    pub spreadsheet_sync_interval_secs: Option<u64>,
    /// Upper bound for one source's whole retrieval
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    /// Per HTTP request timeout applied by every retriever's client
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Multiplier turning the one-day yield into an annual figure
    #[serde(default = "default_annualization_factor")]
    pub annualization_factor: f64,
    /// Run the retrieval job once at startup instead of waiting a full interval
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_retrieve_interval() -> u64 {
    3600
}

fn default_source_timeout() -> u64 {
    120
}

fn default_request_timeout() -> u64 {
    30
}

fn default_annualization_factor() -> f64 {
    365.0
}

fn default_run_on_start() -> bool {
    true
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            retrieve_interval_secs: default_retrieve_interval(),
            spreadsheet_sync_interval_secs: None,
            source_timeout_secs: default_source_timeout(),
            request_timeout_secs: default_request_timeout(),
            annualization_factor: default_annualization_factor(),
            run_on_start: default_run_on_start(),
        }
    }
}

/// Price oracle (CoinGecko compatible `simple/price` endpoint).
#[derive(Debug, Deserialize, Clone)]
pub struct PriceSettings {
    #[serde(default = "default_price_base_url")]
    pub base_url: String,
    #[serde(default = "default_coin_id")]
    pub coin_id: String,
}

fn default_price_base_url() -> String {
    "https://api.coingecko.com/api/v3/".to_string()
}

fn default_coin_id() -> String {
    "pocket-network".to_string()
}

/// Governance snapshot GraphQL endpoint and the space to track.
#[derive(Debug, Deserialize, Clone)]
pub struct GovernanceSettings {
    #[serde(default = "default_governance_base_url")]
    pub base_url: String,
    #[serde(default = "default_space_id")]
    pub space_id: String,
}

fn default_governance_base_url() -> String {
    "https://hub.snapshot.org/graphql".to_string()
}

fn default_space_id() -> String {
    "poktdao.eth".to_string()
}

/// Spreadsheet (Google Sheets v4 REST) holding manually curated metrics.
#[derive(Debug, Deserialize, Clone)]
pub struct SpreadsheetSettings {
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
    pub spreadsheet_id: String,
    pub api_key: String,
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com/v4/".to_string()
}

/// Chain analytics GraphQL endpoint (bearer token authenticated).
#[derive(Debug, Deserialize, Clone)]
pub struct ChainAnalyticsSettings {
    pub base_url: String,
    pub api_token: String,
    /// DAO treasury account addresses whose balances are summed
    pub dao_addresses: Vec<String>,
}

/// Upstream data sources. A source left out of the file is not configured
/// and therefore never retrieved.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesSettings {
    #[serde(default)]
    pub price: Option<PriceSettings>,
    #[serde(default)]
    pub governance: Option<GovernanceSettings>,
    #[serde(default)]
    pub spreadsheet: Option<SpreadsheetSettings>,
    #[serde(default)]
    pub chain_analytics: Option<ChainAnalyticsSettings>,
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, then overridden by `DAOPULSE__*`
/// environment variables (e.g. `DAOPULSE__SOURCES__SPREADSHEET__API_KEY`).
/// Without a `postgres` section the service runs against an in-memory store.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub postgres: Option<PostgresSettings>,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub sources: SourcesSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("DAOPULSE").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(yaml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_applied_to_minimal_file() {
        let settings = parse(
            r#"
sources:
  price: {}
"#,
        );

        assert!(settings.postgres.is_none());
        assert_eq!(settings.schedule.retrieve_interval_secs, 3600);
        assert_eq!(settings.schedule.request_timeout_secs, 30);
        assert_eq!(settings.schedule.annualization_factor, 365.0);
        assert!(settings.schedule.spreadsheet_sync_interval_secs.is_none());
        assert!(settings.schedule.run_on_start);

        let price = settings.sources.price.unwrap();
        assert_eq!(price.coin_id, "pocket-network");
        assert!(settings.sources.governance.is_none());
    }

    #[test]
    fn test_daily_deployment_overrides() {
        let settings = parse(
            r#"
postgres:
  host: localhost
  port: 5432
  user: pulse
  password: secret
  database: metrics
schedule:
  retrieve_interval_secs: 86400
  annualization_factor: 365
  spreadsheet_sync_interval_secs: 604800
sources:
  chain_analytics:
    base_url: https://api.example.org/graphql
    api_token: token
    dao_addresses: ["6386713deb27b609daad5e2e32ee6591753e5f4e"]
"#,
        );

        let postgres = settings.postgres.unwrap();
        assert_eq!(postgres.pool_size, 8);
        assert_eq!(settings.schedule.retrieve_interval_secs, 86400);
        assert_eq!(
            settings.schedule.spreadsheet_sync_interval_secs,
            Some(604800)
        );
        assert_eq!(
            settings.sources.chain_analytics.unwrap().dao_addresses.len(),
            1
        );
    }
}
