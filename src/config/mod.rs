#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    ChainAnalyticsSettings, GovernanceSettings, PostgresSettings, PriceSettings, ScheduleSettings,
    Settings, SourcesSettings, SpreadsheetSettings,
};
