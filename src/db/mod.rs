use std::sync::Arc;

use log::{info, warn};

use crate::config::Settings;

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use models::{Collection, DailyRecord, MetricRecord};
pub use postgres::PostgresClient;
pub use store::{MetricStore, Store, StoreReport};

/// Open the configured metric store.
///
/// PostgreSQL is used when `postgres` is configured, with migrations applied
/// on connect. Without it the service runs against an in-process store and
/// nothing survives a restart.
pub async fn connect(settings: &Settings) -> anyhow::Result<Arc<dyn MetricStore>> {
    match &settings.postgres {
        Some(postgres) => {
            let client = PostgresClient::new(postgres).await?;
            client.migrate().await?;
            client.health_check().await?;
            Ok(Arc::new(client))
        },
        None => {
            warn!("No PostgreSQL configured, metrics are kept in memory only");
            info!("Using in-memory metric store");
            Ok(Arc::new(MemoryStore::new()))
        },
    }
}
