use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{error, info};
use tokio_postgres::types::ToSql;

use super::PostgresClient;
use crate::db::{
    models::{Collection, DailyRecord, MetricRecord},
    store::{ensure_metric_collection, MetricStore},
};

const METRIC_COLS_PER_ROW: usize = 3;
const METRIC_BATCH_SIZE: usize = 1000;

/// `INSERT ... VALUES ($1,$2,$3), ($4,$5,$6), ...` for `rows` metric rows.
fn metric_insert_query(collection: Collection, rows: usize) -> String {
    let values_clauses: Vec<String> = (0..rows)
        .map(|i| {
            let start = i * METRIC_COLS_PER_ROW + 1;
            let placeholders: Vec<String> = (start..start + METRIC_COLS_PER_ROW)
                .map(|n| format!("${}", n))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        r#"
        INSERT INTO {} (date, metric_name, metric_value)
        VALUES {}
        ON CONFLICT (date, metric_name) DO NOTHING
        "#,
        collection.table_name(),
        values_clauses.join(", ")
    )
}

async fn insert_metric_rows(
    tx: &deadpool_postgres::Transaction<'_>,
    collection: Collection,
    rows: &[MetricRecord],
) -> Result<u64> {
    let mut inserted = 0;

    for chunk in rows.chunks(METRIC_BATCH_SIZE) {
        let query = metric_insert_query(collection, chunk.len());

        let mut params: Vec<&(dyn ToSql + Sync)> =
            Vec::with_capacity(chunk.len() * METRIC_COLS_PER_ROW);
        for row in chunk {
            params.push(&row.date);
            params.push(&row.metric_name);
            params.push(&row.metric_value);
        }

        inserted += tx.execute(&query, &params).await.map_err(|e| {
            error!(
                "Failed to batch insert {} rows into {}: {:?}",
                chunk.len(),
                collection,
                e
            );
            e
        })?;
    }

    Ok(inserted)
}

#[async_trait]
impl MetricStore for PostgresClient {
    async fn daily_record_exists(&self, collection: Collection, date: NaiveDate) -> Result<bool> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE date = $1)",
            collection.table_name()
        );

        let row = client.query_one(&query, &[&date]).await?;
        Ok(row.get(0))
    }

    async fn insert_daily_record(&self, record: &DailyRecord) -> Result<bool> {
        let client = self.pool.get().await?;

        let inserted = match record {
            DailyRecord::Price(price) => {
                client
                    .execute(
                        r#"
                        INSERT INTO price_metrics (date, price)
                        VALUES ($1, $2)
                        ON CONFLICT (date) DO NOTHING
                        "#,
                        &[&price.date, &price.price],
                    )
                    .await
            },
            DailyRecord::Governance(governance) => {
                client
                    .execute(
                        r#"
                        INSERT INTO governance_metrics (
                            date, community_proposals_count, core_proposals_count,
                            votes_count, voters_count
                        ) VALUES ($1, $2, $3, $4, $5)
                        ON CONFLICT (date) DO NOTHING
                        "#,
                        &[
                            &governance.date,
                            &governance.community_proposals_count,
                            &governance.core_proposals_count,
                            &governance.votes_count,
                            &governance.voters_count,
                        ],
                    )
                    .await
            },
            DailyRecord::ChainAnalytics(chain) => {
                client
                    .execute(
                        r#"
                        INSERT INTO chain_analytics_metrics (
                            date, total_balance, token_burn, token_issuance, circulating_supply,
                            validators_to_control_protocol_count,
                            primary_gateway_relays_share, secondary_gateway_relays_share
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        ON CONFLICT (date) DO NOTHING
                        "#,
                        &[
                            &chain.date,
                            &chain.total_balance,
                            &chain.token_burn,
                            &chain.token_issuance,
                            &chain.circulating_supply,
                            &chain.validators_to_control_protocol_count,
                            &chain.primary_gateway_relays_share,
                            &chain.secondary_gateway_relays_share,
                        ],
                    )
                    .await
            },
        }
        .map_err(|e| {
            error!(
                "Failed to insert {} record for {}: {:?}",
                record.collection(),
                record.date(),
                e
            );
            e
        })?;

        Ok(inserted > 0)
    }

    async fn metric_exists(
        &self,
        collection: Collection,
        date: NaiveDate,
        metric_name: &str,
    ) -> Result<bool> {
        ensure_metric_collection(collection)?;
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE date = $1 AND metric_name = $2)",
            collection.table_name()
        );

        let row = client.query_one(&query, &[&date, &metric_name]).await?;
        Ok(row.get(0))
    }

    async fn insert_metrics(&self, collection: Collection, rows: &[MetricRecord]) -> Result<u64> {
        ensure_metric_collection(collection)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let inserted = insert_metric_rows(&tx, collection, rows).await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit insert into {}", collection))?;

        Ok(inserted)
    }

    async fn replace_metrics(&self, collection: Collection, rows: &[MetricRecord]) -> Result<u64> {
        ensure_metric_collection(collection)?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let query = format!("DELETE FROM {}", collection.table_name());
        let deleted = tx
            .execute(&query, &[])
            .await
            .with_context(|| format!("Failed to clear {}", collection))?;
        info!("[{}] cleared {} rows for full replace", collection, deleted);

        let inserted = insert_metric_rows(&tx, collection, rows).await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit replace of {}", collection))?;

        Ok(inserted)
    }

    async fn list_metrics(&self, collection: Collection) -> Result<Vec<MetricRecord>> {
        ensure_metric_collection(collection)?;
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT date, metric_name, metric_value FROM {} ORDER BY date, metric_name",
            collection.table_name()
        );

        let rows = client.query(&query, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| MetricRecord {
                date: row.get("date"),
                metric_name: row.get("metric_name"),
                metric_value: row.get("metric_value"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_insert_query_placeholders() {
        let query = metric_insert_query(Collection::Compound, 2);
        assert!(query.contains("INSERT INTO compound_metrics"));
        assert!(query.contains("($1, $2, $3), ($4, $5, $6)"));
        assert!(query.contains("ON CONFLICT (date, metric_name) DO NOTHING"));
    }
}
