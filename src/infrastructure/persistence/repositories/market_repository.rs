use crate::domain::repositories::MarketRepository;
use crate::domain::types::MarketSnapshot;
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, QueryBuilder};

use super::completeness_gated_update;

const TABLE: &str = "market_data";
const PAYLOAD_COLUMNS: &[&str] = &[
    "total_market_cap_usd",
    "total_volume_24h_usd",
    "btc_dominance_pct",
    "eth_dominance_pct",
    "active_cryptocurrencies",
    "markets",
];

pub struct MySqlMarketRepository {
    pool: MySqlPool,
}

impl MySqlMarketRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketRepository for MySqlMarketRepository {
    async fn upsert_batch(&self, rows: &[MarketSnapshot]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO market_data \
                 (ts, total_market_cap_usd, total_volume_24h_usd, btc_dominance_pct, \
                  eth_dominance_pct, active_cryptocurrencies, markets, data_source, \
                  data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(row.ts)
                    .push_bind(row.total_market_cap_usd)
                    .push_bind(row.total_volume_24h_usd)
                    .push_bind(row.btc_dominance_pct)
                    .push_bind(row.eth_dominance_pct)
                    .push_bind(row.active_cryptocurrencies)
                    .push_bind(row.markets)
                    .push_bind(&row.data_source)
                    .push_bind(row.data_completeness_percentage);
            });
            qb.push(" AS new ON DUPLICATE KEY UPDATE ");
            qb.push(completeness_gated_update(TABLE, PAYLOAD_COLUMNS));
            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(written)
    }
}
