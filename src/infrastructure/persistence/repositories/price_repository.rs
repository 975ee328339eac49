use crate::domain::repositories::{CompletenessStats, DataDomain, PlaceholderStore, PriceRepository};
use crate::domain::types::{
    PLACEHOLDER_SOURCE, PlaceholderKey, PriceObservation, TimeWindow,
};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, QueryBuilder, Row};

use super::completeness_gated_update;

const TABLE: &str = "price_data_real";

const PAYLOAD_COLUMNS: &[&str] = &[
    "current_price",
    "high_24h",
    "low_24h",
    "open_24h",
    "volume_24h",
    "price_change_pct_24h",
    "market_cap",
    "market_cap_rank",
];

pub struct MySqlPriceRepository {
    pool: MySqlPool,
}

impl MySqlPriceRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::mysql::MySqlRow) -> Result<PriceObservation> {
        Ok(PriceObservation {
            symbol: row.try_get("symbol")?,
            ts: row.try_get("ts")?,
            current_price: row.try_get::<Option<f64>, _>("current_price")?.unwrap_or(0.0),
            high_24h: row.try_get("high_24h")?,
            low_24h: row.try_get("low_24h")?,
            open_24h: row.try_get("open_24h")?,
            volume_24h: row.try_get("volume_24h")?,
            price_change_pct_24h: row.try_get("price_change_pct_24h")?,
            market_cap: row.try_get("market_cap")?,
            market_cap_rank: row.try_get("market_cap_rank")?,
            data_source: row.try_get("data_source")?,
            data_completeness_percentage: row.try_get("data_completeness_percentage")?,
        })
    }
}

#[async_trait]
impl PriceRepository for MySqlPriceRepository {
    async fn upsert_batch(&self, rows: &[PriceObservation]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO price_data_real \
                 (symbol, ts, current_price, high_24h, low_24h, open_24h, volume_24h, \
                  price_change_pct_24h, market_cap, market_cap_rank, data_source, \
                  data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.ts)
                    .push_bind(row.current_price)
                    .push_bind(row.high_24h)
                    .push_bind(row.low_24h)
                    .push_bind(row.open_24h)
                    .push_bind(row.volume_24h)
                    .push_bind(row.price_change_pct_24h)
                    .push_bind(row.market_cap)
                    .push_bind(row.market_cap_rank)
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

    async fn rows_after(
        &self,
        hwm: DateTime<Utc>,
        max_symbols: usize,
    ) -> Result<Vec<PriceObservation>> {
        // Symbol-bounded scan: the subquery picks up to `max_symbols` symbols
        // with fresh rows, the outer query loads all their fresh rows.
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM price_data_real p
            JOIN (
                SELECT DISTINCT symbol FROM price_data_real
                WHERE ts > ? AND data_source <> ? ORDER BY symbol LIMIT ?
            ) s ON p.symbol = s.symbol
            WHERE p.ts > ? AND p.data_source <> ?
            ORDER BY p.ts ASC
            "#,
        )
        .bind(hwm)
        .bind(PLACEHOLDER_SOURCE)
        .bind(max_symbols as i64)
        .bind(hwm)
        .bind(PLACEHOLDER_SOURCE)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn series_before(
        &self,
        symbol: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceObservation>> {
        let mut rows: Vec<PriceObservation> = sqlx::query(
            r#"
            SELECT * FROM price_data_real
            WHERE symbol = ? AND ts <= ? AND data_source <> ?
            ORDER BY ts DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(before)
        .bind(PLACEHOLDER_SOURCE)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(Self::from_row)
        .collect::<Result<_>>()?;
        rows.reverse();
        Ok(rows)
    }

    async fn max_ts(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(ts) AS max_ts FROM price_data_real WHERE data_source <> ?")
            .bind(PLACEHOLDER_SOURCE)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("max_ts")?)
    }
}

#[async_trait]
impl PlaceholderStore for MySqlPriceRepository {
    fn placeholder_domain(&self) -> DataDomain {
        DataDomain::Price
    }

    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let inserted = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT IGNORE INTO price_data_real \
                 (symbol, ts, data_source, data_completeness_percentage) ",
            );
            qb.push_values(keys, |mut b, key| {
                b.push_bind(&key.symbol)
                    .push_bind(key.slot)
                    .push_bind(PLACEHOLDER_SOURCE)
                    .push_bind(0.0f64);
            });
            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(inserted)
    }

    async fn gap_keys(&self, window: TimeWindow, threshold: f64) -> Result<Vec<PlaceholderKey>> {
        super::placeholder_gaps(
            &self.pool,
            TABLE,
            "ts",
            super::SlotGranularity::Hourly,
            window,
            threshold,
        )
        .await
    }

    async fn completeness_stats(&self) -> Result<CompletenessStats> {
        super::placeholder_stats(&self.pool, TABLE).await
    }
}
