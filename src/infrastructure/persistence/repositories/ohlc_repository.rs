use crate::domain::repositories::OhlcRepository;
use crate::domain::types::{OhlcBar, TimeWindow, Timeframe};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, QueryBuilder, Row};

use super::completeness_gated_update;

const TABLE: &str = "ohlc_data";
const PAYLOAD_COLUMNS: &[&str] = &["open", "high", "low", "close", "volume"];

pub struct MySqlOhlcRepository {
    pool: MySqlPool,
}

impl MySqlOhlcRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OhlcRepository for MySqlOhlcRepository {
    async fn upsert_batch(&self, rows: &[OhlcBar]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO ohlc_data \
                 (symbol, timeframe, ts, open, high, low, close, volume, data_source, \
                  data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.timeframe.as_str())
                    .push_bind(row.ts)
                    .push_bind(row.open)
                    .push_bind(row.high)
                    .push_bind(row.low)
                    .push_bind(row.close)
                    .push_bind(row.volume)
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

    async fn series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<OhlcBar>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM ohlc_data
            WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts < ?
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let timeframe_str: String = row.try_get("timeframe")?;
                Ok(OhlcBar {
                    symbol: row.try_get("symbol")?,
                    timeframe: Timeframe::parse(&timeframe_str).unwrap_or(timeframe),
                    ts: row.try_get("ts")?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: row.try_get("volume")?,
                    data_source: row.try_get("data_source")?,
                    data_completeness_percentage: row.try_get("data_completeness_percentage")?,
                })
            })
            .collect()
    }
}
