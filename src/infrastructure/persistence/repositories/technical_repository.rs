use crate::domain::repositories::TechnicalRepository;
use crate::domain::types::{PLACEHOLDER_SOURCE, TechnicalIndicator, TimeWindow};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, QueryBuilder, Row};

use super::completeness_gated_update;

const TABLE: &str = "technical_indicators";

const PAYLOAD_COLUMNS: &[&str] = &[
    "sma_20",
    "sma_50",
    "sma_200",
    "ema_12",
    "ema_26",
    "rsi_14",
    "macd",
    "macd_signal",
    "macd_histogram",
    "bb_upper",
    "bb_middle",
    "bb_lower",
    "atr_14",
];

pub struct MySqlTechnicalRepository {
    pool: MySqlPool,
}

impl MySqlTechnicalRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::mysql::MySqlRow) -> Result<TechnicalIndicator> {
        Ok(TechnicalIndicator {
            symbol: row.try_get("symbol")?,
            ts: row.try_get("ts")?,
            sma_20: row.try_get("sma_20")?,
            sma_50: row.try_get("sma_50")?,
            sma_200: row.try_get("sma_200")?,
            ema_12: row.try_get("ema_12")?,
            ema_26: row.try_get("ema_26")?,
            rsi_14: row.try_get("rsi_14")?,
            macd: row.try_get("macd")?,
            macd_signal: row.try_get("macd_signal")?,
            macd_histogram: row.try_get("macd_histogram")?,
            bb_upper: row.try_get("bb_upper")?,
            bb_middle: row.try_get("bb_middle")?,
            bb_lower: row.try_get("bb_lower")?,
            atr_14: row.try_get("atr_14")?,
            data_source: row.try_get("data_source")?,
            data_completeness_percentage: row.try_get("data_completeness_percentage")?,
        })
    }
}

#[async_trait]
impl TechnicalRepository for MySqlTechnicalRepository {
    async fn upsert_batch(&self, rows: &[TechnicalIndicator]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO technical_indicators \
                 (symbol, ts, sma_20, sma_50, sma_200, ema_12, ema_26, rsi_14, macd, \
                  macd_signal, macd_histogram, bb_upper, bb_middle, bb_lower, atr_14, \
                  data_source, data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.ts)
                    .push_bind(row.sma_20)
                    .push_bind(row.sma_50)
                    .push_bind(row.sma_200)
                    .push_bind(row.ema_12)
                    .push_bind(row.ema_26)
                    .push_bind(row.rsi_14)
                    .push_bind(row.macd)
                    .push_bind(row.macd_signal)
                    .push_bind(row.macd_histogram)
                    .push_bind(row.bb_upper)
                    .push_bind(row.bb_middle)
                    .push_bind(row.bb_lower)
                    .push_bind(row.atr_14)
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

    async fn in_range(
        &self,
        symbols: &[String],
        window: TimeWindow,
    ) -> Result<Vec<TechnicalIndicator>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<sqlx::MySql> =
            QueryBuilder::new("SELECT * FROM technical_indicators WHERE ts >= ");
        qb.push_bind(window.start);
        qb.push(" AND ts < ").push_bind(window.end);
        qb.push(" AND data_source <> ").push_bind(PLACEHOLDER_SOURCE);
        qb.push(" AND symbol IN (");
        let mut separated = qb.separated(", ");
        for symbol in symbols {
            separated.push_bind(symbol);
        }
        qb.push(") ORDER BY symbol, ts");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn latest_ts(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(ts) AS latest FROM technical_indicators WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("latest")?)
    }
}
