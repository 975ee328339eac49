use crate::domain::repositories::{
    CompletenessStats, DataDomain, PlaceholderStore, SentimentRepository,
};
use crate::domain::types::{PLACEHOLDER_SOURCE, PlaceholderKey, SentimentSignal, TimeWindow};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, QueryBuilder, Row};

use super::completeness_gated_update;

const TABLE: &str = "sentiment_signals";

const PAYLOAD_COLUMNS: &[&str] = &[
    "avg_sentiment",
    "avg_confidence",
    "article_count",
    "fear_greed_index",
];

pub struct MySqlSentimentRepository {
    pool: MySqlPool,
}

impl MySqlSentimentRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SentimentRepository for MySqlSentimentRepository {
    async fn upsert_batch(&self, rows: &[SentimentSignal]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO sentiment_signals \
                 (symbol, bucket_start, avg_sentiment, avg_confidence, article_count, \
                  fear_greed_index, data_source, data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.bucket_start)
                    .push_bind(row.avg_sentiment)
                    .push_bind(row.avg_confidence)
                    .push_bind(row.article_count)
                    .push_bind(row.fear_greed_index)
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
    ) -> Result<Vec<SentimentSignal>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<sqlx::MySql> =
            QueryBuilder::new("SELECT * FROM sentiment_signals WHERE bucket_start >= ");
        qb.push_bind(window.start);
        qb.push(" AND bucket_start < ").push_bind(window.end);
        qb.push(" AND data_source <> ").push_bind(PLACEHOLDER_SOURCE);
        qb.push(" AND symbol IN (");
        let mut separated = qb.separated(", ");
        for symbol in symbols {
            separated.push_bind(symbol);
        }
        qb.push(") ORDER BY symbol, bucket_start");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(SentimentSignal {
                    symbol: row.try_get("symbol")?,
                    bucket_start: row.try_get("bucket_start")?,
                    avg_sentiment: row.try_get::<Option<f64>, _>("avg_sentiment")?.unwrap_or(0.0),
                    avg_confidence: row
                        .try_get::<Option<f64>, _>("avg_confidence")?
                        .unwrap_or(0.0),
                    article_count: row.try_get::<Option<i32>, _>("article_count")?.unwrap_or(0)
                        as i64,
                    fear_greed_index: row.try_get("fear_greed_index")?,
                    data_source: row.try_get("data_source")?,
                    data_completeness_percentage: row.try_get("data_completeness_percentage")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PlaceholderStore for MySqlSentimentRepository {
    fn placeholder_domain(&self) -> DataDomain {
        DataDomain::Sentiment
    }

    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let inserted = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT IGNORE INTO sentiment_signals \
                 (symbol, bucket_start, data_source, data_completeness_percentage) ",
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
            "bucket_start",
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
