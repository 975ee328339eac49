use crate::domain::ports::DateRange;
use crate::domain::repositories::{
    CompletenessStats, DataDomain, OnchainRepository, PlaceholderStore,
};
use crate::domain::types::{PLACEHOLDER_SOURCE, OnchainObservation, PlaceholderKey, TimeWindow};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, QueryBuilder, Row};

use super::completeness_gated_update;

const TABLE: &str = "onchain_data";

const PAYLOAD_COLUMNS: &[&str] = &[
    "circulating_supply",
    "total_supply",
    "max_supply",
    "active_addresses",
    "transaction_count",
    "twitter_followers",
    "reddit_subscribers",
    "github_stars",
    "github_commits_4w",
    "developer_score",
    "community_score",
    "liquidity_score",
    "public_interest_score",
];

pub struct MySqlOnchainRepository {
    pool: MySqlPool,
}

impl MySqlOnchainRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::mysql::MySqlRow) -> Result<OnchainObservation> {
        Ok(OnchainObservation {
            symbol: row.try_get("symbol")?,
            date: row.try_get("date")?,
            circulating_supply: row.try_get("circulating_supply")?,
            total_supply: row.try_get("total_supply")?,
            max_supply: row.try_get("max_supply")?,
            active_addresses: row.try_get("active_addresses")?,
            transaction_count: row.try_get("transaction_count")?,
            twitter_followers: row.try_get("twitter_followers")?,
            reddit_subscribers: row.try_get("reddit_subscribers")?,
            github_stars: row.try_get("github_stars")?,
            github_commits_4w: row.try_get("github_commits_4w")?,
            developer_score: row.try_get("developer_score")?,
            community_score: row.try_get("community_score")?,
            liquidity_score: row.try_get("liquidity_score")?,
            public_interest_score: row.try_get("public_interest_score")?,
            data_source: row.try_get("data_source")?,
            data_completeness_percentage: row.try_get("data_completeness_percentage")?,
        })
    }
}

#[async_trait]
impl OnchainRepository for MySqlOnchainRepository {
    async fn upsert_batch(&self, rows: &[OnchainObservation]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO onchain_data \
                 (symbol, date, circulating_supply, total_supply, max_supply, active_addresses, \
                  transaction_count, twitter_followers, reddit_subscribers, github_stars, \
                  github_commits_4w, developer_score, community_score, liquidity_score, \
                  public_interest_score, data_source, data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.date)
                    .push_bind(row.circulating_supply)
                    .push_bind(row.total_supply)
                    .push_bind(row.max_supply)
                    .push_bind(row.active_addresses)
                    .push_bind(row.transaction_count)
                    .push_bind(row.twitter_followers)
                    .push_bind(row.reddit_subscribers)
                    .push_bind(row.github_stars)
                    .push_bind(row.github_commits_4w)
                    .push_bind(row.developer_score)
                    .push_bind(row.community_score)
                    .push_bind(row.liquidity_score)
                    .push_bind(row.public_interest_score)
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
        range: DateRange,
    ) -> Result<Vec<OnchainObservation>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
            "SELECT * FROM onchain_data WHERE date >= ",
        );
        qb.push_bind(range.start);
        qb.push(" AND date <= ").push_bind(range.end);
        qb.push(" AND data_source <> ").push_bind(PLACEHOLDER_SOURCE);
        qb.push(" AND symbol IN (");
        let mut separated = qb.separated(", ");
        for symbol in symbols {
            separated.push_bind(symbol);
        }
        qb.push(") ORDER BY symbol, date");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::from_row).collect()
    }
}

#[async_trait]
impl PlaceholderStore for MySqlOnchainRepository {
    fn placeholder_domain(&self) -> DataDomain {
        DataDomain::Onchain
    }

    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let inserted = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT IGNORE INTO onchain_data \
                 (symbol, date, data_source, data_completeness_percentage) ",
            );
            qb.push_values(keys, |mut b, key| {
                b.push_bind(&key.symbol)
                    .push_bind(key.slot.date_naive())
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
            "date",
            super::SlotGranularity::Daily,
            window,
            threshold,
        )
        .await
    }

    async fn completeness_stats(&self) -> Result<CompletenessStats> {
        super::placeholder_stats(&self.pool, TABLE).await
    }
}
