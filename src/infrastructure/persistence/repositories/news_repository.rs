use crate::domain::repositories::NewsRepository;
use crate::domain::types::{ArticleScores, NewsArticle, TimeWindow};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, QueryBuilder, Row};

const TABLE: &str = "news_articles";

pub struct MySqlNewsRepository {
    pool: MySqlPool,
}

impl MySqlNewsRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::mysql::MySqlRow) -> Result<NewsArticle> {
        let mentioned: Option<String> = row.try_get("symbols_mentioned")?;
        Ok(NewsArticle {
            url_hash: row.try_get("url_hash")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            source: row.try_get("source")?,
            published_at: row.try_get("published_at")?,
            content: row.try_get("content")?,
            symbols_mentioned: mentioned
                .map(|s| s.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
            sentiment_score: row.try_get("sentiment_score")?,
            sentiment_confidence: row.try_get("sentiment_confidence")?,
            crypto_sentiment_score: row.try_get("crypto_sentiment_score")?,
            crypto_sentiment_confidence: row.try_get("crypto_sentiment_confidence")?,
            stock_sentiment_score: row.try_get("stock_sentiment_score")?,
            stock_sentiment_confidence: row.try_get("stock_sentiment_confidence")?,
            collected_at: row.try_get("collected_at")?,
        })
    }
}

#[async_trait]
impl NewsRepository for MySqlNewsRepository {
    async fn insert_new(&self, articles: &[NewsArticle]) -> Result<u64> {
        if articles.is_empty() {
            return Ok(0);
        }
        let inserted = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT IGNORE INTO news_articles \
                 (url_hash, url, title, source, published_at, content, symbols_mentioned, \
                  collected_at) ",
            );
            qb.push_values(articles, |mut b, article| {
                b.push_bind(&article.url_hash)
                    .push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(&article.source)
                    .push_bind(article.published_at)
                    .push_bind(&article.content)
                    .push_bind(article.symbols_mentioned.join(","))
                    .push_bind(article.collected_at);
            });
            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(inserted)
    }

    async fn unscored(&self, limit: usize) -> Result<Vec<NewsArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM news_articles
            WHERE sentiment_score IS NULL
            ORDER BY published_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn apply_scores(&self, url_hash: &str, scores: &ArticleScores) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE news_articles SET
                sentiment_score = ?, sentiment_confidence = ?,
                crypto_sentiment_score = ?, crypto_sentiment_confidence = ?,
                stock_sentiment_score = ?, stock_sentiment_confidence = ?
            WHERE url_hash = ?
            "#,
        )
        .bind(scores.generic.0)
        .bind(scores.generic.1)
        .bind(scores.crypto.0)
        .bind(scores.crypto.1)
        .bind(scores.stock.0)
        .bind(scores.stock.1)
        .bind(url_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scored_in(&self, window: TimeWindow) -> Result<Vec<NewsArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM news_articles
            WHERE sentiment_score IS NOT NULL AND published_at >= ? AND published_at < ?
            ORDER BY published_at ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM news_articles")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
