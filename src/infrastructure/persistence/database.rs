use crate::domain::errors::StoreError;
use anyhow::{Context, Result};
use rand::Rng;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{info, warn};

/// Shared database handle. One pool for the whole process, bounded
/// concurrency, every acquire carrying a timeout.
#[derive(Clone)]
pub struct Database {
    pub pool: MySqlPool,
}

/// Connection settings, filled from `DB_*` environment variables.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
}

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const LOCK_RETRY_ATTEMPTS: u32 = 3;

/// All symbol columns share one collation; a mismatch between tables breaks
/// the materialized join and is treated as a schema defect.
pub const SYMBOL_COLLATION: &str = "utf8mb4_0900_ai_ci";

// MySQL error numbers for deadlock and lock-wait timeout.
const ER_LOCK_DEADLOCK: u32 = 1213;
const ER_LOCK_WAIT_TIMEOUT: u32 = 1205;

impl Database {
    pub async fn connect(settings: &DbSettings) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.name)
            .username(&settings.user)
            .password(&settings.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.pool_size)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .context("failed to connect to MySQL")?;

        info!(
            host = %settings.host,
            db = %settings.name,
            pool_size = settings.pool_size,
            "connected to database"
        );

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Idempotent schema creation. Every table is created with the shared
    /// collation so symbol joins never hit a collation mismatch.
    async fn init(&self) -> Result<()> {
        for ddl in TABLE_DDL {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to run DDL: {}", &ddl[..ddl.len().min(60)]))?;
        }
        info!("database schema initialized");
        Ok(())
    }
}

/// True when the error is a MySQL deadlock or lock-wait timeout.
pub fn is_lock_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|e| {
                let number = e.number() as u32;
                number == ER_LOCK_DEADLOCK || number == ER_LOCK_WAIT_TIMEOUT
            })
            .unwrap_or(false),
        _ => false,
    }
}

/// Run `op`, retrying deadlocks and lock-wait timeouts with a small jittered
/// backoff. After the retry budget the error surfaces as
/// `StoreError::LockContention`, which callers treat as skip-and-continue.
pub async fn with_lock_retry<T, F, Fut>(table: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_lock_error(&err) => {
                attempt += 1;
                if attempt >= LOCK_RETRY_ATTEMPTS {
                    warn!(table, attempts = attempt, "lock contention exhausted retries");
                    return Err(StoreError::LockContention {
                        table: table.to_string(),
                    }
                    .into());
                }
                let jitter_ms = rand::rng().random_range(20..120) * attempt as u64;
                warn!(table, attempt, jitter_ms, "lock error, retrying");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
            Err(err) => {
                return Err(anyhow::Error::from(err).context(format!("query on {table} failed")));
            }
        }
    }
}

const TABLE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        symbol VARCHAR(16) NOT NULL PRIMARY KEY,
        name VARCHAR(128) NOT NULL,
        coingecko_id VARCHAR(64) NULL,
        binance_symbol VARCHAR(32) NULL,
        category VARCHAR(64) NULL,
        market_cap_rank INT UNSIGNED NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        supports_derivatives BOOLEAN NOT NULL DEFAULT FALSE
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_data_real (
        symbol VARCHAR(16) NOT NULL,
        ts DATETIME NOT NULL,
        current_price DOUBLE NULL,
        high_24h DOUBLE NULL,
        low_24h DOUBLE NULL,
        open_24h DOUBLE NULL,
        volume_24h DOUBLE NULL,
        price_change_pct_24h DOUBLE NULL,
        market_cap DOUBLE NULL,
        market_cap_rank INT UNSIGNED NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, ts),
        INDEX idx_price_ts (ts)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ohlc_data (
        symbol VARCHAR(16) NOT NULL,
        timeframe VARCHAR(8) NOT NULL,
        ts DATETIME NOT NULL,
        open DOUBLE NOT NULL,
        high DOUBLE NOT NULL,
        low DOUBLE NOT NULL,
        close DOUBLE NOT NULL,
        volume DOUBLE NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, timeframe, ts)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS onchain_data (
        symbol VARCHAR(16) NOT NULL,
        date DATE NOT NULL,
        circulating_supply DOUBLE NULL,
        total_supply DOUBLE NULL,
        max_supply DOUBLE NULL,
        active_addresses BIGINT NULL,
        transaction_count BIGINT NULL,
        twitter_followers BIGINT NULL,
        reddit_subscribers BIGINT NULL,
        github_stars BIGINT NULL,
        github_commits_4w BIGINT NULL,
        developer_score DOUBLE NULL,
        community_score DOUBLE NULL,
        liquidity_score DOUBLE NULL,
        public_interest_score DOUBLE NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, date)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS macro_indicators (
        indicator_name VARCHAR(64) NOT NULL,
        indicator_date DATE NOT NULL,
        value DOUBLE NOT NULL,
        frequency VARCHAR(16) NULL,
        data_source VARCHAR(32) NOT NULL,
        PRIMARY KEY (indicator_name, indicator_date)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS news_articles (
        url_hash VARCHAR(64) NOT NULL PRIMARY KEY,
        url TEXT NOT NULL,
        title TEXT NOT NULL,
        source VARCHAR(128) NOT NULL,
        published_at DATETIME NOT NULL,
        content MEDIUMTEXT NULL,
        symbols_mentioned TEXT NULL,
        sentiment_score DOUBLE NULL,
        sentiment_confidence DOUBLE NULL,
        crypto_sentiment_score DOUBLE NULL,
        crypto_sentiment_confidence DOUBLE NULL,
        stock_sentiment_score DOUBLE NULL,
        stock_sentiment_confidence DOUBLE NULL,
        collected_at DATETIME NOT NULL,
        INDEX idx_news_published (published_at),
        INDEX idx_news_unscored (sentiment_score, published_at)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sentiment_signals (
        symbol VARCHAR(16) NOT NULL,
        bucket_start DATETIME NOT NULL,
        avg_sentiment DOUBLE NULL,
        avg_confidence DOUBLE NULL,
        article_count INT NULL,
        fear_greed_index DOUBLE NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, bucket_start)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS technical_indicators (
        symbol VARCHAR(16) NOT NULL,
        ts DATETIME NOT NULL,
        sma_20 DOUBLE NULL,
        sma_50 DOUBLE NULL,
        sma_200 DOUBLE NULL,
        ema_12 DOUBLE NULL,
        ema_26 DOUBLE NULL,
        rsi_14 DOUBLE NULL,
        macd DOUBLE NULL,
        macd_signal DOUBLE NULL,
        macd_histogram DOUBLE NULL,
        bb_upper DOUBLE NULL,
        bb_middle DOUBLE NULL,
        bb_lower DOUBLE NULL,
        atr_14 DOUBLE NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, ts)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS derivatives_data (
        symbol VARCHAR(16) NOT NULL,
        ts DATETIME NOT NULL,
        funding_rate DOUBLE NULL,
        open_interest DOUBLE NULL,
        mark_price DOUBLE NULL,
        index_price DOUBLE NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, ts)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS market_data (
        ts DATETIME NOT NULL PRIMARY KEY,
        total_market_cap_usd DOUBLE NULL,
        total_volume_24h_usd DOUBLE NULL,
        btc_dominance_pct DOUBLE NULL,
        eth_dominance_pct DOUBLE NULL,
        active_cryptocurrencies BIGINT NULL,
        markets BIGINT NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ml_features_materialized (
        symbol VARCHAR(16) NOT NULL,
        feature_date DATE NOT NULL,
        feature_hour TINYINT UNSIGNED NOT NULL,
        current_price DOUBLE NULL,
        high_24h DOUBLE NULL,
        low_24h DOUBLE NULL,
        open_24h DOUBLE NULL,
        volume_24h DOUBLE NULL,
        price_change_pct_24h DOUBLE NULL,
        market_cap DOUBLE NULL,
        market_cap_rank INT UNSIGNED NULL,
        sma_20 DOUBLE NULL,
        sma_50 DOUBLE NULL,
        sma_200 DOUBLE NULL,
        ema_12 DOUBLE NULL,
        ema_26 DOUBLE NULL,
        rsi_14 DOUBLE NULL,
        macd DOUBLE NULL,
        macd_signal DOUBLE NULL,
        macd_histogram DOUBLE NULL,
        bb_upper DOUBLE NULL,
        bb_middle DOUBLE NULL,
        bb_lower DOUBLE NULL,
        atr_14 DOUBLE NULL,
        vix DOUBLE NULL,
        fed_funds_rate DOUBLE NULL,
        treasury_10y DOUBLE NULL,
        cpi DOUBLE NULL,
        dxy DOUBLE NULL,
        sp500 DOUBLE NULL,
        wti_oil DOUBLE NULL,
        gold DOUBLE NULL,
        circulating_supply DOUBLE NULL,
        total_supply DOUBLE NULL,
        max_supply DOUBLE NULL,
        active_addresses BIGINT NULL,
        transaction_count BIGINT NULL,
        twitter_followers BIGINT NULL,
        reddit_subscribers BIGINT NULL,
        github_stars BIGINT NULL,
        github_commits_4w BIGINT NULL,
        developer_score DOUBLE NULL,
        community_score DOUBLE NULL,
        liquidity_score DOUBLE NULL,
        public_interest_score DOUBLE NULL,
        avg_sentiment DOUBLE NULL,
        avg_confidence DOUBLE NULL,
        article_count INT NULL,
        fear_greed_index DOUBLE NULL,
        data_source VARCHAR(32) NOT NULL,
        data_completeness_percentage DOUBLE NOT NULL DEFAULT 0,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
        PRIMARY KEY (symbol, feature_date, feature_hour),
        INDEX idx_features_date (feature_date)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_monitoring (
        component VARCHAR(64) NOT NULL PRIMARY KEY,
        state_json TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci
    "#,
];
