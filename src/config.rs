use crate::infrastructure::persistence::database::DbSettings;
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Shared runtime-patchable configuration. `PUT /config` writes through
/// this handle; collectors read it at the start of each tick.
pub type ConfigHandle = std::sync::Arc<tokio::sync::RwLock<Config>>;

/// Per-collector scheduling settings, overridable via
/// `<COLLECTOR>_CADENCE_SECONDS` and `<COLLECTOR>_ENABLED`.
#[derive(Debug, Clone, Copy)]
pub struct CollectorSettings {
    pub cadence: Duration,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbSettings,
    pub http_port: u16,

    // Credentials; an absent key disables the adapter.
    pub coingecko_api_key: Option<String>,
    pub fred_api_key: Option<String>,
    pub newsapi_key: Option<String>,
    pub rss_feed_urls: Vec<String>,

    pub price: CollectorSettings,
    pub ohlc: CollectorSettings,
    pub onchain: CollectorSettings,
    pub macro_econ: CollectorSettings,
    pub news: CollectorSettings,
    pub sentiment: CollectorSettings,
    pub technical: CollectorSettings,
    pub derivatives: CollectorSettings,
    pub market: CollectorSettings,
    pub materialized: CollectorSettings,

    pub feature_set_version: String,
    pub materialized_max_batch_symbols: usize,
    pub materialized_max_memory_mb: usize,

    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,

    pub batch_size: usize,
    pub backfill_lookback_days: u64,
    /// Rows below this completeness are treated as gaps.
    pub completeness_threshold: f64,
    pub shutdown_grace_seconds: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("failed to parse {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn collector_settings(prefix: &str, default_cadence_secs: u64) -> Result<CollectorSettings> {
    let cadence_secs: u64 = env_or(&format!("{prefix}_CADENCE_SECONDS"), default_cadence_secs)?;
    let enabled: bool = env_or(&format!("{prefix}_ENABLED"), true)?;
    Ok(CollectorSettings {
        cadence: Duration::from_secs(cadence_secs),
        enabled,
    })
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db = DbSettings {
            host: env_or("DB_HOST", "127.0.0.1".to_string())?,
            port: env_or("DB_PORT", 3306u16)?,
            name: env_or("DB_NAME", "cryptopulse".to_string())?,
            user: env_or("DB_USER", "cryptopulse".to_string())?,
            password: env::var("DB_PASSWORD").unwrap_or_default(),
            pool_size: env_or("DB_POOL_SIZE", 15u32)?,
        };

        let rss_feed_urls = env::var("RSS_FEED_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let feature_set_version = env_or("FEATURE_SET_VERSION", "v1".to_string())?;
        crate::domain::feature_set::FeatureSet::resolve(&feature_set_version)
            .with_context(|| format!("unknown FEATURE_SET_VERSION {feature_set_version:?}"))?;

        Ok(Config {
            db,
            http_port: env_or("HTTP_PORT", 8080u16)?,
            coingecko_api_key: env_opt("COINGECKO_API_KEY"),
            fred_api_key: env_opt("FRED_API_KEY"),
            newsapi_key: env_opt("NEWSAPI_KEY"),
            rss_feed_urls,
            price: collector_settings("PRICE", 300)?,
            ohlc: collector_settings("OHLC", 300)?,
            onchain: collector_settings("ONCHAIN", 21_600)?,
            macro_econ: collector_settings("MACRO", 21_600)?,
            news: collector_settings("NEWS", 900)?,
            sentiment: collector_settings("SENTIMENT", 900)?,
            technical: collector_settings("TECHNICAL", 300)?,
            derivatives: collector_settings("DERIVATIVES", 900)?,
            market: collector_settings("MARKET", 300)?,
            materialized: collector_settings("MATERIALIZED", 120)?,
            feature_set_version,
            materialized_max_batch_symbols: env_or("MATERIALIZED_MAX_BATCH_SYMBOLS", 5_000usize)?,
            materialized_max_memory_mb: env_or("MATERIALIZED_MAX_MEMORY_MB", 256usize)?,
            circuit_breaker_threshold: env_or("CIRCUIT_BREAKER_THRESHOLD", 5u32)?,
            circuit_breaker_cooldown_seconds: env_or("CIRCUIT_BREAKER_COOLDOWN_SECONDS", 300u64)?,
            batch_size: env_or("BATCH_SIZE", 500usize)?,
            backfill_lookback_days: env_or("BACKFILL_LOOKBACK_DAYS", 7u64)?,
            completeness_threshold: env_or("COMPLETENESS_THRESHOLD", 50.0f64)?,
            shutdown_grace_seconds: env_or("SHUTDOWN_GRACE_SECONDS", 45u64)?,
        })
    }

    pub fn settings_for(&self, collector: &str) -> Option<CollectorSettings> {
        match collector {
            "price" => Some(self.price),
            "ohlc" => Some(self.ohlc),
            "onchain" => Some(self.onchain),
            "macro" => Some(self.macro_econ),
            "news" => Some(self.news),
            "sentiment" => Some(self.sentiment),
            "technical" => Some(self.technical),
            "derivatives" => Some(self.derivatives),
            "market" => Some(self.market),
            "materialized" => Some(self.materialized),
            _ => None,
        }
    }

    /// Redacted view for `GET /config`. Secrets never leave the process.
    pub fn public_view(&self) -> serde_json::Value {
        let collector = |s: &CollectorSettings| {
            serde_json::json!({
                "cadence_seconds": s.cadence.as_secs(),
                "enabled": s.enabled,
            })
        };
        serde_json::json!({
            "db": {
                "host": self.db.host,
                "port": self.db.port,
                "name": self.db.name,
                "pool_size": self.db.pool_size,
            },
            "http_port": self.http_port,
            "adapters": {
                "coingecko_key": self.coingecko_api_key.is_some(),
                "fred": self.fred_api_key.is_some(),
                "newsapi": self.newsapi_key.is_some(),
                "rss_feeds": self.rss_feed_urls.len(),
            },
            "collectors": {
                "price": collector(&self.price),
                "ohlc": collector(&self.ohlc),
                "onchain": collector(&self.onchain),
                "macro": collector(&self.macro_econ),
                "news": collector(&self.news),
                "sentiment": collector(&self.sentiment),
                "technical": collector(&self.technical),
                "derivatives": collector(&self.derivatives),
                "market": collector(&self.market),
                "materialized": collector(&self.materialized),
            },
            "feature_set_version": self.feature_set_version,
            "materialized_max_batch_symbols": self.materialized_max_batch_symbols,
            "materialized_max_memory_mb": self.materialized_max_memory_mb,
            "circuit_breaker_threshold": self.circuit_breaker_threshold,
            "circuit_breaker_cooldown_seconds": self.circuit_breaker_cooldown_seconds,
            "batch_size": self.batch_size,
            "backfill_lookback_days": self.backfill_lookback_days,
            "completeness_threshold": self.completeness_threshold,
            "shutdown_grace_seconds": self.shutdown_grace_seconds,
        })
    }

    /// Apply a `PUT /config` patch to the in-memory config. Only tuning
    /// knobs are patchable; connection settings and credentials require a
    /// restart. Returns the names of the fields that changed.
    pub fn apply_patch(&mut self, patch: &serde_json::Value) -> Result<Vec<String>> {
        let Some(object) = patch.as_object() else {
            anyhow::bail!("config patch must be a JSON object");
        };

        let mut changed = Vec::new();
        for (key, value) in object {
            match key.as_str() {
                "batch_size" => {
                    self.batch_size = value
                        .as_u64()
                        .context("batch_size must be a positive integer")?
                        as usize;
                }
                "backfill_lookback_days" => {
                    self.backfill_lookback_days = value
                        .as_u64()
                        .context("backfill_lookback_days must be a positive integer")?;
                }
                "completeness_threshold" => {
                    self.completeness_threshold = value
                        .as_f64()
                        .context("completeness_threshold must be a number")?;
                }
                "materialized_max_batch_symbols" => {
                    self.materialized_max_batch_symbols = value
                        .as_u64()
                        .context("materialized_max_batch_symbols must be a positive integer")?
                        as usize;
                }
                "materialized_max_memory_mb" => {
                    self.materialized_max_memory_mb = value
                        .as_u64()
                        .context("materialized_max_memory_mb must be a positive integer")?
                        as usize;
                }
                other => {
                    anyhow::bail!("unknown or non-patchable config field: {other}");
                }
            }
            changed.push(key.clone());
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_updates_known_fields_and_reports_them() {
        let mut config = Config::from_env().expect("default config");
        let patch = serde_json::json!({"batch_size": 100, "completeness_threshold": 60.0});
        let changed = config.apply_patch(&patch).expect("patch applies");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.completeness_threshold, 60.0);
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let mut config = Config::from_env().expect("default config");
        let patch = serde_json::json!({"db": {"host": "evil"}});
        assert!(config.apply_patch(&patch).is_err());
    }

    #[test]
    fn public_view_has_no_secrets() {
        let config = Config::from_env().expect("default config");
        let view = config.public_view().to_string();
        assert!(!view.contains("password"));
        assert!(!view.contains("api_key"));
    }
}
