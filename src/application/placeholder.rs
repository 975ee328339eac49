//! Placeholder manager: guarantees that every expected key row exists, so
//! gap detection and completeness reporting reduce to
//! "completeness < threshold" instead of "missing or present, unknown".

use crate::domain::repositories::{CompletenessStats, DataDomain, PlaceholderStore};
use crate::domain::types::{Asset, PlaceholderKey, TimeWindow};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PlaceholderManager {
    stores: Vec<Arc<dyn PlaceholderStore>>,
    completeness_threshold: f64,
}

impl PlaceholderManager {
    pub fn new(stores: Vec<Arc<dyn PlaceholderStore>>, completeness_threshold: f64) -> Self {
        Self {
            stores,
            completeness_threshold,
        }
    }

    fn store(&self, domain: DataDomain) -> Option<&Arc<dyn PlaceholderStore>> {
        self.stores.iter().find(|s| s.placeholder_domain() == domain)
    }

    /// Key slots covering `window` at the domain's granularity: hour starts
    /// for hourly domains, midnights for daily ones.
    pub fn expected_keys(
        domain: DataDomain,
        symbols: &[Asset],
        window: TimeWindow,
    ) -> Vec<PlaceholderKey> {
        let step = match domain {
            DataDomain::Onchain => ChronoDuration::days(1),
            _ => ChronoDuration::hours(1),
        };
        let Ok(mut slot) = window.start.duration_trunc(step) else {
            return Vec::new();
        };
        if slot < window.start {
            slot += step;
        }

        let mut slots = Vec::new();
        while slot < window.end {
            slots.push(slot);
            slot += step;
        }

        let mut keys = Vec::with_capacity(slots.len() * symbols.len());
        for asset in symbols {
            for slot in &slots {
                keys.push(PlaceholderKey {
                    symbol: asset.symbol.clone(),
                    slot: *slot,
                });
            }
        }
        keys
    }

    /// Insert skeleton rows for every expected key in `window` not already
    /// present. Idempotent; returns the number inserted.
    pub async fn ensure_placeholders(
        &self,
        domain: DataDomain,
        symbols: &[Asset],
        window: TimeWindow,
    ) -> Result<u64> {
        let Some(store) = self.store(domain) else {
            debug!(domain = domain.as_str(), "domain has no placeholder store");
            return Ok(0);
        };
        let keys = Self::expected_keys(domain, symbols, window);
        if keys.is_empty() {
            return Ok(0);
        }
        let inserted = store.ensure_placeholders(&keys).await?;
        if inserted > 0 {
            debug!(
                domain = domain.as_str(),
                inserted,
                expected = keys.len(),
                "placeholders ensured"
            );
        }
        Ok(inserted)
    }

    /// Keys whose completeness is below the configured threshold.
    pub async fn detect_gaps(
        &self,
        domain: DataDomain,
        window: TimeWindow,
    ) -> Result<Vec<PlaceholderKey>> {
        let Some(store) = self.store(domain) else {
            return Ok(Vec::new());
        };
        store.gap_keys(window, self.completeness_threshold).await
    }

    /// Per-domain `{total, filled, avg_completeness}`.
    pub async fn completeness_summary(&self) -> Result<HashMap<DataDomain, CompletenessStats>> {
        let mut summary = HashMap::new();
        for store in &self.stores {
            match store.completeness_stats().await {
                Ok(stats) => {
                    summary.insert(store.placeholder_domain(), stats);
                }
                Err(e) => {
                    warn!(
                        domain = store.placeholder_domain().as_str(),
                        error = %e,
                        "completeness rollup failed"
                    );
                }
            }
        }
        Ok(summary)
    }

    /// Hourly sweep over today's window for all placeholder domains.
    pub async fn sweep(&self, symbols: &[Asset], now: DateTime<Utc>) -> Result<u64> {
        let window = today_window(now);
        let mut inserted = 0;
        for store in &self.stores {
            inserted += self
                .ensure_placeholders(store.placeholder_domain(), symbols, window)
                .await?;
        }
        Ok(inserted)
    }
}

/// Midnight-to-midnight UTC window containing `now`.
pub fn today_window(now: DateTime<Utc>) -> TimeWindow {
    let start = now
        .duration_trunc(ChronoDuration::days(1))
        .unwrap_or(now);
    TimeWindow::new(start, start + ChronoDuration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::in_memory::{
        InMemoryOnchainRepository, InMemoryPriceRepository,
    };
    use crate::domain::repositories::PriceRepository;
    use chrono::TimeZone;

    fn asset(symbol: &str) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            coingecko_id: None,
            binance_symbol: None,
            category: None,
            market_cap_rank: None,
            is_active: true,
            supports_derivatives: false,
        }
    }

    #[test]
    fn hourly_keys_cover_the_window() {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap(),
        );
        let keys =
            PlaceholderManager::expected_keys(DataDomain::Price, &[asset("BTC")], window);
        assert_eq!(keys.len(), 6);
        assert_eq!(keys[0].slot, window.start);
    }

    #[test]
    fn daily_keys_use_midnights() {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 4, 0, 0, 0).unwrap(),
        );
        let keys = PlaceholderManager::expected_keys(
            DataDomain::Onchain,
            &[asset("BTC"), asset("ETH")],
            window,
        );
        assert_eq!(keys.len(), 6); // 3 days x 2 symbols
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let price_repo = Arc::new(InMemoryPriceRepository::new());
        let manager = PlaceholderManager::new(vec![price_repo.clone()], 50.0);
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap(),
        );

        let first = manager
            .ensure_placeholders(DataDomain::Price, &[asset("BTC")], window)
            .await
            .unwrap();
        assert_eq!(first, 3);

        let second = manager
            .ensure_placeholders(DataDomain::Price, &[asset("BTC")], window)
            .await
            .unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn gaps_close_when_real_data_lands() {
        let price_repo = Arc::new(InMemoryPriceRepository::new());
        let manager = PlaceholderManager::new(vec![price_repo.clone()], 50.0);
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap(),
        );
        manager
            .ensure_placeholders(DataDomain::Price, &[asset("BTC")], window)
            .await
            .unwrap();

        let gaps = manager.detect_gaps(DataDomain::Price, window).await.unwrap();
        assert_eq!(gaps.len(), 2);

        // A real write to the first hour removes it from the gap list.
        let real = crate::domain::types::PriceObservation {
            symbol: "BTC".to_string(),
            ts: window.start,
            current_price: 40_000.0,
            high_24h: None,
            low_24h: None,
            open_24h: None,
            volume_24h: None,
            price_change_pct_24h: None,
            market_cap: None,
            market_cap_rank: None,
            data_source: "coingecko".to_string(),
            data_completeness_percentage: 50.0,
        };
        price_repo.upsert_batch(&[real]).await.unwrap();

        let gaps = manager.detect_gaps(DataDomain::Price, window).await.unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(
            gaps[0].slot,
            Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn summary_covers_all_registered_domains() {
        let price_repo = Arc::new(InMemoryPriceRepository::new());
        let onchain_repo = Arc::new(InMemoryOnchainRepository::new());
        let manager = PlaceholderManager::new(vec![price_repo, onchain_repo], 50.0);

        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 30, 0).unwrap();
        manager.sweep(&[asset("BTC")], now).await.unwrap();

        let summary = manager.completeness_summary().await.unwrap();
        assert!(summary.contains_key(&DataDomain::Price));
        assert!(summary.contains_key(&DataDomain::Onchain));
        let price_stats = &summary[&DataDomain::Price];
        assert_eq!(price_stats.total, 24);
        assert_eq!(price_stats.filled, 0);
        assert_eq!(price_stats.avg_completeness, 0.0);
    }
}
