//! Derivatives collector: funding and open interest for assets with a
//! supported perpetual market. Optional domain; unsupported symbols are
//! skipped, never faked.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::ports::DerivativesSource;
use crate::domain::repositories::{DataDomain, DerivativesRepository};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct DerivativesCollector {
    source: Arc<dyn DerivativesSource>,
    repo: Arc<dyn DerivativesRepository>,
}

impl DerivativesCollector {
    pub fn new(source: Arc<dyn DerivativesSource>, repo: Arc<dyn DerivativesRepository>) -> Self {
        Self { source, repo }
    }
}

#[async_trait]
impl Collector for DerivativesCollector {
    fn name(&self) -> &'static str {
        "derivatives"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Derivatives
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        let mut rows = Vec::new();

        for asset in ctx.symbols.iter().filter(|a| a.supports_derivatives) {
            if ctx.cancel.is_cancelled() {
                break;
            }
            outcome.api_calls += 1;
            match self.source.fetch_derivatives(asset).await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(err) if is_tick_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(symbol = %asset.symbol, error = %err, "derivatives fetch failed, skipping");
                    outcome.batch_errors += 1;
                }
            }
        }

        if !rows.is_empty() {
            let write_started = Instant::now();
            for batch in rows.chunks(ctx.batch_size) {
                self.repo.upsert_batch(batch).await?;
                outcome.db_writes += 1;
            }
            outcome.db_write_duration = write_started.elapsed();
            outcome.collected = rows.len() as u64;
        }
        Ok(outcome)
    }

    fn estimate_backfill_records(&self, symbols: usize, range: &crate::domain::ports::DateRange) -> u64 {
        symbols as u64 * range.days().max(0) as u64 * 24
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::placeholder::PlaceholderManager;
    use crate::domain::errors::FetchError;
    use crate::domain::types::{Asset, DerivativesObservation};
    use crate::infrastructure::persistence::in_memory::InMemoryDerivativesRepository;
    use chrono::{TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    struct StubDerivativesSource;

    #[async_trait]
    impl DerivativesSource for StubDerivativesSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_derivatives(
            &self,
            asset: &Asset,
        ) -> Result<Option<DerivativesObservation>, FetchError> {
            if asset.binance_symbol.is_none() {
                return Ok(None);
            }
            Ok(Some(DerivativesObservation {
                symbol: asset.symbol.clone(),
                ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                funding_rate: Some(0.0001),
                open_interest: Some(5.0e4),
                mark_price: Some(40_000.0),
                index_price: Some(40_010.0),
                data_source: "stub".to_string(),
                data_completeness_percentage: 100.0,
            }))
        }
    }

    fn asset(symbol: &str, pair: Option<&str>, derivatives: bool) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            coingecko_id: None,
            binance_symbol: pair.map(str::to_string),
            category: None,
            market_cap_rank: None,
            is_active: true,
            supports_derivatives: derivatives,
        }
    }

    #[tokio::test]
    async fn only_supported_symbols_are_queried() {
        let repo = Arc::new(InMemoryDerivativesRepository::new());
        let collector = DerivativesCollector::new(Arc::new(StubDerivativesSource), repo.clone());

        let ctx = TickContext {
            symbols: vec![
                asset("BTC", Some("BTCUSDT"), true),
                asset("NOPERP", None, false),
                asset("ALSONO", Some("ALSONOUSDT"), false),
            ],
            batch_size: 100,
            completeness_threshold: 50.0,
            placeholders: Arc::new(PlaceholderManager::new(vec![], 50.0)),
            cancel: CancellationToken::new(),
            now: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let outcome = collector.collect(&ctx).await.unwrap();

        assert_eq!(outcome.api_calls, 1, "unsupported assets never hit the API");
        assert_eq!(outcome.collected, 1);
        assert_eq!(repo.len().await, 1);
    }
}
