//! Onchain collector: daily supply / network / community snapshot per
//! symbol. Providers omit many fields; whatever is missing stays NULL.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::errors::FetchErrorKind;
use crate::domain::ports::OnchainSource;
use crate::domain::repositories::{DataDomain, OnchainRepository};
use crate::domain::validation::{RecordValidator, retain_valid};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct OnchainCollector {
    source: Arc<dyn OnchainSource>,
    repo: Arc<dyn OnchainRepository>,
}

impl OnchainCollector {
    pub fn new(source: Arc<dyn OnchainSource>, repo: Arc<dyn OnchainRepository>) -> Self {
        Self { source, repo }
    }
}

#[async_trait]
impl Collector for OnchainCollector {
    fn name(&self) -> &'static str {
        "onchain"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Onchain
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        let mut rows = Vec::with_capacity(ctx.symbols.len());

        for asset in &ctx.symbols {
            if ctx.cancel.is_cancelled() {
                break;
            }
            outcome.api_calls += 1;
            match self.source.fetch_onchain(asset).await {
                Ok(row) => rows.push(row),
                Err(err) if err.kind == FetchErrorKind::NotFound => {
                    warn!(symbol = %asset.symbol, "asset unknown to onchain source, skipping");
                }
                Err(err) if is_tick_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(symbol = %asset.symbol, error = %err, "onchain fetch failed, skipping");
                    outcome.batch_errors += 1;
                }
            }
        }

        let (valid, rejected) = retain_valid(rows, RecordValidator::validate_onchain);
        outcome.invalid_records += rejected.len() as u64;
        outcome.validation_errors.extend(rejected);

        if !valid.is_empty() {
            let write_started = Instant::now();
            for batch in valid.chunks(ctx.batch_size) {
                self.repo.upsert_batch(batch).await?;
                outcome.db_writes += 1;
            }
            outcome.db_write_duration = write_started.elapsed();
            outcome.collected = valid.len() as u64;
        }
        Ok(outcome)
    }

    // The provider exposes only current community/supply data, so backfill
    // replays the live pass (trait default).

    fn estimate_backfill_records(&self, symbols: usize, range: &crate::domain::ports::DateRange) -> u64 {
        symbols as u64 * range.days().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::placeholder::PlaceholderManager;
    use crate::domain::errors::FetchError;
    use crate::domain::types::{Asset, OnchainObservation};
    use crate::infrastructure::persistence::in_memory::InMemoryOnchainRepository;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    struct StubOnchainSource;

    #[async_trait]
    impl OnchainSource for StubOnchainSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_onchain(&self, asset: &Asset) -> Result<OnchainObservation, FetchError> {
            if asset.symbol == "GHOST" {
                return Err(FetchError::new("stub", FetchErrorKind::NotFound, "unknown"));
            }
            Ok(OnchainObservation {
                symbol: asset.symbol.clone(),
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                circulating_supply: Some(19_000_000.0),
                total_supply: Some(21_000_000.0),
                max_supply: Some(21_000_000.0),
                // Everything else genuinely absent; must stay None.
                data_source: "stub".to_string(),
                data_completeness_percentage: 60.0,
                ..Default::default()
            })
        }
    }

    fn asset(symbol: &str) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            coingecko_id: Some(symbol.to_lowercase()),
            binance_symbol: None,
            category: None,
            market_cap_rank: None,
            is_active: true,
            supports_derivatives: false,
        }
    }

    #[tokio::test]
    async fn unknown_assets_are_skipped_without_synthesis() {
        let repo = Arc::new(InMemoryOnchainRepository::new());
        let collector = OnchainCollector::new(Arc::new(StubOnchainSource), repo.clone());

        let ctx = TickContext {
            symbols: vec![asset("BTC"), asset("GHOST")],
            batch_size: 100,
            completeness_threshold: 50.0,
            placeholders: Arc::new(PlaceholderManager::new(vec![repo.clone()], 50.0)),
            cancel: CancellationToken::new(),
            now: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let outcome = collector.collect(&ctx).await.unwrap();

        assert_eq!(outcome.collected, 1);
        assert_eq!(outcome.api_calls, 2);

        let rows = repo
            .in_range(
                &["BTC".to_string()],
                crate::domain::ports::DateRange::new(
                    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                ),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].active_addresses, None, "absent field must stay NULL");
    }
}
