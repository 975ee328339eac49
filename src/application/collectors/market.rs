//! Market collector: global aggregates (total cap, volume, dominance).
//! Keyed by timestamp alone; the symbol work-list is irrelevant here.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::ports::MarketSource;
use crate::domain::repositories::{DataDomain, MarketRepository};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct MarketCollector {
    source: Arc<dyn MarketSource>,
    repo: Arc<dyn MarketRepository>,
}

impl MarketCollector {
    pub fn new(source: Arc<dyn MarketSource>, repo: Arc<dyn MarketRepository>) -> Self {
        Self { source, repo }
    }
}

#[async_trait]
impl Collector for MarketCollector {
    fn name(&self) -> &'static str {
        "market"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Market
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        outcome.api_calls = 1;

        let snapshot = match self.source.fetch_global().await {
            Ok(snapshot) => snapshot,
            Err(err) if is_tick_fatal(&err) => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "global market fetch failed");
                outcome.batch_errors = 1;
                return Ok(outcome);
            }
        };

        if ctx.cancel.is_cancelled() {
            return Ok(outcome);
        }

        let write_started = Instant::now();
        self.repo.upsert_batch(std::slice::from_ref(&snapshot)).await?;
        outcome.db_writes = 1;
        outcome.db_write_duration = write_started.elapsed();
        outcome.collected = 1;
        Ok(outcome)
    }

    fn estimate_backfill_records(&self, _symbols: usize, range: &crate::domain::ports::DateRange) -> u64 {
        range.days().max(0) as u64 * 24
    }
}
