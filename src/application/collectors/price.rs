//! Price collector: spot snapshots for every active symbol, 5 minute cadence.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::ports::PriceSource;
use crate::domain::repositories::{DataDomain, PriceRepository};
use crate::domain::validation::{RecordValidator, retain_valid};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct PriceCollector {
    source: Arc<dyn PriceSource>,
    repo: Arc<dyn PriceRepository>,
}

impl PriceCollector {
    pub fn new(source: Arc<dyn PriceSource>, repo: Arc<dyn PriceRepository>) -> Self {
        Self { source, repo }
    }
}

#[async_trait]
impl Collector for PriceCollector {
    fn name(&self) -> &'static str {
        "price"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Price
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();

        // The markets endpoint accepts many ids per call; chunk to the
        // provider page size so one bad page cannot sink the whole tick.
        for chunk in ctx.symbols.chunks(ctx.batch_size.min(250)) {
            if ctx.cancel.is_cancelled() {
                break;
            }
            outcome.api_calls += 1;
            let records = match self.source.fetch_prices(chunk).await {
                Ok(records) => records,
                Err(err) if is_tick_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(collector = "price", error = %err, "batch fetch failed, skipping");
                    outcome.batch_errors += 1;
                    continue;
                }
            };

            let (valid, rejected) = retain_valid(records, RecordValidator::validate_price);
            outcome.invalid_records += rejected.len() as u64;
            outcome.validation_errors.extend(rejected);

            if valid.is_empty() {
                continue;
            }
            let write_started = Instant::now();
            for batch in valid.chunks(ctx.batch_size) {
                self.repo.upsert_batch(batch).await?;
                outcome.db_writes += 1;
            }
            outcome.db_write_duration += write_started.elapsed();
            outcome.collected += valid.len() as u64;
        }
        Ok(outcome)
    }

    fn estimate_backfill_records(&self, symbols: usize, range: &crate::domain::ports::DateRange) -> u64 {
        // Hourly key slots per symbol per day.
        symbols as u64 * range.days().max(0) as u64 * 24
    }
}
