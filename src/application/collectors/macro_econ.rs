//! Macro collector: FRED series observations. Daily cadence or lower;
//! weekends and holidays publish nothing and get no rows.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::feature_set::MACRO_SERIES;
use crate::domain::ports::{DateRange, MacroSource};
use crate::domain::repositories::{DataDomain, MacroRepository};
use crate::domain::validation::{RecordValidator, retain_valid};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Days;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Live ticks re-fetch a trailing window to pick up provider revisions.
const LIVE_LOOKBACK_DAYS: u64 = 14;

pub struct MacroCollector {
    source: Arc<dyn MacroSource>,
    repo: Arc<dyn MacroRepository>,
}

impl MacroCollector {
    pub fn new(source: Arc<dyn MacroSource>, repo: Arc<dyn MacroRepository>) -> Self {
        Self { source, repo }
    }

    async fn collect_range(
        &self,
        ctx: &TickContext,
        range: DateRange,
        force: bool,
    ) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();

        for (series_id, _column) in MACRO_SERIES {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if !force
                && let Some(latest) = self.repo.latest_date(series_id).await?
                && latest >= range.end
            {
                debug!(series = series_id, "series current through range end, skipping");
                continue;
            }

            outcome.api_calls += 1;
            let rows = match self.source.fetch_series(series_id, range).await {
                Ok(rows) => rows,
                Err(err) if is_tick_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(series = series_id, error = %err, "series fetch failed, skipping");
                    outcome.batch_errors += 1;
                    continue;
                }
            };

            let (valid, rejected) = retain_valid(rows, RecordValidator::validate_macro);
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
}

#[async_trait]
impl Collector for MacroCollector {
    fn name(&self) -> &'static str {
        "macro"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Macro
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let today = ctx.now.date_naive();
        let start = today
            .checked_sub_days(Days::new(LIVE_LOOKBACK_DAYS))
            .unwrap_or(today);
        self.collect_range(ctx, DateRange::new(start, today), true).await
    }

    async fn backfill(&self, ctx: &TickContext, range: DateRange, force: bool) -> Result<TickOutcome> {
        self.collect_range(ctx, range, force).await
    }

    fn estimate_backfill_records(&self, _symbols: usize, range: &DateRange) -> u64 {
        MACRO_SERIES.len() as u64 * range.days().max(0) as u64
    }
}
