//! OHLC collector: multi-timeframe candles per symbol, arithmetic-validated.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::ports::{DateRange, OhlcSource};
use crate::domain::repositories::{DataDomain, OhlcRepository};
use crate::domain::types::{TimeWindow, Timeframe};
use crate::domain::validation::{RecordValidator, retain_valid};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const TIMEFRAMES: &[Timeframe] = &[Timeframe::H1, Timeframe::H4, Timeframe::D1];

pub struct OhlcCollector {
    source: Arc<dyn OhlcSource>,
    repo: Arc<dyn OhlcRepository>,
}

impl OhlcCollector {
    pub fn new(source: Arc<dyn OhlcSource>, repo: Arc<dyn OhlcRepository>) -> Self {
        Self { source, repo }
    }

    /// Candle slots a fully-covered `(timeframe, range)` would hold.
    fn expected_bars(timeframe: Timeframe, range: &DateRange) -> usize {
        let days = range.days().max(0) as usize;
        match timeframe {
            Timeframe::H1 => days * 24,
            Timeframe::H4 => days * 6,
            Timeframe::D1 => days,
        }
    }

    async fn collect_range(
        &self,
        ctx: &TickContext,
        range: DateRange,
        force: bool,
    ) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        let window = TimeWindow::new(
            Utc.from_utc_datetime(&range.start.and_hms_opt(0, 0, 0).expect("midnight is valid")),
            Utc.from_utc_datetime(&range.end.and_hms_opt(0, 0, 0).expect("midnight is valid"))
                + ChronoDuration::days(1),
        );

        for asset in &ctx.symbols {
            if ctx.cancel.is_cancelled() {
                break;
            }
            for timeframe in TIMEFRAMES {
                if !force {
                    let existing = self.repo.series(&asset.symbol, *timeframe, window).await?;
                    if existing.len() >= Self::expected_bars(*timeframe, &range) {
                        debug!(
                            symbol = %asset.symbol,
                            timeframe = %timeframe,
                            "range already covered, skipping"
                        );
                        continue;
                    }
                }

                outcome.api_calls += 1;
                let bars = match self.source.fetch_ohlc(asset, *timeframe, range).await {
                    Ok(bars) => bars,
                    Err(err) if is_tick_fatal(&err) => return Err(err.into()),
                    Err(err) => {
                        warn!(
                            symbol = %asset.symbol,
                            timeframe = %timeframe,
                            error = %err,
                            "candle fetch failed, skipping"
                        );
                        outcome.batch_errors += 1;
                        continue;
                    }
                };

                let (valid, rejected) = retain_valid(bars, RecordValidator::validate_ohlc);
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
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Collector for OhlcCollector {
    fn name(&self) -> &'static str {
        "ohlc"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Ohlc
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let today = ctx.now.date_naive();
        self.collect_range(ctx, DateRange::new(today, today), true).await
    }

    async fn backfill(&self, ctx: &TickContext, range: DateRange, force: bool) -> Result<TickOutcome> {
        self.collect_range(ctx, range, force).await
    }

    fn estimate_backfill_records(&self, symbols: usize, range: &DateRange) -> u64 {
        let per_symbol: usize = TIMEFRAMES
            .iter()
            .map(|tf| Self::expected_bars(*tf, range))
            .sum();
        symbols as u64 * per_symbol as u64
    }
}
