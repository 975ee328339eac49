//! Technical collector: derived indicator series computed from stored price
//! history. Pure computation, no external I/O.

use super::{Collector, TickContext, TickOutcome};
use crate::domain::repositories::{DataDomain, PriceRepository, TechnicalRepository};
use crate::domain::types::{
    COMPLETENESS_FULL, COMPLETENESS_PARTIAL, PriceObservation, TechnicalIndicator,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{DataItem, Next};
use tracing::debug;

/// Longest lookback in the indicator set; the price series is capped here.
const SERIES_LIMIT: usize = 250;

const DATA_SOURCE: &str = "derived";

pub struct TechnicalCollector {
    prices: Arc<dyn PriceRepository>,
    repo: Arc<dyn TechnicalRepository>,
}

impl TechnicalCollector {
    pub fn new(prices: Arc<dyn PriceRepository>, repo: Arc<dyn TechnicalRepository>) -> Self {
        Self { prices, repo }
    }

    fn run_f64_indicator<I: Next<f64, Output = f64>>(
        indicator: Result<I, impl std::error::Error>,
        closes: &[f64],
        min_points: usize,
    ) -> Option<f64> {
        if closes.len() < min_points {
            return None;
        }
        let mut indicator = indicator.ok()?;
        closes
            .iter()
            .map(|close| indicator.next(*close))
            .last()
    }

    /// Compute one indicator row for `symbol` from its price series.
    /// Indicators with fewer points than their lookback stay NULL rather
    /// than reporting a half-warmed value.
    pub fn compute(symbol: &str, ts: DateTime<Utc>, series: &[PriceObservation]) -> TechnicalIndicator {
        let closes: Vec<f64> = series.iter().map(|p| p.current_price).collect();

        let sma_20 = Self::run_f64_indicator(SimpleMovingAverage::new(20), &closes, 20);
        let sma_50 = Self::run_f64_indicator(SimpleMovingAverage::new(50), &closes, 50);
        let sma_200 = Self::run_f64_indicator(SimpleMovingAverage::new(200), &closes, 200);
        let ema_12 = Self::run_f64_indicator(ExponentialMovingAverage::new(12), &closes, 12);
        let ema_26 = Self::run_f64_indicator(ExponentialMovingAverage::new(26), &closes, 26);
        let rsi_14 = Self::run_f64_indicator(RelativeStrengthIndex::new(14), &closes, 15);

        let macd_out = if closes.len() >= 35 {
            MovingAverageConvergenceDivergence::new(12, 26, 9).ok().map(|mut macd| {
                closes
                    .iter()
                    .map(|close| macd.next(*close))
                    .last()
                    .expect("series is non-empty")
            })
        } else {
            None
        };

        let bb_out = if closes.len() >= 20 {
            BollingerBands::new(20, 2.0).ok().map(|mut bb| {
                closes
                    .iter()
                    .map(|close| bb.next(*close))
                    .last()
                    .expect("series is non-empty")
            })
        } else {
            None
        };

        // ATR needs true ranges; it is only computed when every point in the
        // window carries a reported high and low.
        let atr_14 = if series.len() >= 14
            && series.iter().all(|p| p.high_24h.is_some() && p.low_24h.is_some())
        {
            AverageTrueRange::new(14).ok().and_then(|mut atr| {
                let mut last = None;
                for point in series {
                    let item = DataItem::builder()
                        .high(point.high_24h.unwrap_or(point.current_price))
                        .low(point.low_24h.unwrap_or(point.current_price))
                        .close(point.current_price)
                        .open(point.open_24h.unwrap_or(point.current_price))
                        .volume(point.volume_24h.unwrap_or(0.0))
                        .build()
                        .ok()?;
                    last = Some(atr.next(&item));
                }
                last
            })
        } else {
            None
        };

        let mut row = TechnicalIndicator {
            symbol: symbol.to_string(),
            ts,
            sma_20,
            sma_50,
            sma_200,
            ema_12,
            ema_26,
            rsi_14,
            macd: macd_out.as_ref().map(|m| m.macd),
            macd_signal: macd_out.as_ref().map(|m| m.signal),
            macd_histogram: macd_out.map(|m| m.histogram),
            bb_upper: bb_out.as_ref().map(|b| b.upper),
            bb_middle: bb_out.as_ref().map(|b| b.average),
            bb_lower: bb_out.map(|b| b.lower),
            atr_14,
            data_source: DATA_SOURCE.to_string(),
            data_completeness_percentage: 0.0,
        };

        let fields = [
            row.sma_20,
            row.sma_50,
            row.sma_200,
            row.ema_12,
            row.ema_26,
            row.rsi_14,
            row.macd,
            row.macd_signal,
            row.macd_histogram,
            row.bb_upper,
            row.bb_middle,
            row.bb_lower,
            row.atr_14,
        ];
        let populated = fields.iter().filter(|f| f.is_some()).count();
        row.data_completeness_percentage = if populated == 0 {
            0.0
        } else {
            COMPLETENESS_PARTIAL
                + (COMPLETENESS_FULL - COMPLETENESS_PARTIAL) * populated as f64
                    / fields.len() as f64
        };
        row
    }
}

#[async_trait]
impl Collector for TechnicalCollector {
    fn name(&self) -> &'static str {
        "technical"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Technical
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        let mut rows = Vec::with_capacity(ctx.symbols.len());

        for asset in &ctx.symbols {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let series = self
                .prices
                .series_before(&asset.symbol, ctx.now, SERIES_LIMIT)
                .await?;
            let Some(last) = series.last() else {
                debug!(symbol = %asset.symbol, "no price history yet, skipping");
                continue;
            };
            let row = Self::compute(&asset.symbol, last.ts, &series);
            if row.data_completeness_percentage == 0.0 {
                debug!(symbol = %asset.symbol, points = series.len(), "series too short for any indicator");
                continue;
            }
            rows.push(row);
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
