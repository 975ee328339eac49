use crate::domain::types::{
    MacroIndicator, OhlcBar, OnchainObservation, PriceObservation, SentimentSignal,
};
use tracing::warn;

/// Centralized validator for incoming observations.
///
/// Rejects records that are arithmetically impossible. A rejected record is
/// dropped and counted; it never aborts the batch.
pub struct RecordValidator;

impl RecordValidator {
    pub fn validate_price(p: &PriceObservation) -> Result<(), String> {
        if !p.current_price.is_finite() || p.current_price < 0.0 {
            return Err(format!(
                "{}: non-finite or negative price {}",
                p.symbol, p.current_price
            ));
        }
        if let (Some(high), Some(low), Some(open)) = (p.high_24h, p.low_24h, p.open_24h) {
            let close = p.current_price;
            if low > open.min(close) || open.max(close) > high {
                return Err(format!(
                    "{}: 24h range violated (low={low}, open={open}, close={close}, high={high})",
                    p.symbol
                ));
            }
        }
        Ok(())
    }

    pub fn validate_ohlc(bar: &OhlcBar) -> Result<(), String> {
        let (open, high, low, close) = (bar.open, bar.high, bar.low, bar.close);
        if [open, high, low, close].iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(format!("{}: non-finite or negative OHLC component", bar.symbol));
        }
        if low > open.min(close) || open.max(close) > high {
            return Err(format!(
                "{}: OHLC arithmetic violated (o={open}, h={high}, l={low}, c={close})",
                bar.symbol
            ));
        }
        if let Some(volume) = bar.volume
            && volume < 0.0
        {
            return Err(format!("{}: negative volume {volume}", bar.symbol));
        }
        Ok(())
    }

    pub fn validate_onchain(row: &OnchainObservation) -> Result<(), String> {
        if let (Some(circulating), Some(total)) = (row.circulating_supply, row.total_supply)
            && circulating > total
        {
            return Err(format!(
                "{}: circulating {circulating} > total {total}",
                row.symbol
            ));
        }
        if let (Some(total), Some(max)) = (row.total_supply, row.max_supply)
            && max.is_finite()
            && total > max
        {
            return Err(format!("{}: total {total} > max {max}", row.symbol));
        }
        Ok(())
    }

    pub fn validate_macro(row: &MacroIndicator) -> Result<(), String> {
        if !row.value.is_finite() {
            return Err(format!("{}: non-finite value", row.series_id));
        }
        Ok(())
    }

    pub fn validate_sentiment(signal: &SentimentSignal) -> Result<(), String> {
        if !(-1.0..=1.0).contains(&signal.avg_sentiment) {
            return Err(format!(
                "{}: sentiment {} outside [-1, 1]",
                signal.symbol, signal.avg_sentiment
            ));
        }
        if !(0.0..=1.0).contains(&signal.avg_confidence) {
            return Err(format!(
                "{}: confidence {} outside [0, 1]",
                signal.symbol, signal.avg_confidence
            ));
        }
        if signal.article_count < 0 {
            return Err(format!("{}: negative article count", signal.symbol));
        }
        Ok(())
    }
}

/// Retain the valid records of a batch, logging and counting the rejects.
/// Returns `(kept, rejected_reasons)`.
pub fn retain_valid<T>(
    records: Vec<T>,
    validate: impl Fn(&T) -> Result<(), String>,
) -> (Vec<T>, Vec<String>) {
    let mut kept = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        match validate(&record) {
            Ok(()) => kept.push(record),
            Err(reason) => {
                warn!(reason = %reason, "dropping invalid record");
                rejected.push(reason);
            }
        }
    }
    (kept, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Timeframe;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64) -> OhlcBar {
        OhlcBar {
            symbol: "BTC".to_string(),
            timeframe: Timeframe::H1,
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: Some(100.0),
            data_source: "test".to_string(),
            data_completeness_percentage: 100.0,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(RecordValidator::validate_ohlc(&bar(100.0, 110.0, 95.0, 105.0)).is_ok());
    }

    #[test]
    fn low_above_open_rejected() {
        assert!(RecordValidator::validate_ohlc(&bar(100.0, 110.0, 101.0, 105.0)).is_err());
    }

    #[test]
    fn close_above_high_rejected() {
        assert!(RecordValidator::validate_ohlc(&bar(100.0, 104.0, 95.0, 105.0)).is_err());
    }

    #[test]
    fn negative_price_rejected() {
        let p = PriceObservation {
            symbol: "BTC".to_string(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            current_price: -1.0,
            high_24h: None,
            low_24h: None,
            open_24h: None,
            volume_24h: None,
            price_change_pct_24h: None,
            market_cap: None,
            market_cap_rank: None,
            data_source: "test".to_string(),
            data_completeness_percentage: 50.0,
        };
        assert!(RecordValidator::validate_price(&p).is_err());
    }

    #[test]
    fn supply_ordering_enforced_only_where_reported() {
        let mut row = OnchainObservation {
            symbol: "BTC".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            data_source: "test".to_string(),
            ..Default::default()
        };
        assert!(RecordValidator::validate_onchain(&row).is_ok());

        row.circulating_supply = Some(21_000_000.0);
        row.total_supply = Some(20_000_000.0);
        assert!(RecordValidator::validate_onchain(&row).is_err());
    }

    #[test]
    fn retain_valid_drops_and_reports() {
        let bars = vec![bar(100.0, 110.0, 95.0, 105.0), bar(100.0, 90.0, 95.0, 105.0)];
        let (kept, rejected) = retain_valid(bars, RecordValidator::validate_ohlc);
        assert_eq!(kept.len(), 1);
        assert_eq!(rejected.len(), 1);
    }
}
