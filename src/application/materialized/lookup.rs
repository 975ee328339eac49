//! NULL-aware lookup rules for the materialized join.
//!
//! One batched query per domain fills these maps; every per-row lookup then
//! runs in memory. Carry-forward is bounded per domain (macro 7 days,
//! onchain 3 days, sentiment never) and nothing is ever pulled from the
//! future of the price row being joined.

use crate::domain::feature_set::macro_column;
use crate::domain::types::{
    MacroIndicator, OnchainObservation, SentimentSignal, TechnicalIndicator,
};
use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use std::collections::{BTreeMap, HashMap};

pub const MACRO_CARRY_FORWARD_DAYS: u64 = 7;
pub const ONCHAIN_CARRY_FORWARD_DAYS: u64 = 3;

#[derive(Default)]
pub struct LookupMaps {
    /// Per symbol, ascending by ts.
    technical: HashMap<String, Vec<TechnicalIndicator>>,
    /// Per feature column (already mapped from series id), by date.
    macros: HashMap<&'static str, BTreeMap<NaiveDate, f64>>,
    /// Per symbol, by date.
    onchain: HashMap<String, BTreeMap<NaiveDate, OnchainObservation>>,
    /// Exact hour buckets.
    sentiment: HashMap<(String, DateTime<Utc>), SentimentSignal>,
}

impl LookupMaps {
    pub fn new(
        technical_rows: Vec<TechnicalIndicator>,
        macro_rows: Vec<MacroIndicator>,
        onchain_rows: Vec<OnchainObservation>,
        sentiment_rows: Vec<SentimentSignal>,
    ) -> Self {
        let mut maps = Self::default();

        for row in technical_rows {
            maps.technical.entry(row.symbol.clone()).or_default().push(row);
        }
        for series in maps.technical.values_mut() {
            series.sort_by_key(|t| t.ts);
        }

        for row in macro_rows {
            // Series without a feature column are not part of the join.
            if let Some(column) = macro_column(&row.series_id) {
                maps.macros.entry(column).or_default().insert(row.date, row.value);
            }
        }

        for row in onchain_rows {
            maps.onchain
                .entry(row.symbol.clone())
                .or_default()
                .insert(row.date, row);
        }

        for row in sentiment_rows {
            maps.sentiment
                .insert((row.symbol.clone(), row.bucket_start), row);
        }

        maps
    }

    /// Rough resident size, used to bound the per-run working set.
    pub fn estimated_bytes(&self) -> usize {
        let technical: usize = self.technical.values().map(|v| v.len() * 256).sum();
        let macros: usize = self.macros.values().map(|m| m.len() * 48).sum();
        let onchain: usize = self.onchain.values().map(|m| m.len() * 320).sum();
        let sentiment = self.sentiment.len() * 160;
        technical + macros + onchain + sentiment
    }

    /// Latest technical row for `(symbol, date(ts))` with `row.ts <= ts`.
    /// Rows from a later time of day are never used.
    pub fn technical_at(&self, symbol: &str, ts: DateTime<Utc>) -> Option<&TechnicalIndicator> {
        let date = ts.date_naive();
        self.technical
            .get(symbol)?
            .iter()
            .rev()
            .find(|t| t.ts <= ts && t.ts.date_naive() == date)
    }

    /// Macro value broadcast by date with carry-forward of at most 7 days.
    pub fn macro_at(&self, column: &str, date: NaiveDate) -> Option<f64> {
        let by_date = self.macros.get(column)?;
        for back in 0..=MACRO_CARRY_FORWARD_DAYS {
            let candidate = date.checked_sub_days(Days::new(back))?;
            if let Some(value) = by_date.get(&candidate) {
                return Some(*value);
            }
        }
        None
    }

    /// Onchain row for `(symbol, date)` with carry-forward of at most 3 days.
    pub fn onchain_at(&self, symbol: &str, date: NaiveDate) -> Option<&OnchainObservation> {
        let by_date = self.onchain.get(symbol)?;
        for back in 0..=ONCHAIN_CARRY_FORWARD_DAYS {
            let candidate = date.checked_sub_days(Days::new(back))?;
            if let Some(row) = by_date.get(&candidate) {
                return Some(row);
            }
        }
        None
    }

    /// Sentiment for the exact hour bucket. Never carried from a prior hour.
    pub fn sentiment_at(
        &self,
        symbol: &str,
        ts: DateTime<Utc>,
    ) -> Option<&SentimentSignal> {
        let bucket = ts
            .with_minute(0)?
            .with_second(0)?
            .with_nanosecond(0)?;
        self.sentiment.get(&(symbol.to_string(), bucket))
    }
}

/// Date/hour windows a price batch needs loaded, extended backwards by the
/// carry-forward allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupWindows {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

impl LookupWindows {
    pub fn from_price_ts(timestamps: &[DateTime<Utc>]) -> Option<Self> {
        let first = timestamps.iter().min()?.date_naive();
        let last = timestamps.iter().max()?.date_naive();
        Some(Self {
            first_date: first,
            last_date: last,
        })
    }

    pub fn macro_range(&self) -> crate::domain::ports::DateRange {
        crate::domain::ports::DateRange::new(
            self.first_date
                .checked_sub_days(Days::new(MACRO_CARRY_FORWARD_DAYS))
                .unwrap_or(self.first_date),
            self.last_date,
        )
    }

    pub fn onchain_range(&self) -> crate::domain::ports::DateRange {
        crate::domain::ports::DateRange::new(
            self.first_date
                .checked_sub_days(Days::new(ONCHAIN_CARRY_FORWARD_DAYS))
                .unwrap_or(self.first_date),
            self.last_date,
        )
    }

    pub fn hour_window(&self) -> crate::domain::types::TimeWindow {
        let start = chrono::TimeZone::from_utc_datetime(
            &Utc,
            &self
                .first_date
                .and_hms_opt(0, 0, 0)
                .expect("midnight is valid"),
        );
        let end = chrono::TimeZone::from_utc_datetime(
            &Utc,
            &self
                .last_date
                .and_hms_opt(0, 0, 0)
                .expect("midnight is valid"),
        ) + chrono::Duration::days(1);
        crate::domain::types::TimeWindow::new(start, end)
    }

    /// Same-day window for the technical lookup (greatest `ts <= price.ts`,
    /// same date).
    pub fn technical_window(&self) -> crate::domain::types::TimeWindow {
        self.hour_window()
    }
}

/// True when `value_ts` would leak future data into the row for `price_ts`.
pub fn violates_no_future(price_ts: DateTime<Utc>, value_ts: DateTime<Utc>) -> bool {
    let end_of_hour = price_ts
        .date_naive()
        .and_hms_opt(price_ts.hour(), 59, 59)
        .map(|naive| chrono::TimeZone::from_utc_datetime(&Utc, &naive));
    match end_of_hour {
        Some(limit) => value_ts > limit,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    fn technical(symbol: &str, when: DateTime<Utc>) -> TechnicalIndicator {
        TechnicalIndicator {
            symbol: symbol.to_string(),
            ts: when,
            rsi_14: Some(55.0),
            data_source: "derived".to_string(),
            data_completeness_percentage: 60.0,
            ..Default::default()
        }
    }

    #[test]
    fn technical_never_picks_future_rows() {
        let maps = LookupMaps::new(
            vec![
                technical("BTC", ts(10, 8)),
                technical("BTC", ts(10, 14)),
            ],
            vec![],
            vec![],
            vec![],
        );

        let hit = maps.technical_at("BTC", ts(10, 9)).unwrap();
        assert_eq!(hit.ts, ts(10, 8));

        // Before the first technical row of the day: NULL, not the later row.
        assert!(maps.technical_at("BTC", ts(10, 7)).is_none());
    }

    #[test]
    fn technical_is_scoped_to_the_same_day() {
        let maps = LookupMaps::new(vec![technical("BTC", ts(9, 23))], vec![], vec![], vec![]);
        assert!(maps.technical_at("BTC", ts(10, 1)).is_none());
    }

    #[test]
    fn macro_carry_forward_is_bounded_to_seven_days() {
        let row = |day: u32| MacroIndicator {
            series_id: "VIXCLS".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            value: 20.0,
            frequency: None,
            data_source: "fred".to_string(),
        };
        let maps = LookupMaps::new(vec![], vec![row(10)], vec![], vec![]);

        let date = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        assert_eq!(maps.macro_at("vix", date(10)), Some(20.0));
        assert_eq!(maps.macro_at("vix", date(13)), Some(20.0));
        assert_eq!(maps.macro_at("vix", date(17)), Some(20.0), "seventh day still carries");
        assert_eq!(maps.macro_at("vix", date(18)), None, "eighth day does not");
    }

    #[test]
    fn onchain_carry_forward_is_bounded_to_three_days() {
        let row = OnchainObservation {
            symbol: "BTC".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            circulating_supply: Some(19.0e6),
            data_source: "coingecko".to_string(),
            data_completeness_percentage: 60.0,
            ..Default::default()
        };
        let maps = LookupMaps::new(vec![], vec![], vec![row], vec![]);

        let date = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        assert!(maps.onchain_at("BTC", date(13)).is_some());
        assert!(maps.onchain_at("BTC", date(14)).is_none());
        assert!(maps.onchain_at("BTC", date(9)).is_none(), "never looks forward");
    }

    #[test]
    fn sentiment_is_exact_hour_only() {
        let signal = SentimentSignal {
            symbol: "BTC".to_string(),
            bucket_start: ts(10, 9),
            avg_sentiment: 0.4,
            avg_confidence: 0.6,
            article_count: 2,
            fear_greed_index: None,
            data_source: "news_aggregation".to_string(),
            data_completeness_percentage: 50.0,
        };
        let maps = LookupMaps::new(vec![], vec![], vec![], vec![signal]);

        assert!(maps.sentiment_at("BTC", ts(10, 9)).is_some());
        assert!(
            maps.sentiment_at("BTC", Utc.with_ymd_and_hms(2025, 3, 10, 9, 45, 0).unwrap())
                .is_some(),
            "any minute inside the bucket hits"
        );
        assert!(maps.sentiment_at("BTC", ts(10, 10)).is_none(), "no carry to the next hour");
    }

    #[test]
    fn windows_extend_backwards_for_carry_forward() {
        let windows = LookupWindows::from_price_ts(&[ts(10, 5), ts(12, 5)]).unwrap();
        assert_eq!(windows.first_date, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(windows.macro_range().start, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(windows.onchain_range().start, NaiveDate::from_ymd_opt(2025, 3, 7).unwrap());
        assert_eq!(windows.macro_range().end, NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
    }

    #[test]
    fn no_future_guard() {
        let price_ts = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap();
        assert!(!violates_no_future(price_ts, ts(10, 9)));
        assert!(violates_no_future(
            price_ts,
            Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()
        ));
    }
}
