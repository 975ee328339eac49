//! MySQL repository implementations.
//!
//! All writes are idempotent upserts on the table's natural key with a
//! completeness gate: a merge only replaces payload columns when the new
//! row's completeness is at least the existing one, and the completeness
//! column itself only ever rises.

pub mod asset_repository;
pub mod derivatives_repository;
pub mod feature_repository;
pub mod macro_repository;
pub mod market_repository;
pub mod monitoring_repository;
pub mod news_repository;
pub mod ohlc_repository;
pub mod onchain_repository;
pub mod price_repository;
pub mod sentiment_repository;
pub mod technical_repository;

/// `ON DUPLICATE KEY UPDATE` clause implementing the monotone-completeness
/// merge for `columns` (payload columns, excluding the key and the
/// completeness column itself). Relies on the `VALUES ... AS new` row alias.
pub(crate) fn completeness_gated_update(table: &str, columns: &[&str]) -> String {
    let mut parts: Vec<String> = columns
        .iter()
        .map(|c| {
            format!(
                "{c} = IF(new.data_completeness_percentage >= {table}.data_completeness_percentage, new.{c}, {table}.{c})"
            )
        })
        .collect();
    parts.push(format!(
        "data_source = IF(new.data_completeness_percentage >= {table}.data_completeness_percentage, new.data_source, {table}.data_source)"
    ));
    parts.push(format!(
        "data_completeness_percentage = GREATEST({table}.data_completeness_percentage, new.data_completeness_percentage)"
    ));
    parts.join(", ")
}

/// Per-domain completeness rollup shared by the placeholder-capable
/// repositories. `table` and `ts_column` are compile-time constants.
pub(crate) async fn placeholder_stats(
    pool: &sqlx::MySqlPool,
    table: &str,
) -> anyhow::Result<crate::domain::repositories::CompletenessStats> {
    use sqlx::Row;
    let sql = format!(
        "SELECT COUNT(*) AS total, \
         CAST(COALESCE(SUM(data_completeness_percentage >= ?), 0) AS SIGNED) AS filled, \
         COALESCE(AVG(data_completeness_percentage), 0) AS avg_completeness FROM {table}"
    );
    let row = sqlx::query(&sql)
        .bind(crate::domain::types::COMPLETENESS_PARTIAL)
        .fetch_one(pool)
        .await?;
    Ok(crate::domain::repositories::CompletenessStats {
        total: row.try_get::<i64, _>("total")? as u64,
        filled: row.try_get::<i64, _>("filled")? as u64,
        avg_completeness: row.try_get("avg_completeness")?,
    })
}

/// Key-column granularity for the placeholder helpers: DATETIME slots for
/// hourly domains, DATE slots for daily ones.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotGranularity {
    Hourly,
    Daily,
}

/// Keys below the completeness threshold inside the window.
pub(crate) async fn placeholder_gaps(
    pool: &sqlx::MySqlPool,
    table: &str,
    ts_column: &str,
    granularity: SlotGranularity,
    window: crate::domain::types::TimeWindow,
    threshold: f64,
) -> anyhow::Result<Vec<crate::domain::types::PlaceholderKey>> {
    use chrono::{NaiveDate, TimeZone, Utc};
    use sqlx::Row;
    let sql = format!(
        "SELECT symbol, {ts_column} AS slot FROM {table} \
         WHERE {ts_column} >= ? AND {ts_column} < ? AND data_completeness_percentage < ? \
         ORDER BY symbol, {ts_column}"
    );
    let query = match granularity {
        SlotGranularity::Hourly => sqlx::query(&sql).bind(window.start).bind(window.end),
        SlotGranularity::Daily => sqlx::query(&sql)
            .bind(window.start.date_naive())
            .bind(window.end.date_naive()),
    };
    let rows = query.bind(threshold).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            let slot = match granularity {
                SlotGranularity::Hourly => row.try_get("slot")?,
                SlotGranularity::Daily => {
                    let date: NaiveDate = row.try_get("slot")?;
                    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
                }
            };
            Ok(crate::domain::types::PlaceholderKey {
                symbol: row.try_get("symbol")?,
                slot,
            })
        })
        .collect()
}
