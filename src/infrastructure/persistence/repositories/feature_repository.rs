//! Destination-side of the materialized updater: schema introspection for
//! the drift cache and the batched, completeness-gated, column-projected
//! upsert into `ml_features_materialized`.

use crate::domain::errors::is_lock_contention;
use crate::domain::repositories::{FeatureRepository, FeatureValue, FeatureWriteOutcome, MergeRecord};
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Column, MySqlPool, QueryBuilder, Row};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

const TABLE: &str = "ml_features_materialized";
const KEY_COLUMNS: &[&str] = &["symbol", "feature_date", "feature_hour"];
const COMPLETENESS_COLUMN: &str = "data_completeness_percentage";
const UPSERT_BATCH: usize = 500;

pub struct MySqlFeatureRepository {
    pool: MySqlPool,
}

impl MySqlFeatureRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn push_value(b: &mut sqlx::query_builder::Separated<'_, '_, sqlx::MySql, &'static str>, value: &FeatureValue) {
        match value {
            FeatureValue::Float(v) => {
                b.push_bind(*v);
            }
            FeatureValue::Int(v) => {
                b.push_bind(*v);
            }
            FeatureValue::Text(v) => {
                b.push_bind(v.clone());
            }
        }
    }

    /// Update clause: payload columns replaced only when the incoming row is
    /// at least as complete, completeness itself monotone non-decreasing.
    fn update_clause(payload_columns: &[String]) -> String {
        let mut parts: Vec<String> = payload_columns
            .iter()
            .filter(|c| c.as_str() != COMPLETENESS_COLUMN)
            .map(|c| {
                format!(
                    "{c} = IF(new.{COMPLETENESS_COLUMN} >= {TABLE}.{COMPLETENESS_COLUMN}, new.{c}, {TABLE}.{c})"
                )
            })
            .collect();
        parts.push(format!(
            "{COMPLETENESS_COLUMN} = GREATEST({TABLE}.{COMPLETENESS_COLUMN}, new.{COMPLETENESS_COLUMN})"
        ));
        parts.join(", ")
    }

    async fn insert_group(&self, rows: &[&MergeRecord], payload_columns: &[String]) -> Result<u64, sqlx::Error> {
        let column_list = {
            let mut all: Vec<&str> = KEY_COLUMNS.to_vec();
            all.extend(payload_columns.iter().map(String::as_str));
            all.join(", ")
        };

        let mut qb: QueryBuilder<sqlx::MySql> =
            QueryBuilder::new(format!("INSERT INTO {TABLE} ({column_list}) "));
        qb.push_values(rows, |mut b, record| {
            b.push_bind(&record.symbol)
                .push_bind(record.date)
                .push_bind(record.hour as u16);
            for column in payload_columns {
                match record.values.get(column) {
                    Some(value) => Self::push_value(&mut b, value),
                    // Uniform shape inside a group; this arm is unreachable
                    // for grouped records but keeps the builder total.
                    None => {
                        b.push_bind(Option::<f64>::None);
                    }
                }
            }
        });
        qb.push(" AS new ON DUPLICATE KEY UPDATE ");
        qb.push(Self::update_clause(payload_columns));
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Lock-contended batch: retry each row alone so one hot key cannot sink
    /// its 499 neighbors. Rows that still hit contention are skipped and
    /// counted; the next tick picks them up again.
    async fn insert_rows_individually(
        &self,
        rows: &[&MergeRecord],
        payload_columns: &[String],
        outcome: &mut FeatureWriteOutcome,
    ) -> Result<()> {
        for row in rows {
            let single = [*row];
            match with_lock_retry(TABLE, || self.insert_group(&single, payload_columns)).await {
                Ok(written) => outcome.written += written.min(1),
                Err(err) if is_lock_contention(&err) => {
                    warn!(
                        symbol = %row.symbol,
                        date = %row.date,
                        hour = row.hour,
                        "lock contention on feature row, skipping this tick"
                    );
                    outcome.locked_skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FeatureRepository for MySqlFeatureRepository {
    async fn destination_columns(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT COLUMN_NAME AS column_name FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(TABLE)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("column_name")?))
            .collect()
    }

    async fn symbol_collation(&self) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT COLLATION_NAME AS collation_name FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ? AND column_name = 'symbol'
            "#,
        )
        .bind(TABLE)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.try_get("collation_name").ok()))
    }

    async fn upsert_rows(
        &self,
        rows: &[MergeRecord],
        columns: &HashSet<String>,
    ) -> Result<FeatureWriteOutcome> {
        let mut outcome = FeatureWriteOutcome::default();
        if rows.is_empty() {
            return Ok(outcome);
        }

        // Records inside one statement must share a column list, so group by
        // projected column signature first. Values outside the drift cache
        // never reach the statement.
        let mut groups: BTreeMap<Vec<String>, Vec<&MergeRecord>> = BTreeMap::new();
        for record in rows {
            let mut signature: Vec<String> = record
                .values
                .keys()
                .filter(|c| columns.contains(*c))
                .cloned()
                .collect();
            if !signature.iter().any(|c| c == COMPLETENESS_COLUMN) {
                signature.push(COMPLETENESS_COLUMN.to_string());
                signature.sort();
            }
            groups.entry(signature).or_default().push(record);
        }

        for (payload_columns, group) in &groups {
            for chunk in group.chunks(UPSERT_BATCH) {
                match with_lock_retry(TABLE, || self.insert_group(chunk, payload_columns)).await {
                    Ok(written) => outcome.written += written,
                    Err(err) if is_lock_contention(&err) => {
                        self.insert_rows_individually(chunk, payload_columns, &mut outcome)
                            .await?;
                    }
                    Err(err) => return Err(err.context("feature upsert failed")),
                }
            }
        }
        Ok(outcome)
    }

    async fn get(&self, symbol: &str, date: NaiveDate, hour: u8) -> Result<Option<MergeRecord>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {TABLE} WHERE symbol = ? AND feature_date = ? AND feature_hour = ?"
        ))
        .bind(symbol)
        .bind(date)
        .bind(hour as u16)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = MergeRecord::new(symbol, date, hour);
        for (idx, column) in row.columns().iter().enumerate() {
            let name = column.name();
            if KEY_COLUMNS.contains(&name) || name == "updated_at" {
                continue;
            }
            if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                record.set(name, FeatureValue::Float(v));
            } else if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                record.set(name, FeatureValue::Int(v));
            } else if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
                record.set(name, FeatureValue::Text(v));
            }
        }
        Ok(Some(record))
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
