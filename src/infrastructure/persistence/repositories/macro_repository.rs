use crate::domain::ports::DateRange;
use crate::domain::repositories::MacroRepository;
use crate::domain::types::MacroIndicator;
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{MySqlPool, QueryBuilder, Row};

const TABLE: &str = "macro_indicators";

pub struct MySqlMacroRepository {
    pool: MySqlPool,
}

impl MySqlMacroRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::mysql::MySqlRow) -> Result<MacroIndicator> {
        Ok(MacroIndicator {
            series_id: row.try_get("indicator_name")?,
            date: row.try_get("indicator_date")?,
            value: row.try_get("value")?,
            frequency: row.try_get("frequency")?,
            data_source: row.try_get("data_source")?,
        })
    }
}

#[async_trait]
impl MacroRepository for MySqlMacroRepository {
    async fn upsert_batch(&self, rows: &[MacroIndicator]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO macro_indicators \
                 (indicator_name, indicator_date, value, frequency, data_source) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.series_id)
                    .push_bind(row.date)
                    .push_bind(row.value)
                    .push_bind(&row.frequency)
                    .push_bind(&row.data_source);
            });
            qb.push(
                " AS new ON DUPLICATE KEY UPDATE \
                 value = new.value, frequency = new.frequency, data_source = new.data_source",
            );
            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(written)
    }

    async fn in_range(&self, range: DateRange) -> Result<Vec<MacroIndicator>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM macro_indicators
            WHERE indicator_date >= ? AND indicator_date <= ?
            ORDER BY indicator_name, indicator_date
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn latest_date(&self, series_id: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query(
            "SELECT MAX(indicator_date) AS latest FROM macro_indicators WHERE indicator_name = ?",
        )
        .bind(series_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("latest")?)
    }
}
