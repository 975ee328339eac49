use crate::domain::repositories::DerivativesRepository;
use crate::domain::types::DerivativesObservation;
use crate::infrastructure::persistence::database::with_lock_retry;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, QueryBuilder};

use super::completeness_gated_update;

const TABLE: &str = "derivatives_data";
const PAYLOAD_COLUMNS: &[&str] = &["funding_rate", "open_interest", "mark_price", "index_price"];

pub struct MySqlDerivativesRepository {
    pool: MySqlPool,
}

impl MySqlDerivativesRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DerivativesRepository for MySqlDerivativesRepository {
    async fn upsert_batch(&self, rows: &[DerivativesObservation]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = with_lock_retry(TABLE, || async {
            let mut qb: QueryBuilder<sqlx::MySql> = QueryBuilder::new(
                "INSERT INTO derivatives_data \
                 (symbol, ts, funding_rate, open_interest, mark_price, index_price, \
                  data_source, data_completeness_percentage) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.ts)
                    .push_bind(row.funding_rate)
                    .push_bind(row.open_interest)
                    .push_bind(row.mark_price)
                    .push_bind(row.index_price)
                    .push_bind(&row.data_source)
                    .push_bind(row.data_completeness_percentage);
            });
            qb.push(" AS new ON DUPLICATE KEY UPDATE ");
            qb.push(completeness_gated_update(TABLE, PAYLOAD_COLUMNS));
            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await?;
        Ok(written)
    }
}
