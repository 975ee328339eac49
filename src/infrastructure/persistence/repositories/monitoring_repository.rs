use crate::domain::repositories::MonitoringRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row};

pub struct MySqlMonitoringRepository {
    pool: MySqlPool,
}

impl MySqlMonitoringRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MonitoringRepository for MySqlMonitoringRepository {
    async fn save_state(&self, component: &str, state_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_monitoring (component, state_json)
            VALUES (?, ?) AS new
            ON DUPLICATE KEY UPDATE state_json = new.state_json
            "#,
        )
        .bind(component)
        .bind(state_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save monitoring state for {component}"))?;
        Ok(())
    }

    async fn load_state(&self, component: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT state_json FROM service_monitoring WHERE component = ?")
            .bind(component)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(r.try_get("state_json")?)).transpose()
    }
}
