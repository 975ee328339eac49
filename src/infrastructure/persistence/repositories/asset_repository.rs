use crate::domain::repositories::AssetRepository;
use crate::domain::types::{Asset, AssetPatch};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row};

pub struct MySqlAssetRepository {
    pool: MySqlPool,
}

impl MySqlAssetRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::mysql::MySqlRow) -> Result<Asset> {
        Ok(Asset {
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            coingecko_id: row.try_get("coingecko_id")?,
            binance_symbol: row.try_get("binance_symbol")?,
            category: row.try_get("category")?,
            market_cap_rank: row.try_get("market_cap_rank")?,
            is_active: row.try_get("is_active")?,
            supports_derivatives: row.try_get("supports_derivatives")?,
        })
    }
}

#[async_trait]
impl AssetRepository for MySqlAssetRepository {
    async fn active_assets(&self) -> Result<Vec<Asset>> {
        let rows = sqlx::query("SELECT * FROM assets WHERE is_active = TRUE ORDER BY symbol")
            .fetch_all(&self.pool)
            .await
            .context("failed to load active assets")?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn find(&self, symbol: &str) -> Result<Option<Asset>> {
        let row = sqlx::query("SELECT * FROM assets WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn upsert(&self, asset: &Asset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assets
            (symbol, name, coingecko_id, binance_symbol, category, market_cap_rank, is_active, supports_derivatives)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?) AS new
            ON DUPLICATE KEY UPDATE
                name = new.name,
                coingecko_id = new.coingecko_id,
                binance_symbol = new.binance_symbol,
                category = new.category,
                market_cap_rank = new.market_cap_rank,
                is_active = new.is_active,
                supports_derivatives = new.supports_derivatives
            "#,
        )
        .bind(&asset.symbol)
        .bind(&asset.name)
        .bind(&asset.coingecko_id)
        .bind(&asset.binance_symbol)
        .bind(&asset.category)
        .bind(asset.market_cap_rank)
        .bind(asset.is_active)
        .bind(asset.supports_derivatives)
        .execute(&self.pool)
        .await
        .context("failed to upsert asset")?;
        Ok(())
    }

    async fn update_metadata(&self, symbol: &str, patch: &AssetPatch) -> Result<()> {
        // COALESCE keeps the current value for fields the patch omits.
        // `is_active` is deliberately not updatable through this path.
        sqlx::query(
            r#"
            UPDATE assets SET
                name = COALESCE(?, name),
                coingecko_id = COALESCE(?, coingecko_id),
                binance_symbol = COALESCE(?, binance_symbol),
                category = COALESCE(?, category),
                market_cap_rank = COALESCE(?, market_cap_rank),
                supports_derivatives = COALESCE(?, supports_derivatives)
            WHERE symbol = ?
            "#,
        )
        .bind(&patch.name)
        .bind(&patch.coingecko_id)
        .bind(&patch.binance_symbol)
        .bind(&patch.category)
        .bind(patch.market_cap_rank)
        .bind(patch.supports_derivatives)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .context("failed to update asset metadata")?;
        Ok(())
    }

    async fn set_active(&self, symbol: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE assets SET is_active = ? WHERE symbol = ?")
            .bind(active)
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM assets")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
