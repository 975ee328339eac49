//! Authoritative set of tracked assets. Every collector's work-list comes
//! from here; symbol lists are never hardcoded downstream.

use crate::domain::repositories::AssetRepository;
use crate::domain::types::{Asset, AssetPatch, ExternalSource};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub struct SymbolRegistry {
    assets: Arc<dyn AssetRepository>,
}

impl SymbolRegistry {
    pub fn new(assets: Arc<dyn AssetRepository>) -> Self {
        Self { assets }
    }

    /// Active assets in stable symbol order.
    pub async fn active_symbols(&self) -> Result<Vec<Asset>> {
        self.assets.active_assets().await
    }

    /// The registered provider-native identifier for `(symbol, source)`, or
    /// `None` when the asset is unknown or carries no id for that source.
    pub async fn resolve_external_id(
        &self,
        symbol: &str,
        source: ExternalSource,
    ) -> Result<Option<String>> {
        let asset = self.assets.find(symbol).await?;
        Ok(asset.and_then(|a| a.external_id(source).map(str::to_string)))
    }

    /// Partial metadata update. `is_active` is untouchable through this path.
    pub async fn update_metadata(&self, symbol: &str, patch: &AssetPatch) -> Result<()> {
        self.assets.update_metadata(symbol, patch).await
    }

    pub async fn set_active(&self, symbol: &str, active: bool) -> Result<()> {
        self.assets.set_active(symbol, active).await
    }

    /// Seed a starter asset set on first boot. A non-empty table is left
    /// exactly as it is.
    pub async fn seed_defaults(&self) -> Result<()> {
        if self.assets.count().await? > 0 {
            return Ok(());
        }
        for asset in default_assets() {
            self.assets.upsert(&asset).await?;
        }
        info!("seeded default asset registry");
        Ok(())
    }
}

fn default_assets() -> Vec<Asset> {
    let asset = |symbol: &str, name: &str, gecko: &str, pair: Option<&str>, rank: u32| Asset {
        symbol: symbol.to_string(),
        name: name.to_string(),
        coingecko_id: Some(gecko.to_string()),
        binance_symbol: pair.map(str::to_string),
        category: Some("layer-1".to_string()),
        market_cap_rank: Some(rank),
        is_active: true,
        supports_derivatives: pair.is_some(),
    };
    vec![
        asset("BTC", "Bitcoin", "bitcoin", Some("BTCUSDT"), 1),
        asset("ETH", "Ethereum", "ethereum", Some("ETHUSDT"), 2),
        asset("SOL", "Solana", "solana", Some("SOLUSDT"), 5),
        asset("ADA", "Cardano", "cardano", Some("ADAUSDT"), 9),
        asset("DOT", "Polkadot", "polkadot", Some("DOTUSDT"), 14),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::in_memory::InMemoryAssetRepository;

    #[tokio::test]
    async fn seeding_is_idempotent_and_ordered() {
        let repo = Arc::new(InMemoryAssetRepository::new());
        let registry = SymbolRegistry::new(repo.clone());

        registry.seed_defaults().await.unwrap();
        let first = registry.active_symbols().await.unwrap();
        assert!(!first.is_empty());

        // A second seed must not duplicate or reorder anything.
        registry.seed_defaults().await.unwrap();
        let second = registry.active_symbols().await.unwrap();
        assert_eq!(first.len(), second.len());
        let symbols: Vec<&str> = second.iter().map(|a| a.symbol.as_str()).collect();
        let mut sorted = symbols.clone();
        sorted.sort();
        assert_eq!(symbols, sorted, "active symbols must be in stable order");
    }

    #[tokio::test]
    async fn resolve_external_id_distinguishes_sources() {
        let repo = Arc::new(InMemoryAssetRepository::new());
        let registry = SymbolRegistry::new(repo);
        registry.seed_defaults().await.unwrap();

        let gecko = registry
            .resolve_external_id("BTC", ExternalSource::CoinGecko)
            .await
            .unwrap();
        assert_eq!(gecko.as_deref(), Some("bitcoin"));

        let fred = registry
            .resolve_external_id("BTC", ExternalSource::Fred)
            .await
            .unwrap();
        assert_eq!(fred, None);

        let unknown = registry
            .resolve_external_id("NOPE", ExternalSource::CoinGecko)
            .await
            .unwrap();
        assert_eq!(unknown, None);
    }

    #[tokio::test]
    async fn metadata_patch_never_flips_active() {
        let repo = Arc::new(InMemoryAssetRepository::new());
        let registry = SymbolRegistry::new(repo.clone());
        registry.seed_defaults().await.unwrap();
        registry.set_active("BTC", false).await.unwrap();

        let patch = AssetPatch {
            category: Some("store-of-value".to_string()),
            ..Default::default()
        };
        registry.update_metadata("BTC", &patch).await.unwrap();

        let btc = repo.find("BTC").await.unwrap().unwrap();
        assert!(!btc.is_active, "patch must not reactivate an asset");
        assert_eq!(btc.category.as_deref(), Some("store-of-value"));
    }
}
