//! Startup-constructed object graph. Everything the process shares is built
//! here once and passed explicitly; there are no module-level singletons.

use crate::application::collectors::{
    CollectorRuntime, derivatives::DerivativesCollector, macro_econ::MacroCollector,
    market::MarketCollector, news::NewsCollector, ohlc::OhlcCollector,
    onchain::OnchainCollector, price::PriceCollector, sentiment::SentimentCollector,
    technical::TechnicalCollector,
};
use crate::application::materialized::MaterializedUpdater;
use crate::application::placeholder::PlaceholderManager;
use crate::application::registry::SymbolRegistry;
use crate::application::scheduler::Scheduler;
use crate::config::{Config, ConfigHandle};
use crate::domain::feature_set::FeatureSet;
use crate::domain::ports::NewsSource;
use crate::domain::repositories::PlaceholderStore;
use crate::infrastructure::adapters::{
    alternative_me::FearGreedAdapter, binance::BinanceDerivativesAdapter,
    coingecko::CoinGeckoAdapter, fred::FredAdapter, newsapi::NewsApiAdapter,
    rss_feed::RssNewsAdapter,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::observability::{AlertSink, Metrics};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    asset_repository::MySqlAssetRepository, derivatives_repository::MySqlDerivativesRepository,
    feature_repository::MySqlFeatureRepository, macro_repository::MySqlMacroRepository,
    market_repository::MySqlMarketRepository, monitoring_repository::MySqlMonitoringRepository,
    news_repository::MySqlNewsRepository, ohlc_repository::MySqlOhlcRepository,
    onchain_repository::MySqlOnchainRepository, price_repository::MySqlPriceRepository,
    sentiment_repository::MySqlSentimentRepository, technical_repository::MySqlTechnicalRepository,
};
use crate::infrastructure::sentiment::analyzer::VaderClassifier;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Application {
    pub config: ConfigHandle,
    pub registry: Arc<SymbolRegistry>,
    pub placeholders: Arc<PlaceholderManager>,
    pub scheduler: Arc<Scheduler>,
    pub updater: Arc<MaterializedUpdater>,
    pub metrics: Metrics,
    pub alerts: AlertSink,
    pub cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let feature_set = FeatureSet::resolve(&config.feature_set_version)
            .context("unresolvable feature set at startup")?;
        let shutdown_grace = Duration::from_secs(config.shutdown_grace_seconds);
        let breaker_threshold = config.circuit_breaker_threshold;
        let breaker_cooldown = Duration::from_secs(config.circuit_breaker_cooldown_seconds);
        let completeness_threshold = config.completeness_threshold;

        let db = Database::connect(&config.db).await?;
        let pool = db.pool.clone();

        // Repositories.
        let assets = Arc::new(MySqlAssetRepository::new(pool.clone()));
        let prices = Arc::new(MySqlPriceRepository::new(pool.clone()));
        let ohlc = Arc::new(MySqlOhlcRepository::new(pool.clone()));
        let onchain = Arc::new(MySqlOnchainRepository::new(pool.clone()));
        let macros = Arc::new(MySqlMacroRepository::new(pool.clone()));
        let news = Arc::new(MySqlNewsRepository::new(pool.clone()));
        let sentiment = Arc::new(MySqlSentimentRepository::new(pool.clone()));
        let technicals = Arc::new(MySqlTechnicalRepository::new(pool.clone()));
        let derivatives = Arc::new(MySqlDerivativesRepository::new(pool.clone()));
        let market = Arc::new(MySqlMarketRepository::new(pool.clone()));
        let features = Arc::new(MySqlFeatureRepository::new(pool.clone()));
        let monitoring = Arc::new(MySqlMonitoringRepository::new(pool));

        let registry = Arc::new(SymbolRegistry::new(assets));
        registry.seed_defaults().await?;

        let placeholder_stores: Vec<Arc<dyn PlaceholderStore>> =
            vec![prices.clone(), onchain.clone(), sentiment.clone()];
        let placeholders = Arc::new(PlaceholderManager::new(
            placeholder_stores,
            completeness_threshold,
        ));

        let metrics = Metrics::new()?;
        let alerts = AlertSink::default();
        let cancel = CancellationToken::new();
        let config_handle: ConfigHandle = Arc::new(RwLock::new(config));

        // Adapters. Each collector owns its instance so rate-limit buckets
        // are never shared across collectors.
        let cg_key = config_handle.read().await.coingecko_api_key.clone();
        let price_source = Arc::new(CoinGeckoAdapter::new(
            HttpClientFactory::create_client(),
            cg_key.clone(),
        ));
        let ohlc_source = Arc::new(CoinGeckoAdapter::new(
            HttpClientFactory::create_client(),
            cg_key.clone(),
        ));
        let onchain_source = Arc::new(CoinGeckoAdapter::new(
            HttpClientFactory::create_client(),
            cg_key.clone(),
        ));
        let market_source = Arc::new(CoinGeckoAdapter::new(
            HttpClientFactory::create_client(),
            cg_key,
        ));

        let updater = Arc::new(MaterializedUpdater::new(
            prices.clone(),
            technicals.clone(),
            macros.clone(),
            onchain.clone(),
            sentiment.clone(),
            features,
            monitoring,
            alerts.clone(),
            config_handle.clone(),
            feature_set,
        ));

        let mut scheduler = Scheduler::new(cancel.clone());
        let mut register = |collector: Arc<dyn crate::application::collectors::Collector>,
                            settings: crate::config::CollectorSettings,
                            scheduler: &mut Scheduler| {
            let runtime = Arc::new(CollectorRuntime::new(
                collector,
                registry.clone(),
                placeholders.clone(),
                config_handle.clone(),
                metrics.clone(),
                alerts.clone(),
                breaker_threshold,
                breaker_cooldown,
                cancel.clone(),
            ));
            scheduler.register(runtime, settings.cadence, settings.enabled);
        };

        {
            let cfg = config_handle.read().await;

            register(
                Arc::new(PriceCollector::new(price_source, prices.clone())),
                cfg.price,
                &mut scheduler,
            );
            register(
                Arc::new(OhlcCollector::new(ohlc_source, ohlc)),
                cfg.ohlc,
                &mut scheduler,
            );
            register(
                Arc::new(OnchainCollector::new(onchain_source, onchain)),
                cfg.onchain,
                &mut scheduler,
            );

            // Credential-gated adapters: an absent key disables the collector.
            match &cfg.fred_api_key {
                Some(key) => register(
                    Arc::new(MacroCollector::new(
                        Arc::new(FredAdapter::new(HttpClientFactory::create_client(), key.clone())),
                        macros,
                    )),
                    cfg.macro_econ,
                    &mut scheduler,
                ),
                None => info!("FRED_API_KEY absent, macro collector disabled"),
            }

            let mut news_sources: Vec<Arc<dyn NewsSource>> = Vec::new();
            if let Some(key) = &cfg.newsapi_key {
                news_sources.push(Arc::new(NewsApiAdapter::new(
                    HttpClientFactory::create_client(),
                    key.clone(),
                )));
            }
            if !cfg.rss_feed_urls.is_empty() {
                news_sources.push(Arc::new(RssNewsAdapter::new(
                    HttpClientFactory::create_client(),
                    cfg.rss_feed_urls.clone(),
                )));
            }
            match news_sources.is_empty() {
                false => register(
                    Arc::new(NewsCollector::new(news_sources, news.clone())),
                    cfg.news,
                    &mut scheduler,
                ),
                true => info!("no news sources configured, news collector disabled"),
            }

            register(
                Arc::new(SentimentCollector::new(
                    news,
                    sentiment,
                    Arc::new(VaderClassifier::new()),
                    Some(Arc::new(FearGreedAdapter::new(
                        HttpClientFactory::create_client(),
                    ))),
                )),
                cfg.sentiment,
                &mut scheduler,
            );
            register(
                Arc::new(TechnicalCollector::new(prices, technicals)),
                cfg.technical,
                &mut scheduler,
            );
            register(
                Arc::new(DerivativesCollector::new(
                    Arc::new(BinanceDerivativesAdapter::new(
                        HttpClientFactory::create_client(),
                    )),
                    derivatives,
                )),
                cfg.derivatives,
                &mut scheduler,
            );
            register(
                Arc::new(MarketCollector::new(market_source, market)),
                cfg.market,
                &mut scheduler,
            );
            register(updater.clone(), cfg.materialized, &mut scheduler);
        }

        Ok(Self {
            config: config_handle,
            registry,
            placeholders,
            scheduler: Arc::new(scheduler),
            updater,
            metrics,
            alerts,
            cancel,
            shutdown_grace,
        })
    }

    pub async fn start(&self) {
        self.scheduler.spawn_all().await;
        self.scheduler
            .spawn_placeholder_sweep(self.registry.clone(), self.placeholders.clone())
            .await;
        info!("collection platform running");
    }

    /// Graceful shutdown: cancel tasks, drain in-flight writes, bounded by
    /// the configured grace period.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown(self.shutdown_grace).await;
    }
}
