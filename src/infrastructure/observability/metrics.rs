//! Prometheus metrics for the collection platform.
//!
//! All metrics use the `collector_` prefix with a `collector` label; the
//! materialized updater reports under the label `materialized`.

use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Records successfully collected, lifetime total per collector
    pub total_collected: GaugeVec,
    /// Errors counted across ticks
    pub collection_errors: GaugeVec,
    /// 0-100 health score derived from recent tick outcomes
    pub health_score: GaugeVec,
    /// Hours with completeness below threshold in the recent window
    pub gap_hours: GaugeVec,
    /// 1 while a tick is in flight
    pub running: GaugeVec,
    /// Outbound API calls made
    pub api_calls_made: GaugeVec,
    /// Upsert statements executed
    pub database_writes: GaugeVec,
    /// Wall-clock duration of a full tick
    pub collection_duration_seconds: HistogramVec,
    /// Wall-clock duration of the DB write phase of a tick
    pub db_write_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str| -> anyhow::Result<GaugeVec> {
            let vec = GaugeVec::new(Opts::new(name, help), &["collector"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let total_collected = gauge(
            "collector_total_collected",
            "Records successfully collected (lifetime)",
        )?;
        let collection_errors =
            gauge("collector_collection_errors", "Collection errors (lifetime)")?;
        let health_score = gauge("collector_health_score", "Collector health score (0-100)")?;
        let gap_hours = gauge(
            "collector_gap_hours",
            "Hours below the completeness threshold in the recent window",
        )?;
        let running = gauge("collector_running", "1 while a tick is in flight")?;
        let api_calls_made = gauge("collector_api_calls_made", "Outbound API calls (lifetime)")?;
        let database_writes =
            gauge("collector_database_writes", "Database writes (lifetime)")?;

        let collection_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "collector_collection_duration_seconds",
                "Tick duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["collector"],
        )?;
        registry.register(Box::new(collection_duration_seconds.clone()))?;

        let db_write_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "collector_db_write_duration_seconds",
                "DB write phase duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["collector"],
        )?;
        registry.register(Box::new(db_write_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            total_collected,
            collection_errors,
            health_score,
            gap_hours,
            running,
            api_calls_made,
            database_writes,
            collection_duration_seconds,
            db_write_duration_seconds,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_with_prefix() {
        let metrics = Metrics::new().expect("metrics");
        metrics.total_collected.with_label_values(&["price"]).set(42.0);
        let output = metrics.render();
        assert!(output.contains("collector_total_collected"));
        assert!(output.contains("price"));
    }

    #[test]
    fn exported_metric_names_are_present_once_set() {
        let metrics = Metrics::new().expect("metrics");
        metrics.health_score.with_label_values(&["ohlc"]).set(100.0);
        metrics.gap_hours.with_label_values(&["ohlc"]).set(0.0);
        metrics.running.with_label_values(&["ohlc"]).set(1.0);
        metrics
            .collection_duration_seconds
            .with_label_values(&["ohlc"])
            .observe(0.2);
        let output = metrics.render();
        for name in [
            "collector_health_score",
            "collector_gap_hours",
            "collector_running",
            "collector_collection_duration_seconds",
        ] {
            assert!(output.contains(name), "missing {name}");
        }
    }
}
