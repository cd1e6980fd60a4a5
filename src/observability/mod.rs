/*
 * Prometheus counters and gauges for the evaluation pipeline
 */

use prometheus::{CounterVec, Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub blocks_processed: IntCounter,
    pub active_workers: IntGauge,
    pub opportunities_found: IntCounter,
    pub profit_total: CounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_processed = IntCounter::new(
            "blocks_processed",
            "Total number of blocks received from the head source",
        )
        .expect("metric definition");
        let active_workers = IntGauge::new(
            "active_workers",
            "Number of per-block workers currently running",
        )
        .expect("metric definition");
        let opportunities_found = IntCounter::new(
            "arbitrage_opportunities_found",
            "Total number of profitable arbitrage opportunities detected",
        )
        .expect("metric definition");
        let profit_total = CounterVec::new(
            Opts::new(
                "arbitrage_profit_total",
                "Cumulative estimated profit of detected opportunities",
            ),
            &["currency"],
        )
        .expect("metric definition");

        registry
            .register(Box::new(blocks_processed.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(active_workers.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(opportunities_found.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(profit_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            blocks_processed,
            active_workers,
            opportunities_found,
            profit_total,
        }
    }

    /// Text exposition for the pull endpoint.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .ok();
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics() {
        let metrics = Metrics::new();
        metrics.blocks_processed.inc();
        metrics.active_workers.set(3);
        metrics.opportunities_found.inc();
        metrics.profit_total.with_label_values(&["USDC"]).inc_by(42.0);

        let text = metrics.render();
        assert!(text.contains("blocks_processed 1"));
        assert!(text.contains("active_workers 3"));
        assert!(text.contains("arbitrage_opportunities_found 1"));
        assert!(text.contains("arbitrage_profit_total{currency=\"USDC\"} 42"));
    }
}
