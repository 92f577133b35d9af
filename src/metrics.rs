use std::sync::OnceLock;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Store operation metrics
pub struct Metrics {
    pub upserts_total: IntCounterVec,
    pub oversized_total: IntCounterVec,
    pub init_ops_total: IntCounterVec,
    pub op_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new(registry: &Registry) -> Self {
        let upserts_total = IntCounterVec::new(
            Opts::new("ff_docstore_upserts_total", "Upserts by outcome (applied, rejected, error)"),
            &["outcome"],
        )
        .expect("failed to create upserts_total metric");

        let oversized_total = IntCounterVec::new(
            Opts::new("ff_docstore_oversized_total", "Items dropped for exceeding the document size limit"),
            &["namespace"],
        )
        .expect("failed to create oversized_total metric");

        let init_ops_total = IntCounterVec::new(
            Opts::new("ff_docstore_init_ops_total", "Operations submitted by Init (set, delete)"),
            &["op"],
        )
        .expect("failed to create init_ops_total metric");

        let op_duration = HistogramVec::new(
            HistogramOpts::new("ff_docstore_op_duration_seconds", "Duration of store operations")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["op"],
        )
        .expect("failed to create op_duration metric");

        registry.register(Box::new(upserts_total.clone())).expect("register upserts_total");
        registry.register(Box::new(oversized_total.clone())).expect("register oversized_total");
        registry.register(Box::new(init_ops_total.clone())).expect("register init_ops_total");
        registry.register(Box::new(op_duration.clone())).expect("register op_duration");

        Self {
            upserts_total,
            oversized_total,
            init_ops_total,
            op_duration,
        }
    }
}

/// Get the global metrics instance, initializing on first call
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

/// Render all store metrics in the Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let _ = metrics();
    let registry = REGISTRY.get_or_init(Registry::new);
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_store_metrics() {
        metrics().init_ops_total.with_label_values(&["set"]).inc();
        let text = gather_text().unwrap();
        assert!(text.contains("ff_docstore_init_ops_total"));
    }
}
