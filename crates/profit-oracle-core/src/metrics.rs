use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    node_duration_ms: Histogram<f64>,
    research_attempts: Counter<u64>,
    artifacts: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("profit_oracle.pipeline");
        PipelineMetrics {
            node_duration_ms: meter
                .f64_histogram("node_duration_ms")
                .with_description("Graph node runtime in milliseconds")
                .init(),
            research_attempts: meter
                .u64_counter("research_attempts_total")
                .with_description("Research submissions by outcome")
                .init(),
            artifacts: meter
                .u64_counter("sandbox_artifacts_total")
                .with_description("Sandbox artifacts seen by the analytics node, by resolution")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("PROFIT_ORACLE_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "PROFIT_ORACLE_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
}

/// Record a node execution (no-op if no provider installed).
pub fn record_node(node: &str, status: &str, duration_ms: u64) {
    let attrs = [
        KeyValue::new("node", node.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    handles()
        .node_duration_ms
        .record(duration_ms as f64, &attrs);
}

pub fn record_research_attempt(attempt: u32, outcome: &str) {
    let attrs = [
        KeyValue::new("attempt", attempt as i64),
        KeyValue::new("outcome", outcome.to_string()),
    ];
    handles().research_attempts.add(1, &attrs);
}

pub fn record_artifact(resolution: &str) {
    handles()
        .artifacts
        .add(1, &[KeyValue::new("resolution", resolution.to_string())]);
}
