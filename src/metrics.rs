use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its scrape listener and pre-register
/// all application metrics so every series appears before its first
/// increment.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    counter!("leader_trades_total").absolute(0);
    counter!("leader_trades_invalid").absolute(0);
    counter!("copy_signals_emitted").absolute(0);
    counter!("copy_executions_completed").absolute(0);
    counter!("copy_executions_failed").absolute(0);
    counter!("copy_admission_denied").absolute(0);
    counter!("lock_contention_skips").absolute(0);
    counter!("metrics_tick_failures").absolute(0);

    gauge!("active_relationships").set(0.0);

    // Histograms are lazily created on first record; force creation.
    histogram!("fanout_latency_seconds").record(0.0);
    histogram!("metrics_tick_seconds").record(0.0);

    Ok(())
}
