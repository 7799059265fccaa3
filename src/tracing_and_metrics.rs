use autometrics::prometheus_exporter;
use tracing_subscriber::EnvFilter;

/// Installs a subscriber that prints formatted traces to stdout, filtered by `RUST_LOG`.
/// Fails if the application already installed one.
pub fn setup_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish()
        .try_init()?;
    tracing::info!("Tracing initialized");
    Ok(())
}

/// Starts collecting the call counters and latencies of the client operations.
pub fn init_metrics() {
    prometheus_exporter::init();
}

/// Current metrics in Prometheus text format, for the caller to serve however it likes.
pub fn metrics_text() -> String {
    prometheus_exporter::encode_http_response().into_body()
}
