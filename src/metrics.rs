use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,

    // Data source metrics
    pub source_requests: Counter<u64>,
    pub source_errors: Counter<u64>,
    pub source_latency: Histogram<f64>,

    // Poller metrics
    pub poll_cycles: Counter<u64>,
    pub poll_cycle_duration: Gauge<f64>,
    pub batches_delivered: Counter<u64>,
    pub records_delivered: Counter<u64>,
    pub chain_watermark: Gauge<u64>,

    // Feed metrics
    pub feed_size: Gauge<u64>,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("feed_metrics");

        let source_requests = meter
            .u64_counter("feed_source_requests")
            .with_description("Number of requests made to the chain data source")
            .build();

        let source_errors = meter
            .u64_counter("feed_source_errors")
            .with_description("Number of chain data source errors encountered")
            .build();

        let source_latency = meter
            .f64_histogram("feed_source_latency")
            .with_description("Chain data source request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        let poll_cycles = meter
            .u64_counter("feed_poll_cycles")
            .with_description("Total number of completed poll cycles")
            .build();

        let poll_cycle_duration = meter
            .f64_gauge("feed_poll_cycle_duration")
            .with_description("Time spent on the latest poll cycle")
            .with_unit("s")
            .build();

        let batches_delivered = meter
            .u64_counter("feed_batches_delivered")
            .with_description("Number of non-empty batches handed to the subscriber")
            .build();

        let records_delivered = meter
            .u64_counter("feed_records_delivered")
            .with_description("Number of records handed to the subscriber")
            .build();

        let chain_watermark = meter
            .u64_gauge("feed_chain_watermark")
            .with_description("Highest block observed per chain")
            .build();

        let feed_size = meter
            .u64_gauge("feed_size")
            .with_description("Number of records currently held by the feed")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            source_requests,
            source_errors,
            source_latency,
            poll_cycles,
            poll_cycle_duration,
            batches_delivered,
            records_delivered,
            chain_watermark,
            feed_size,
        })
    }

    /// Records one data source call for `chain_id`.
    pub fn record_source_call(&self, chain_id: u64, method: &'static str, elapsed: Duration, is_error: bool) {
        let labels = [
            KeyValue::new("chain_id", chain_id as i64),
            KeyValue::new("method", method),
        ];
        self.source_requests.add(1, &labels);
        self.source_latency.record(elapsed.as_secs_f64(), &labels);
        if is_error {
            self.source_errors.add(1, &labels);
        }
    }

    pub fn record_watermark(&self, chain_id: u64, block: u64) {
        self.chain_watermark
            .record(block, &[KeyValue::new("chain_id", chain_id as i64)]);
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics bind address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind metrics listener")?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server exited: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
