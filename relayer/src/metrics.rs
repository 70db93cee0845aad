use std::time::Duration;

use anyhow::Result;
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram},
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

/// Instruments for the relay pipeline, registered on the global `relayer` meter. Without an
/// installed exporter they record into a no-op provider.
#[derive(Clone)]
pub struct RelayMetrics {
    observed: Counter<u64>,
    skipped: Counter<u64>,
    relayed: Counter<u64>,
    abandoned: Counter<u64>,
    attempts: Counter<u64>,
    relay_duration: Histogram<f64>,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("relayer");
        RelayMetrics {
            observed: meter
                .u64_counter("relayer.deposits.observed")
                .with_description("BridgeRequest logs decoded from the source chain")
                .build(),
            skipped: meter
                .u64_counter("relayer.deposits.skipped")
                .with_description("Deposits dropped without a submission")
                .build(),
            relayed: meter.u64_counter("relayer.deposits.relayed").build(),
            abandoned: meter.u64_counter("relayer.deposits.abandoned").build(),
            attempts: meter
                .u64_counter("relayer.submission.attempts")
                .with_description("executeMint transactions sent")
                .build(),
            relay_duration: meter
                .f64_histogram("relayer.relay.duration")
                .with_unit("s")
                .with_boundaries(vec![
                    1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 3600.0,
                ])
                .build(),
        }
    }

    pub fn observed(&self) {
        self.observed.add(1, &[]);
    }

    pub fn skipped(&self, reason: &'static str) {
        self.skipped.add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn relayed(&self, duration: Duration) {
        self.relayed.add(1, &[]);
        self.record_duration(duration, "relayed");
    }

    pub fn abandoned(&self, duration: Duration) {
        self.abandoned.add(1, &[]);
        self.record_duration(duration, "abandoned");
    }

    fn record_duration(&self, duration: Duration, outcome: &'static str) {
        let attributes = [KeyValue::new("outcome", outcome)];
        let secs = duration.as_secs_f64();
        self.relay_duration.record(secs, &attributes);
    }

    pub fn attempt(&self) {
        self.attempts.add(1, &[]);
    }
}

/// Exports every metric to an OTLP collector over gRPC every ten seconds. The returned provider
/// must be shut down on exit to flush the last batch.
pub fn install_otlp_exporter(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(10))
        .build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}
