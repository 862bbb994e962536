//! OpenTelemetry integration and log setup
//!
//! Traces and metrics are exported over OTLP when enabled; otherwise the
//! meter provider has no reader and instruments are no-ops.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as _,
    KeyValue,
};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    trace::TracerProvider,
    Resource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// An OTLP exporter could not be built
    #[error("Failed to build {signal} exporter: {message}")]
    Exporter {
        /// `spans` or `metrics`
        signal: &'static str,
        /// Exporter error text
        message: String,
    },

    /// The global log subscriber could not be installed
    #[error("Failed to install log subscriber: {0}")]
    Subscriber(String),

    /// Flushing or stopping an exporter failed
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Export pipelines for the watcher's spans and instruments
///
/// With export disabled the meter provider has no reader, so instruments
/// built from [`OtelProvider::meter`] record nowhere and no tracer exists.
pub struct OtelProvider {
    service_name: String,
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    stopped: AtomicBool,
}

impl OtelProvider {
    /// Build the providers described by `config`
    ///
    /// Export requires a non-blank `endpoint`. The span provider is also
    /// installed as the global tracer provider.
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let endpoint = export_endpoint(config)?;
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let mut meters = SdkMeterProvider::builder().with_resource(resource.clone());
        let tracer_provider = match endpoint {
            Some(endpoint) => {
                meters = meters.with_reader(metrics_reader(endpoint)?);
                let provider = span_provider(endpoint, resource)?;
                global::set_tracer_provider(provider.clone());
                Some(provider)
            }
            None => None,
        };

        Ok(Self {
            service_name: config.service_name.clone(),
            tracer_provider,
            meter_provider: meters.build(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Tracer for the log bridge, present only while exporting
    pub fn tracer(&self) -> Option<opentelemetry_sdk::trace::Tracer> {
        self.tracer_provider
            .as_ref()
            .map(|provider| provider.tracer(self.service_name.clone()))
    }

    /// Meter named after the service
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.service_name.clone())
    }

    /// Whether spans and metrics leave the process
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush pending spans and stop metric export
    ///
    /// Only the first call does any work. Every failure is reported, not
    /// just the first one.
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures: Vec<String> = Vec::new();
        if let Some(ref provider) = self.tracer_provider {
            failures.extend(
                provider
                    .force_flush()
                    .into_iter()
                    .filter_map(Result::err)
                    .map(|e| format!("spans: {}", e)),
            );
        }
        if let Err(e) = self.meter_provider.shutdown() {
            failures.push(format!("metrics: {}", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OtelError::Shutdown(failures.join("; ")))
        }
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Endpoint to export to, `None` when export is off
fn export_endpoint(config: &OtelConfig) -> Result<Option<&str>, OtelError> {
    if !config.enabled {
        return Ok(None);
    }

    match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => Ok(Some(endpoint)),
        _ => Err(OtelError::Config(
            "OTLP endpoint is required when enabled".into(),
        )),
    }
}

fn span_provider(endpoint: &str, resource: Resource) -> Result<TracerProvider, OtelError> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime;
    use opentelemetry_sdk::trace::{Config, Sampler};

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| OtelError::Exporter {
            signal: "spans",
            message: e.to_string(),
        })?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(resource),
        )
        .build())
}

fn metrics_reader(endpoint: &str) -> Result<PeriodicReader, OtelError> {
    use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
    use opentelemetry_sdk::metrics::reader::{
        DefaultAggregationSelector, DefaultTemporalitySelector,
    };
    use opentelemetry_sdk::runtime;

    let exporter = MetricsExporterBuilder::from(
        opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint),
    )
    .build_metrics_exporter(
        Box::new(DefaultTemporalitySelector::new()),
        Box::new(DefaultAggregationSelector::new()),
    )
    .map_err(|e| OtelError::Exporter {
        signal: "metrics",
        message: e.to_string(),
    })?;

    Ok(PeriodicReader::builder(exporter, runtime::Tokio).build())
}

/// Watcher metrics
pub struct Metrics {
    /// Fetches per search, labelled `ok` or `error`
    pub fetches_total: Counter<u64>,

    /// Listings not yet seen when fetched
    pub new_listings_total: Counter<u64>,

    /// Delivery sequences per search, labelled `delivered` or `failed`
    pub deliveries_total: Counter<u64>,

    /// Individual failed handler attempts
    pub handler_failures_total: Counter<u64>,

    /// Wall time of one loop iteration in seconds
    pub iteration_duration: Histogram<f64>,
}

impl Metrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        let fetches_total = meter
            .u64_counter("listing_watcher_fetches_total")
            .with_description("Total number of listing fetches")
            .init();

        let new_listings_total = meter
            .u64_counter("listing_watcher_new_listings_total")
            .with_description("Total number of new listings found")
            .init();

        let deliveries_total = meter
            .u64_counter("listing_watcher_deliveries_total")
            .with_description("Total number of listing deliveries")
            .init();

        let handler_failures_total = meter
            .u64_counter("listing_watcher_handler_failures_total")
            .with_description("Total number of failed handler attempts")
            .init();

        let iteration_duration = meter
            .f64_histogram("listing_watcher_iteration_duration_seconds")
            .with_description("Search loop iteration duration in seconds")
            .init();

        Self {
            fetches_total,
            new_listings_total,
            deliveries_total,
            handler_failures_total,
            iteration_duration,
        }
    }

    /// Metrics bound to the global meter provider
    ///
    /// No-ops unless a global provider was installed.
    pub fn noop() -> Self {
        Self::new(&global::meter("listing-watcher"))
    }

    /// Record one fetch
    pub fn record_fetch(&self, search: &str, status: &str) {
        self.fetches_total.add(
            1,
            &[
                KeyValue::new("search", search.to_string()),
                KeyValue::new("status", status.to_string()),
            ],
        );
    }

    /// Record listings found that were not seen before
    pub fn record_new_listings(&self, search: &str, count: u64) {
        self.new_listings_total
            .add(count, &[KeyValue::new("search", search.to_string())]);
    }

    /// Record the outcome of one delivery sequence
    pub fn record_delivery(&self, search: &str, delivered: bool) {
        let status = if delivered { "delivered" } else { "failed" };
        self.deliveries_total.add(
            1,
            &[
                KeyValue::new("search", search.to_string()),
                KeyValue::new("status", status),
            ],
        );
    }

    /// Record one failed handler attempt
    pub fn record_handler_failure(&self, search: &str) {
        self.handler_failures_total
            .add(1, &[KeyValue::new("search", search.to_string())]);
    }

    /// Record iteration duration
    pub fn record_iteration_duration(&self, search: &str, duration: Duration) {
        self.iteration_duration.record(
            duration.as_secs_f64(),
            &[KeyValue::new("search", search.to_string())],
        );
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize tracing subscriber with OpenTelemetry integration
///
/// `logging.format` selects `json` (default) or `pretty` output.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(parse_level(&logging.level));

    let otel_layer = otel
        .tracer()
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let (json_layer, pretty_layer) = match logging.format.to_lowercase().as_str() {
        "pretty" => (None, Some(tracing_subscriber::fmt::layer().pretty())),
        _ => (Some(tracing_subscriber::fmt::layer().json()), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| OtelError::Subscriber(e.to_string()))?;

    Ok(())
}
