//! Telemetry client and backend sinks
//!
//! The `TelemetryClient` wraps an opaque backend sink behind typed emit
//! operations (exception, event, metric, dependency, trace, request,
//! availability) plus `flush`. Every emission is paired with a
//! structured-log line so signal is never lost when telemetry is
//! disabled, and none of the emit operations can fail outward: sink
//! errors are caught, logged, and dropped.
//!
//! Without a connection string the client runs in logging-only mode
//! (no sink), and the system stays fully functional.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_core::Environment;

/// String-valued property bag attached to every telemetry item.
pub type Properties = BTreeMap<String, String>;

/// Telemetry client configuration, read once at process start.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Backend credential (`Key=Value;Key=Value` with
    /// `IngestionEndpoint` and `InstrumentationKey` entries). `None`
    /// means logging-only mode.
    pub connection_string: Option<String>,
    /// Cloud role name identifying the logical service
    pub cloud_role_name: String,
    /// Cloud role instance identifying this process
    pub cloud_role_instance: String,
    /// Percentage of envelopes forwarded to the backend (0-100)
    pub sampling_percentage: f64,
    /// Deployment environment, stamped into enrichment
    pub environment: Environment,
    /// Application version, stamped into enrichment
    pub app_version: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            cloud_role_name: "vigil".to_string(),
            cloud_role_instance: "default-instance".to_string(),
            sampling_percentage: 100.0,
            environment: Environment::default(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Cloud-role identity tags stamped on every envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CloudRole {
    pub name: String,
    pub instance: String,
}

/// One telemetry item addressed to the backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub name: String,
    pub time: DateTime<Utc>,
    pub role: CloudRole,
    pub data: TelemetryData,
}

/// Trace severity accepted by [`TelemetryClient::track_trace`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TelemetryData {
    #[serde(rename_all = "camelCase")]
    Exception {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        properties: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        name: String,
        properties: Properties,
        #[serde(skip_serializing_if = "Option::is_none")]
        measurements: Option<BTreeMap<String, f64>>,
    },
    #[serde(rename_all = "camelCase")]
    Metric {
        name: String,
        value: f64,
        properties: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Dependency {
        name: String,
        command: String,
        duration_ms: u64,
        success: bool,
        dependency_type: String,
        target: String,
        result_code: u16,
        properties: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Trace {
        message: String,
        severity: Severity,
        properties: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Request {
        name: String,
        url: String,
        duration_ms: u64,
        status_code: u16,
        success: bool,
        properties: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Availability {
        id: Uuid,
        name: String,
        duration_ms: u64,
        success: bool,
        run_location: String,
        message: String,
        properties: Properties,
    },
}

/// Opaque backend capability: accepts envelopes without blocking and
/// drains its buffer on `flush`.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Enqueue an envelope. Never blocks, never fails outward.
    fn submit(&self, envelope: Envelope);

    /// Drain buffered envelopes to the backend.
    async fn flush(&self);
}

/// Telemetry client. Shared, read-mostly state: identity tags and
/// enrichment are fixed at construction.
pub struct TelemetryClient {
    sink: Option<Arc<dyn TelemetrySink>>,
    role: CloudRole,
    enrichment: Properties,
    sampling_percentage: f64,
}

impl TelemetryClient {
    pub fn new(config: &TelemetryConfig, sink: Option<Arc<dyn TelemetrySink>>) -> Self {
        let mut enrichment = Properties::new();
        enrichment.insert("app.version".to_string(), config.app_version.clone());
        enrichment.insert(
            "runtime.version".to_string(),
            format!("rust-{}", option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")),
        );
        enrichment.insert(
            "environment".to_string(),
            config.environment.as_str().to_string(),
        );
        Self {
            sink,
            role: CloudRole {
                name: config.cloud_role_name.clone(),
                instance: config.cloud_role_instance.clone(),
            },
            enrichment,
            sampling_percentage: config.sampling_percentage.clamp(0.0, 100.0),
        }
    }

    /// Whether a backend sink is attached.
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn role(&self) -> &CloudRole {
        &self.role
    }

    pub fn track_exception(&self, message: &str, stack: Option<&str>, properties: Properties) {
        let properties = self.enrich(properties);
        self.submit(
            "exception",
            TelemetryData::Exception {
                message: message.to_string(),
                stack: stack.map(String::from),
                properties: properties.clone(),
            },
        );
        error!(error = message, stack = stack, properties = ?properties, "Exception tracked");
    }

    pub fn track_event(
        &self,
        name: &str,
        properties: Properties,
        measurements: Option<BTreeMap<String, f64>>,
    ) {
        let properties = self.enrich(properties);
        self.submit(
            "event",
            TelemetryData::Event {
                name: name.to_string(),
                properties: properties.clone(),
                measurements: measurements.clone(),
            },
        );
        info!(name, properties = ?properties, measurements = ?measurements, "Event tracked");
    }

    pub fn track_metric(&self, name: &str, value: f64, properties: Properties) {
        let properties = self.enrich(properties);
        self.submit(
            "metric",
            TelemetryData::Metric {
                name: name.to_string(),
                value,
                properties: properties.clone(),
            },
        );
        debug!(name, value, properties = ?properties, "Metric tracked");
    }

    #[allow(clippy::too_many_arguments)]
    pub fn track_dependency(
        &self,
        name: &str,
        command: &str,
        duration_ms: u64,
        success: bool,
        dependency_type: &str,
        target: Option<&str>,
        properties: Properties,
    ) {
        let properties = self.enrich(properties);
        self.submit(
            "dependency",
            TelemetryData::Dependency {
                name: name.to_string(),
                command: command.to_string(),
                duration_ms,
                success,
                dependency_type: dependency_type.to_string(),
                target: target.unwrap_or("external").to_string(),
                result_code: if success { 200 } else { 500 },
                properties: properties.clone(),
            },
        );
        debug!(name, command, duration_ms, success, "Dependency tracked");
    }

    pub fn track_trace(&self, message: &str, severity: Severity, properties: Properties) {
        let properties = self.enrich(properties);
        self.submit(
            "trace",
            TelemetryData::Trace {
                message: message.to_string(),
                severity,
                properties,
            },
        );
        debug!(message, severity = ?severity, "Trace tracked");
    }

    pub fn track_request(
        &self,
        name: &str,
        url: &str,
        duration_ms: u64,
        status_code: u16,
        success: bool,
        properties: Properties,
    ) {
        let properties = self.enrich(properties);
        self.submit(
            "request",
            TelemetryData::Request {
                name: name.to_string(),
                url: url.to_string(),
                duration_ms,
                status_code,
                success,
                properties,
            },
        );
        debug!(name, url, duration_ms, status_code, success, "Request tracked");
    }

    pub fn track_availability(
        &self,
        name: &str,
        duration_ms: u64,
        success: bool,
        message: Option<&str>,
        properties: Properties,
    ) {
        let properties = self.enrich(properties);
        let message = message
            .map(String::from)
            .unwrap_or_else(|| {
                if success {
                    "Health check passed".to_string()
                } else {
                    "Health check failed".to_string()
                }
            });
        self.submit(
            "availability",
            TelemetryData::Availability {
                id: Uuid::new_v4(),
                name: name.to_string(),
                duration_ms,
                success,
                run_location: self.role.instance.clone(),
                message,
                properties,
            },
        );
        debug!(name, duration_ms, success, "Availability tracked");
    }

    /// Await the sink's buffered-data drain. Must be called before
    /// process exit to avoid losing in-flight telemetry. Resolves
    /// immediately in logging-only mode.
    pub async fn flush(&self) {
        if let Some(sink) = &self.sink {
            sink.flush().await;
            info!("Telemetry flushed successfully");
        }
    }

    /// Inject the timestamp property and append the constant
    /// enrichment set.
    fn enrich(&self, mut properties: Properties) -> Properties {
        properties.insert("timestamp".to_string(), Utc::now().to_rfc3339());
        for (key, value) in &self.enrichment {
            properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        properties
    }

    fn submit(&self, name: &str, data: TelemetryData) {
        let Some(sink) = &self.sink else {
            return;
        };
        if !self.sampled() {
            return;
        }
        sink.submit(Envelope {
            name: name.to_string(),
            time: Utc::now(),
            role: self.role.clone(),
            data,
        });
    }

    // Cheap sampling decision without a dedicated RNG: the first byte
    // of a v4 uuid is uniformly random.
    fn sampled(&self) -> bool {
        if self.sampling_percentage >= 100.0 {
            return true;
        }
        if self.sampling_percentage <= 0.0 {
            return false;
        }
        let byte = Uuid::new_v4().as_bytes()[0] as f64;
        byte / 255.0 * 100.0 < self.sampling_percentage
    }
}

static CLIENT: OnceCell<Arc<TelemetryClient>> = OnceCell::new();

/// Initialize the process-wide telemetry client. Idempotent: repeated
/// calls return the same handle and do not rebuild enrichment or
/// re-spawn the sink worker.
///
/// Must be called from within a tokio runtime when a connection string
/// is configured (the HTTP sink spawns its dispatch worker).
pub fn init_telemetry(config: &TelemetryConfig) -> Arc<TelemetryClient> {
    CLIENT
        .get_or_init(|| {
            let sink: Option<Arc<dyn TelemetrySink>> = match config
                .connection_string
                .as_deref()
                .map(ConnectionString::parse)
            {
                Some(Ok(connection)) => {
                    info!(
                        endpoint = %connection.endpoint,
                        "Telemetry backend configured"
                    );
                    Some(Arc::new(HttpSink::new(HttpSinkConfig::new(connection))))
                }
                Some(Err(parse_error)) => {
                    warn!(
                        error = %parse_error,
                        "Invalid telemetry connection string, running in logging-only mode"
                    );
                    None
                }
                None => {
                    warn!(
                        "Telemetry not configured. Set TELEMETRY_CONNECTION_STRING to enable \
                         backend forwarding; running in logging-only mode"
                    );
                    None
                }
            };
            Arc::new(TelemetryClient::new(config, sink))
        })
        .clone()
}

/// The already-initialized process-wide client, if any.
pub fn telemetry_client() -> Option<Arc<TelemetryClient>> {
    CLIENT.get().cloned()
}

/// Parsed backend credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: String,
    pub instrumentation_key: String,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Requires `IngestionEndpoint`
    /// and `InstrumentationKey` (case-insensitive keys).
    pub fn parse(raw: &str) -> Result<Self, ConnectionStringError> {
        let mut endpoint = None;
        let mut key = None;
        for pair in raw.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((name, value)) = pair.split_once('=') else {
                return Err(ConnectionStringError::Malformed(pair.to_string()));
            };
            match name.trim().to_lowercase().as_str() {
                "ingestionendpoint" => endpoint = Some(value.trim().trim_end_matches('/').to_string()),
                "instrumentationkey" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }
        match (endpoint, key) {
            (Some(endpoint), Some(instrumentation_key)) => Ok(Self {
                endpoint,
                instrumentation_key,
            }),
            (None, _) => Err(ConnectionStringError::MissingField("IngestionEndpoint")),
            (_, None) => Err(ConnectionStringError::MissingField("InstrumentationKey")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionStringError {
    #[error("malformed segment: {0}")]
    Malformed(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// HTTP sink configuration.
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub connection: ConnectionString,
    /// Maximum envelopes per POST
    pub batch_size: usize,
    /// Maximum time an envelope waits in the buffer (milliseconds)
    pub batch_timeout_ms: u64,
    /// Channel capacity before envelopes are dropped
    pub channel_buffer_size: usize,
}

impl HttpSinkConfig {
    pub fn new(connection: ConnectionString) -> Self {
        Self {
            connection,
            batch_size: 100,
            batch_timeout_ms: 2000,
            channel_buffer_size: 10_000,
        }
    }
}

enum SinkCommand {
    Item(Box<Envelope>),
    Flush(oneshot::Sender<()>),
}

/// Buffering HTTP sink: envelopes flow through a bounded channel to a
/// background worker that batches and POSTs them to the ingestion
/// endpoint. A full channel drops the envelope with a warning; HTTP
/// failures are logged and the batch is dropped, never retried into
/// the caller's path.
pub struct HttpSink {
    tx: mpsc::Sender<SinkCommand>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer_size);
        tokio::spawn(async move {
            Self::worker_loop(rx, config).await;
        });
        Self { tx }
    }

    async fn worker_loop(mut rx: mpsc::Receiver<SinkCommand>, config: HttpSinkConfig) {
        let client = reqwest::Client::new();
        let url = format!("{}/v2/track", config.connection.endpoint);
        let mut buffer: Vec<Envelope> = Vec::with_capacity(config.batch_size);
        let mut interval =
            tokio::time::interval(Duration::from_millis(config.batch_timeout_ms));

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(SinkCommand::Item(envelope)) => {
                            buffer.push(*envelope);
                            if buffer.len() >= config.batch_size {
                                Self::post_batch(&client, &url, &config, &mut buffer).await;
                            }
                        }
                        Some(SinkCommand::Flush(ack)) => {
                            Self::post_batch(&client, &url, &config, &mut buffer).await;
                            let _ = ack.send(());
                        }
                        None => {
                            // Channel closed, flush remaining and exit
                            Self::post_batch(&client, &url, &config, &mut buffer).await;
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        Self::post_batch(&client, &url, &config, &mut buffer).await;
                    }
                }
            }
        }

        debug!("Telemetry sink worker loop exited");
    }

    async fn post_batch(
        client: &reqwest::Client,
        url: &str,
        config: &HttpSinkConfig,
        buffer: &mut Vec<Envelope>,
    ) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        let count = batch.len();
        let result = client
            .post(url)
            .header("x-instrumentation-key", &config.connection.instrumentation_key)
            .json(&batch)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(count, "Telemetry batch delivered");
            }
            Ok(response) => {
                warn!(
                    count,
                    status = %response.status(),
                    "Telemetry backend rejected batch"
                );
            }
            Err(send_error) => {
                warn!(count, error = %send_error, "Failed to deliver telemetry batch");
            }
        }
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn submit(&self, envelope: Envelope) {
        match self.tx.try_send(SinkCommand::Item(Box::new(envelope))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Telemetry buffer full, dropping envelope");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Telemetry sink channel closed");
            }
        }
    }

    async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SinkCommand::Flush(ack_tx)).await.is_err() {
            error!("Telemetry sink channel closed, flush skipped");
            return;
        }
        if ack_rx.await.is_err() {
            warn!("Telemetry sink worker exited before flush completed");
        }
    }
}

/// In-memory sink capturing envelopes for tests.
#[derive(Default)]
pub struct MemorySink {
    envelopes: Mutex<Vec<Envelope>>,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().expect("sink poisoned").clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    fn submit(&self, envelope: Envelope) {
        self.envelopes.lock().expect("sink poisoned").push(envelope);
    }

    async fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
