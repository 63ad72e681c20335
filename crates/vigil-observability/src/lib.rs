//! Vigil Observability
//!
//! This crate provides the monitoring adapter layer:
//! - Structured logging with field redaction
//! - Telemetry client (exceptions, events, metrics, dependencies, traces,
//!   requests, availability) with a pluggable backend sink
//! - Distributed tracing (OpenTelemetry) and span helpers
//! - Error classification and response mapping
//! - Process health sampling and crash/shutdown supervision
//! - Health endpoints

pub mod crash;
pub mod health;
pub mod logger;
pub mod process;
pub mod report;
pub mod spans;
pub mod telemetry;

pub use crash::{
    install_panic_hook, shutdown_signal, spawn_supervised, start_memory_monitor, CrashSupervisor,
};
pub use health::{health_router, HealthState};
pub use logger::{init_logging, LogLevel, LoggerConfig, StructuredLogger};
pub use process::{record_process_start, ProcessHealth, SystemInfo};
pub use report::{handle_action_error, handle_request_error};
pub use spans::{init_tracer, with_action_span, with_route_span, with_span, TracerConfig};
pub use telemetry::{
    init_telemetry, HttpSink, MemorySink, Severity, TelemetryClient, TelemetryConfig,
    TelemetrySink,
};
