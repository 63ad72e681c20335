//! Vigil Monitoring Demo Server
//!
//! This server provides:
//! - Health probes with process and host snapshots
//! - Deliberate error routes exercising the reporting pipeline
//! - A client-telemetry relay for browser errors and web vitals
//! - Performance routes showcasing nested spans
//! - Crash supervision with bounded telemetry flush on exit
//!
//! Usage:
//! ```bash
//! # With config file
//! vigil-server --config config.yaml
//!
//! # Or with environment variables
//! TELEMETRY_CONNECTION_STRING="InstrumentationKey=...;IngestionEndpoint=..." vigil-server
//! ```
//!
//! Test with:
//! ```bash
//! curl http://localhost:8080/api/health
//! curl "http://localhost:8080/api/test-error?type=validation"
//! curl -X POST http://localhost:8080/api/actions/simulate-work \
//!   -H "Content-Type: application/json" -d '{"steps": 5}'
//! ```

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use vigil_observability::telemetry::TelemetryConfig;
use vigil_observability::{
    init_logging, init_telemetry, init_tracer, install_panic_hook, record_process_start,
    shutdown_signal, spans::TracerConfig, start_memory_monitor, CrashSupervisor, HealthState,
    LoggerConfig, StructuredLogger,
};
use vigil_server::app::{build_app, AppState};
use vigil_server::config::ServerConfig;

const TOWER: &str = r#"
      /\
     /  \      _    __ _       _ _
    / () \    | |  / /(_)     (_) |
   /______\   | | / /  _  __ _ _| |
   |  ##  |   | |/ /  | |/ _` | | |
   |  ##  |   |   /   | | (_| | | |
   |______|   |__/    |_|\__, |_|_|
   |______|               __/ |
  /________\             |___/      version : {VERSION}
"#;

/// Vigil - monitoring instrumentation demo server
#[derive(Parser)]
#[command(name = "vigil-server")]
#[command(about = "Vigil monitoring demo server", long_about = None)]
#[command(before_help = TOWER)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "VIGIL_CONFIG", global = true)]
    config: Option<String>,

    /// Deployment environment (development, staging, production)
    #[arg(short, long, value_name = "ENV", env = "VIGIL_ENV", global = true)]
    environment: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Vigil server (default if no command specified)
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) | None => {}
    }

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        println!("📁 Loading configuration from: {}", config_path);
        ServerConfig::from_file(&config_path)
            .map_err(|load_error| anyhow::anyhow!("failed to load config: {}", load_error))?
    } else {
        println!("📁 Using default configuration");
        ServerConfig::default()
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // CLI environment override (highest precedence)
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }

    let environment = config.environment();
    let version = env!("CARGO_PKG_VERSION").to_string();

    record_process_start();
    init_logging(&LoggerConfig {
        level: config.logging.level.clone(),
        environment,
        service_name: config.telemetry.cloud_role_name.clone(),
        version: version.clone(),
    });
    println!("{}", TOWER.replace("{VERSION}", &version));
    info!(environment = environment.as_str(), version, "🚀 Starting Vigil server");

    // Tracer before telemetry so span context is live for startup events
    let tracer_provider = match init_tracer(&TracerConfig {
        service_name: config.telemetry.cloud_role_name.clone(),
        service_version: version.clone(),
        sampling_rate: config.tracing.sampling_rate,
        otlp_endpoint: config.tracing.otlp_endpoint.clone(),
    }) {
        Ok(provider) => {
            info!("🔭 Tracer initialized");
            Some(provider)
        }
        Err(tracer_error) => {
            warn!(error = %tracer_error, "Tracer initialization failed, spans stay local");
            None
        }
    };

    let client = init_telemetry(&TelemetryConfig {
        connection_string: config.telemetry.connection_string.clone(),
        cloud_role_name: config.telemetry.cloud_role_name.clone(),
        cloud_role_instance: config
            .telemetry
            .cloud_role_instance
            .clone()
            .unwrap_or_else(|| format!("{}-{}", config.host, std::process::id())),
        sampling_percentage: config.telemetry.sampling_percentage,
        environment,
        app_version: version.clone(),
    });
    if client.is_enabled() {
        info!("📡 Telemetry backend connected");
    } else {
        info!("📡 Telemetry in logging-only mode");
    }

    let supervisor = CrashSupervisor::new(client.clone(), tracer_provider);
    install_panic_hook(supervisor.clone());
    start_memory_monitor(
        supervisor.clone(),
        Duration::from_secs(config.monitoring.memory_check_interval_secs),
        config.monitoring.memory_threshold_mb,
    );

    let logger = StructuredLogger::new(&LoggerConfig {
        level: config.logging.level.clone(),
        environment,
        service_name: config.telemetry.cloud_role_name.clone(),
        version: version.clone(),
    });

    let state = AppState {
        client: client.clone(),
        supervisor: supervisor.clone(),
        logger,
        environment,
    };
    let health = HealthState::new(client.clone(), environment, version)
        .with_memory_threshold(config.monitoring.memory_threshold_mb);
    let app = build_app(
        state,
        health,
        Duration::from_secs(config.monitoring.request_timeout_secs),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|parse_error| anyhow::anyhow!("invalid listen address: {}", parse_error))?;
    let listener = TcpListener::bind(addr).await?;
    info!("🌐 Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    client.track_event(
        "ProcessSignal",
        vigil_observability::telemetry::Properties::new(),
        None,
    );
    supervisor.shutdown("signal").await;
    info!("👋 Vigil server stopped");

    Ok(())
}
