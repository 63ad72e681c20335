use serde::{Deserialize, Serialize};
use std::path::Path;
use vigil_core::Environment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub tracing: TracingSettings,

    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default = "default_role_name")]
    pub cloud_role_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_role_instance: Option<String>,

    #[serde(default = "default_sampling_percentage")]
    pub sampling_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingSettings {
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: u64,

    #[serde(default = "default_memory_check_interval_secs")]
    pub memory_check_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            telemetry: TelemetrySettings::default(),
            tracing: TracingSettings::default(),
            monitoring: MonitoringSettings::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_requests: false,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            cloud_role_name: default_role_name(),
            cloud_role_instance: None,
            sampling_percentage: default_sampling_percentage(),
        }
    }
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
            otlp_endpoint: None,
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            memory_threshold_mb: default_memory_threshold_mb(),
            memory_check_interval_secs: default_memory_check_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(host) = std::env::var("VIGIL_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("VIGIL_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid VIGIL_PORT '{}', using default", port),
            }
        }
        if let Ok(environment) = std::env::var("VIGIL_ENV") {
            self.environment = environment;
        }
        if let Ok(level) = std::env::var("VIGIL_LOG_LEVEL") {
            self.logging.level = level;
        }

        // Backend credential has no VIGIL_ prefix; it is shared with
        // other tooling in the deployment.
        if let Ok(connection_string) = std::env::var("TELEMETRY_CONNECTION_STRING") {
            if !connection_string.is_empty() {
                self.telemetry.connection_string = Some(connection_string);
            }
        }
        if let Ok(role) = std::env::var("VIGIL_CLOUD_ROLE") {
            self.telemetry.cloud_role_name = role;
        }
        if let Ok(instance) = std::env::var("VIGIL_CLOUD_ROLE_INSTANCE") {
            self.telemetry.cloud_role_instance = Some(instance);
        }
        if let Ok(sampling) = std::env::var("VIGIL_TELEMETRY_SAMPLING") {
            match sampling.parse() {
                Ok(sampling) => self.telemetry.sampling_percentage = sampling,
                Err(_) => eprintln!(
                    "Warning: Invalid VIGIL_TELEMETRY_SAMPLING '{}', using default",
                    sampling
                ),
            }
        }
        if let Ok(rate) = std::env::var("VIGIL_TRACE_SAMPLING") {
            match rate.parse() {
                Ok(rate) => self.tracing.sampling_rate = rate,
                Err(_) => eprintln!(
                    "Warning: Invalid VIGIL_TRACE_SAMPLING '{}', using default",
                    rate
                ),
            }
        }
        if let Ok(endpoint) = std::env::var("VIGIL_OTLP_ENDPOINT") {
            if !endpoint.is_empty() {
                self.tracing.otlp_endpoint = Some(endpoint);
            }
        }
    }

    pub fn environment(&self) -> Environment {
        Environment::parse(&self.environment)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_false() -> bool {
    false
}

fn default_role_name() -> String {
    "vigil".to_string()
}

fn default_sampling_percentage() -> f64 {
    100.0
}

fn default_sampling_rate() -> f64 {
    1.0
}

fn default_memory_threshold_mb() -> u64 {
    1024
}

fn default_memory_check_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}
