//! Configuration parsing for the arxiv-api service.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for local development

use clap::{Args, Parser};

use crate::observability::TelemetryError;

/// arxiv-api: HTTP API with OpenTelemetry instrumentation.
#[derive(Parser, Debug, Clone)]
#[command(name = "arxiv-api")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "API_PORT", default_value_t = 4000)]
    pub port: u16,

    /// Deployment environment (development, staging, production)
    #[arg(long, env = "ENV", default_value = "development")]
    pub env: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON (always on in production)
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

/// Settings consumed by the telemetry controller.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Service name reported in the telemetry resource
    #[arg(long, env = "SERVICE_NAME", default_value = "arxiv-api")]
    pub service_name: String,

    /// Trace collector endpoint (host:port or URL)
    #[arg(long, env = "TRACE_ENDPOINT", default_value = "localhost:4318")]
    pub trace_endpoint: String,

    /// Metric collector endpoint (host:port or URL)
    #[arg(long, env = "METRIC_ENDPOINT", default_value = "localhost:4318")]
    pub metric_endpoint: String,

    /// Talk to the collectors over plain HTTP
    #[arg(
        long,
        env = "ISINSECURE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub insecure: bool,

    /// Fraction of traces to sample, in [0, 1]
    #[arg(long, env = "TRACE_RATIO", default_value_t = 0.1)]
    pub trace_ratio: f64,

    /// Enable trace and metric export
    #[arg(
        long,
        env = "TELEMETRY_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub telemetry_enabled: bool,

    /// Maximum number of lazily created counters before overflow
    #[arg(long, env = "MAX_ROUTE_COUNTERS", default_value_t = 256)]
    pub max_route_counters: usize,

    /// Deployment environment reported in the telemetry resource
    #[arg(skip = String::from("development"))]
    pub environment: String,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        let mut config = Self::parse();
        config.telemetry.environment = config.env.clone();
        config
    }

    /// Whether logs should be rendered as JSON.
    pub fn json_logs(&self) -> bool {
        self.log_json || self.env == "production"
    }
}

impl TelemetryConfig {
    /// Check the settings that `Telemetry::init` relies on.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if !(0.0..=1.0).contains(&self.trace_ratio) {
            return Err(TelemetryError::InvalidConfig(format!(
                "trace ratio must be within [0, 1], got {}",
                self.trace_ratio
            )));
        }
        if self.telemetry_enabled {
            if self.trace_endpoint.trim().is_empty() {
                return Err(TelemetryError::InvalidConfig(
                    "trace endpoint is empty".into(),
                ));
            }
            if self.metric_endpoint.trim().is_empty() {
                return Err(TelemetryError::InvalidConfig(
                    "metric endpoint is empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Full URL of the trace collector.
    pub fn trace_url(&self) -> String {
        collector_url(&self.trace_endpoint, self.insecure, "/v1/traces")
    }

    /// Full URL of the metric collector.
    pub fn metric_url(&self) -> String {
        collector_url(&self.metric_endpoint, self.insecure, "/v1/metrics")
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "arxiv-api".into(),
            trace_endpoint: "localhost:4318".into(),
            metric_endpoint: "localhost:4318".into(),
            insecure: true,
            trace_ratio: 0.1,
            telemetry_enabled: false,
            max_route_counters: 256,
            environment: "development".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
            env: "development".into(),
            log_level: "info".into(),
            log_json: false,
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Turn a `host:port` (or URL) endpoint into an OTLP/HTTP signal URL.
fn collector_url(endpoint: &str, insecure: bool, signal_path: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if insecure {
        format!("http://{endpoint}")
    } else {
        format!("https://{endpoint}")
    };

    if base.ends_with(signal_path) {
        base
    } else {
        format!("{base}{signal_path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.telemetry.telemetry_enabled);
        assert!(config.telemetry.insecure);
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::parse_from([
            "arxiv-api",
            "--port",
            "8080",
            "--trace-ratio",
            "0.5",
            "--telemetry-enabled",
            "true",
            "--insecure",
            "false",
        ]);
        assert_eq!(config.port, 8080);
        assert!((config.telemetry.trace_ratio - 0.5).abs() < f64::EPSILON);
        assert!(config.telemetry.telemetry_enabled);
        assert!(!config.telemetry.insecure);
    }

    #[test]
    fn test_production_forces_json_logs() {
        let config = Config {
            env: "production".into(),
            ..Config::default()
        };
        assert!(config.json_logs());
        assert!(!Config::default().json_logs());
    }

    #[test]
    fn test_collector_url_from_host_port() {
        let config = TelemetryConfig {
            trace_endpoint: "otel:4318".into(),
            metric_endpoint: "otel:4318".into(),
            ..TelemetryConfig::default()
        };
        assert_eq!(config.trace_url(), "http://otel:4318/v1/traces");
        assert_eq!(config.metric_url(), "http://otel:4318/v1/metrics");

        let secure = TelemetryConfig {
            insecure: false,
            ..config
        };
        assert_eq!(secure.trace_url(), "https://otel:4318/v1/traces");
    }

    #[test]
    fn test_collector_url_keeps_scheme_and_path() {
        assert_eq!(
            collector_url("https://collector.example/v1/traces", true, "/v1/traces"),
            "https://collector.example/v1/traces"
        );
        assert_eq!(
            collector_url("http://collector:4318/", false, "/v1/metrics"),
            "http://collector:4318/v1/metrics"
        );
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let config = TelemetryConfig {
            trace_ratio: 1.5,
            ..TelemetryConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_endpoint_when_enabled() {
        let config = TelemetryConfig {
            telemetry_enabled: true,
            trace_endpoint: " ".into(),
            ..TelemetryConfig::default()
        };
        assert!(config.validate().is_err());

        // Endpoints are irrelevant while disabled.
        let disabled = TelemetryConfig {
            telemetry_enabled: false,
            ..config
        };
        assert!(disabled.validate().is_ok());
    }
}
