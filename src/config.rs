//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub flows: FlowsConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Wire framing used for the relayed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Raw text fragments, errors appended in-band as plain text.
    #[default]
    Plain,
    /// `data:` events, `[DONE]` marker and `event: error` for relay errors.
    Sse,
}

impl std::str::FromStr for Framing {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Framing::Plain),
            "sse" => Ok(Framing::Sse),
            other => Err(RelayError::Config(format!(
                "Unknown framing: {}. Available: plain, sse",
                other
            ))),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the relay listens on.
    pub listen_addr: String,

    /// Maximum concurrent streaming responses.
    pub max_streams: usize,

    /// Timeout for handing one fragment to the client connection (seconds).
    pub write_timeout_secs: u64,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,

    /// Fragments buffered between the relay task and the response body.
    pub channel_capacity: usize,

    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,

    /// Body framing.
    pub framing: Framing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            max_streams: 10_000,
            write_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            channel_capacity: 1,
            max_body_bytes: 1024 * 1024,
            framing: Framing::Plain,
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Backend configuration for completion providers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend provider: "mock" or "openai".
    pub provider: String,

    /// Model used when the request does not name one.
    pub default_model: String,

    /// Timeout for opening the upstream stream (seconds).
    pub timeout_secs: u64,

    /// Longest wait for the next upstream fragment once streaming (seconds).
    pub idle_timeout_secs: u64,

    /// Delay between words for the mock provider (milliseconds).
    pub mock_token_delay_ms: u64,

    /// OpenAI-specific settings.
    pub openai: OpenAIConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            default_model: "gpt-4".to_string(),
            timeout_secs: 60,
            idle_timeout_secs: 60,
            mock_token_delay_ms: 50,
            openai: OpenAIConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn mock_token_delay(&self) -> Duration {
        Duration::from_millis(self.mock_token_delay_ms)
    }
}

/// OpenAI-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// API key (can also be set via OPENAI_API_KEY env var).
    pub api_key: Option<String>,

    /// API base URL.
    pub api_base: String,

    /// Maximum idle connections per host in pool.
    pub pool_max_idle_per_host: usize,

    /// Skip TLS certificate verification (testing only).
    pub insecure_ssl: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            pool_max_idle_per_host: 32,
            insecure_ssl: false,
        }
    }
}

/// Flow definitions used to build system instructions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowsConfig {
    /// Resolve unknown flow names to a synthesized flow instead of "not found".
    pub allow_unknown: bool,

    /// Instruction used when a flow carries no system prompt.
    pub fallback_instruction: String,

    /// Named flows.
    pub entries: Vec<FlowEntry>,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            allow_unknown: true,
            fallback_instruction:
                "You are a helpful assistant specialized in restaurant analytics.".to_string(),
            entries: Vec::new(),
        }
    }
}

/// A single `[[flows.entries]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, RelayError> {
        toml::from_str(content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Apply environment variable overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(v) = lookup("RELAY_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(n) = lookup("RELAY_MAX_STREAMS").and_then(|v| v.parse().ok()) {
            self.server.max_streams = n;
        }
        if let Some(n) = lookup("RELAY_WRITE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.server.write_timeout_secs = n;
        }
        if let Some(v) = lookup("RELAY_FRAMING") {
            self.server.framing = v.parse()?;
        }

        // Backend overrides
        if let Some(v) = lookup("RELAY_BACKEND_PROVIDER") {
            self.backend.provider = v;
        }
        if let Some(v) = lookup("RELAY_DEFAULT_MODEL") {
            self.backend.default_model = v;
        }
        if let Some(n) = lookup("RELAY_BACKEND_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.backend.timeout_secs = n;
        }
        if let Some(n) = lookup("RELAY_BACKEND_IDLE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.backend.idle_timeout_secs = n;
        }

        // OpenAI overrides (standard env var)
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.backend.openai.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_BASE") {
            self.backend.openai.api_base = v;
        }

        // Metrics overrides
        if let Some(v) = lookup("RELAY_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RELAY_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging overrides
        if let Some(v) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("RELAY_LOG_FORMAT") {
            self.logging.format = v;
        }

        Ok(())
    }
}
