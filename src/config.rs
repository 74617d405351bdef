use std::env;

pub const ENDPOINT_ENV: &str = "AZURE_AI_ENDPOINT";
pub const API_KEY_ENV: &str = "AZURE_AI_KEY";

/// Path appended to the endpoint base for every completion call.
pub const CHAT_COMPLETIONS_PATH: &str = "/models/chat/completions";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Upstream provider settings. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Provider base URL, without trailing slash
    pub endpoint: String,
    /// Value of the `api-key` header
    pub api_key: String,
    /// Whole-request timeout in seconds, streams included
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Longest upstream event line the relay will buffer
    pub max_line_bytes: usize,
}

impl UpstreamConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> ConfigResult<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: ENDPOINT_ENV.to_string(),
            });
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: ENDPOINT_ENV.to_string(),
                value: endpoint,
                reason: "must start with http:// or https://".to_string(),
            });
        }
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: API_KEY_ENV.to_string(),
            });
        }
        Ok(Self {
            endpoint,
            api_key,
            request_timeout_secs: 600,
            connect_timeout_secs: 10,
            max_line_bytes: 1024 * 1024,
        })
    }

    /// Reads endpoint and credential from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        let endpoint = env::var(ENDPOINT_ENV).unwrap_or_default();
        let api_key = env::var(API_KEY_ENV).unwrap_or_default();
        Self::new(endpoint, api_key)
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_max_line_bytes(mut self, bytes: usize) -> Self {
        self.max_line_bytes = bytes;
        self
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}{}", self.endpoint, CHAT_COMPLETIONS_PATH)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body in bytes
    pub max_payload_size: usize,
    pub log_level: log::LevelFilter,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_payload_size: 4 * 1024 * 1024,
            log_level: log::LevelFilter::Info,
        }
    }
}
