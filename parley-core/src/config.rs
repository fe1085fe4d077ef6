use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ParleyConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub widget: WidgetConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Chat completion provider settings. The API key is never read from the file;
/// it comes from `MISTRAL_API_KEY`. Without `timeout_seconds` a completion call
/// waits as long as the provider takes.
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_string(),
            timeout_seconds: None,
        }
    }
}

/// Identity provider used by the dashboard API (GoTrue-compatible).
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9999".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Values baked into the embeddable widget snippet.
#[derive(Debug, Deserialize, Clone)]
pub struct WidgetConfig {
    pub public_base_url: String,
    pub primary_color: String,
    pub position: String,
    pub greeting: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3000".to_string(),
            primary_color: "#2563eb".to_string(),
            position: "bottom-right".to_string(),
            greeting: "Hello! How can I help you?".to_string(),
        }
    }
}

impl ParleyConfig {
    /// Load from a TOML file, then apply `PARLEY__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }
}
