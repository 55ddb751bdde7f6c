use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct EmotionSenseConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub recommendations: RecommendationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
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
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_upload_mb: 10,
        }
    }
}

impl HttpConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Shared secret the auth gateway presents as a bearer token.
    /// When unset, only the `X-User-Id` header is required.
    pub service_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    /// `http` or `disabled`
    pub face_backend: String,
    pub face_url: String,
    /// `placeholder` or `disabled`
    pub voice_backend: String,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            face_backend: "http".to_string(),
            face_url: "http://127.0.0.1:5005".to_string(),
            voice_backend: "disabled".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_ms: 250,
        }
    }
}

/// Upper bound on items returned for an emotion.
pub const MAX_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecommendationConfig {
    pub sample_size: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            sample_size: MAX_SAMPLE_SIZE,
        }
    }
}

impl EmotionSenseConfig {
    /// Load from a TOML file, overlaid by `EMOTIONSENSE__SECTION__KEY` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("EMOTIONSENSE").separator("__"))
            .build()?;
        s.try_deserialize::<Self>()?.validated()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        let size = self.recommendations.sample_size;
        if size == 0 || size > MAX_SAMPLE_SIZE {
            return Err(ConfigError::Message(format!(
                "recommendations.sample_size must be between 1 and {MAX_SAMPLE_SIZE}, got {size}"
            )));
        }
        Ok(self)
    }
}
