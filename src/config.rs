use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Gemini API key
    #[serde(default)]
    pub gemini_api_key: String,

    /// Gemini model for text-only chat
    #[serde(default = "default_gemini_text_model")]
    pub gemini_text_model: String,

    /// Gemini model for image generation/editing
    #[serde(default = "default_gemini_image_model")]
    pub gemini_image_model: String,

    /// Claude API key
    #[serde(default)]
    pub claude_api_key: String,

    /// Claude model for suggestion generation
    #[serde(default = "default_claude_model")]
    pub claude_model: String,

    /// Claude messages endpoint
    #[serde(default = "default_claude_api_url")]
    pub claude_api_url: String,

    /// Request timeout for Claude calls in seconds
    #[serde(default = "default_claude_timeout_secs")]
    pub claude_timeout_secs: u64,

    /// Request timeout for Gemini calls in seconds
    #[serde(default = "default_gemini_timeout_secs")]
    pub gemini_timeout_secs: u64,

    /// Anonymous usage quota before sign-in is required
    #[serde(default = "default_anonymous_quota")]
    pub anonymous_quota: u32,

    /// Maximum upload size in MB
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    /// JPEG quality for normalized uploads
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Maximum width/height of normalized images in pixels
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// Byte ceiling for images sent to Claude
    #[serde(default = "default_claude_image_limit")]
    pub claude_image_limit: usize,

    /// Directory for generated images
    #[serde(default = "default_generated_dir")]
    pub generated_dir: String,

    /// Directory for normalized uploads
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    /// Directory for static assets
    #[serde(default = "default_public_dir")]
    pub public_dir: String,

    /// Secret for signing access tokens
    #[serde(default = "default_token_secret")]
    pub token_secret: String,

    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,

    /// Download token lifetime in seconds
    #[serde(default = "default_download_token_ttl_secs")]
    pub download_token_ttl_secs: u64,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            gemini_api_key: String::new(),
            gemini_text_model: default_gemini_text_model(),
            gemini_image_model: default_gemini_image_model(),
            claude_api_key: String::new(),
            claude_model: default_claude_model(),
            claude_api_url: default_claude_api_url(),
            claude_timeout_secs: default_claude_timeout_secs(),
            gemini_timeout_secs: default_gemini_timeout_secs(),
            anonymous_quota: default_anonymous_quota(),
            max_upload_mb: default_max_upload_mb(),
            jpeg_quality: default_jpeg_quality(),
            max_dimension: default_max_dimension(),
            claude_image_limit: default_claude_image_limit(),
            generated_dir: default_generated_dir(),
            uploads_dir: default_uploads_dir(),
            public_dir: default_public_dir(),
            token_secret: default_token_secret(),
            access_token_ttl_secs: default_access_token_ttl_secs(),
            download_token_ttl_secs: default_download_token_ttl_secs(),
            enable_cors: default_true(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional `redesign` config file overridden
    /// by `REDESIGN_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("redesign").required(false))
            .add_source(config::Environment::with_prefix("REDESIGN").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;

        if config.claude_api_key.is_empty() {
            tracing::warn!("CLAUDE api key not configured; suggestion endpoints will fail upstream auth");
        }
        if config.gemini_api_key.is_empty() {
            tracing::warn!("GEMINI api key not configured; chat endpoints will fail upstream auth");
        }

        Ok(config)
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Get max upload size in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn claude_timeout(&self) -> Duration {
        Duration::from_secs(self.claude_timeout_secs)
    }

    pub fn gemini_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini_timeout_secs)
    }

    pub fn download_token_ttl(&self) -> Duration {
        Duration::from_secs(self.download_token_ttl_secs)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_gemini_text_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_gemini_image_model() -> String {
    "gemini-2.0-flash-exp-image-generation".to_string()
}

fn default_claude_model() -> String {
    "claude-3-sonnet-20240229".to_string()
}

fn default_claude_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_claude_timeout_secs() -> u64 {
    60
}

fn default_gemini_timeout_secs() -> u64 {
    90
}

fn default_anonymous_quota() -> u32 {
    3
}

fn default_max_upload_mb() -> usize {
    10
}

fn default_jpeg_quality() -> u8 {
    95
}

fn default_max_dimension() -> u32 {
    2000
}

fn default_claude_image_limit() -> usize {
    5 * 1024 * 1024
}

fn default_generated_dir() -> String {
    "generated".to_string()
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_public_dir() -> String {
    "public".to_string()
}

fn default_token_secret() -> String {
    "hard-to-guess-string".to_string()
}

fn default_access_token_ttl_secs() -> u64 {
    3600
}

fn default_download_token_ttl_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
