use domain::models::DOWNLOAD_TOKEN_TTL_SECS;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    /// JWT authentication configuration
    pub jwt: JwtAuthConfig,
    #[serde(default)]
    pub exports: ExportsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Empty when running without Postgres.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn to_pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Requests per minute per user. 0 disables request rate limiting.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtAuthConfig {
    /// RSA private key in PEM format for signing tokens
    pub private_key: String,

    /// RSA public key in PEM format for verifying tokens
    pub public_key: String,

    /// Access token expiration in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    /// Leeway in seconds for clock skew tolerance (default: 30)
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

/// Where export jobs or journal records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportsConfig {
    /// When false every export route answers 501.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_memory_backend")]
    pub store: Backend,

    #[serde(default = "default_memory_backend")]
    pub journal: Backend,

    /// Jobs executing at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Queued plus running jobs allowed per user.
    #[serde(default = "default_max_active_per_user")]
    pub max_active_per_user: u64,

    /// Download token signing secret. Random per process when empty.
    #[serde(default)]
    pub token_secret: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    #[serde(default = "default_stream_threshold_rows")]
    pub stream_threshold_rows: usize,

    #[serde(default = "default_stream_chunk_rows")]
    pub stream_chunk_rows: usize,

    #[serde(default = "default_stream_yield_every_rows")]
    pub stream_yield_every_rows: usize,

    #[serde(default = "default_memory_soft_limit_bytes")]
    pub memory_soft_limit_bytes: u64,

    /// Build large queued CSV payloads through the chunk producer.
    #[serde(default)]
    pub stream_queued_csv: bool,
}

impl Default for ExportsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: Backend::Memory,
            journal: Backend::Memory,
            max_concurrency: default_max_concurrency(),
            max_active_per_user: default_max_active_per_user(),
            token_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
            stream_threshold_rows: default_stream_threshold_rows(),
            stream_chunk_rows: default_stream_chunk_rows(),
            stream_yield_every_rows: default_stream_yield_every_rows(),
            memory_soft_limit_bytes: default_memory_soft_limit_bytes(),
            stream_queued_csv: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,

    /// Terminal job lifetime with the in-memory store.
    #[serde(default = "default_memory_job_ttl")]
    pub memory_job_ttl_secs: i64,

    /// Terminal job lifetime with the Postgres store.
    #[serde(default = "default_persistent_job_ttl")]
    pub persistent_job_ttl_secs: i64,

    #[serde(default = "default_performance_ttl_days")]
    pub performance_ttl_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_retention_interval(),
            memory_job_ttl_secs: default_memory_job_ttl(),
            persistent_job_ttl_secs: default_persistent_job_ttl(),
            performance_ttl_days: default_performance_ttl_days(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rate_limit() -> u32 {
    100
}
fn default_access_token_expiry() -> i64 {
    3600 // 1 hour
}
fn default_jwt_leeway() -> u64 {
    30 // 30 seconds for clock skew tolerance
}
fn default_true() -> bool {
    true
}
fn default_memory_backend() -> Backend {
    Backend::Memory
}
fn default_max_concurrency() -> usize {
    1
}
fn default_max_active_per_user() -> u64 {
    5
}
fn default_token_ttl() -> i64 {
    DOWNLOAD_TOKEN_TTL_SECS
}
fn default_stream_threshold_rows() -> usize {
    10_000
}
fn default_stream_chunk_rows() -> usize {
    500
}
fn default_stream_yield_every_rows() -> usize {
    1_000
}
fn default_memory_soft_limit_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_retention_interval() -> u64 {
    60
}
fn default_memory_job_ttl() -> i64 {
    900 // 15 minutes
}
fn default_persistent_job_ttl() -> i64 {
    86_400 // 24 hours
}
fn default_performance_ttl_days() -> i64 {
    30
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with TJX__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("TJX").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Build a configuration from embedded defaults plus `overrides`.
    ///
    /// Reads no files and skips validation so tests can assemble partial configs.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []
            rate_limit_per_minute = 0

            [jwt]
            private_key = "test-private-key"
            public_key = "test-public-key"
            access_token_expiry_secs = 3600
            leeway_secs = 30

            [exports]
            enabled = true
            store = "memory"
            journal = "memory"
            token_secret = "test-export-token-secret"

            [retention]
            interval_secs = 60
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.needs_database() && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "TJX__DATABASE__URL must be set when a postgres backend is selected".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.exports.max_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "exports.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.exports.max_active_per_user == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "exports.max_active_per_user must be at least 1".to_string(),
            ));
        }

        if self.exports.stream_chunk_rows == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "exports.stream_chunk_rows must be at least 1".to_string(),
            ));
        }

        if self.exports.token_ttl_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "exports.token_ttl_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether any configured backend is Postgres.
    pub fn needs_database(&self) -> bool {
        self.exports.store == Backend::Postgres || self.exports.journal == Backend::Postgres
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
