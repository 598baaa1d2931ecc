use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub export: ExportConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
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

impl DatabaseConfig {
    /// Pool settings in the shape the persistence crate expects.
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
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

/// Limits and tuning of the export pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Maximum jobs per user in `pending`/`processing`.
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs_per_user: i64,

    /// Maximum simultaneous document fetches per job.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Fetched documents buffered ahead of the archive writer.
    #[serde(default = "default_write_buffer")]
    pub write_buffer_entries: usize,

    #[serde(default = "default_max_documents")]
    pub max_documents: i64,

    #[serde(default = "default_max_total_size")]
    pub max_total_size_bytes: i64,

    #[serde(default = "default_date_span_warning")]
    pub date_span_warning_days: i64,

    #[serde(default = "default_citizen_warning")]
    pub citizen_warning_threshold: usize,

    #[serde(default = "default_request_warning")]
    pub request_warning_threshold: usize,

    /// Catalogue page size used while selecting documents.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Jobs still active after this long are failed with `timeout`.
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_minutes: i64,

    /// Lifetime of a job record and its archive.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    /// Root directory for generated archives.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// `stored` or `deflated`.
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Deflate level (0-9); library default when absent.
    #[serde(default)]
    pub compression_level: Option<i64>,
}

impl ExportConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn stale_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_timeout_minutes)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours)
    }
}

/// Document storage backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `local` or `http`.
    #[serde(default = "default_storage_provider")]
    pub provider: String,

    /// Filesystem root for the `local` provider.
    #[serde(default = "default_storage_root")]
    pub local_root: PathBuf,

    /// Base URL for the `http` provider.
    #[serde(default)]
    pub http_base_url: String,

    /// Bearer token sent to the `http` provider, if any.
    #[serde(default)]
    pub http_auth_token: Option<String>,

    #[serde(default = "default_http_connect_timeout")]
    pub http_connect_timeout_secs: u64,
}

/// Background job scheduling.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_stale_sweep_interval")]
    pub stale_sweep_interval_secs: u64,

    /// Upper bound of the random delay added to every run.
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cleanup_interval_secs: default_cleanup_interval(),
            stale_sweep_interval_secs: default_stale_sweep_interval(),
            jitter_secs: default_jitter(),
            shutdown_timeout_secs: default_shutdown_timeout(),
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
fn default_max_body_size() -> usize {
    1_048_576
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
fn default_max_active_jobs() -> i64 {
    2
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_write_buffer() -> usize {
    8
}
fn default_max_documents() -> i64 {
    1000
}
fn default_max_total_size() -> i64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}
fn default_date_span_warning() -> i64 {
    730
}
fn default_citizen_warning() -> usize {
    100
}
fn default_request_warning() -> usize {
    50
}
fn default_page_size() -> usize {
    100
}
fn default_stale_timeout() -> i64 {
    30
}
fn default_retention_hours() -> i64 {
    domain::models::EXPORT_JOB_EXPIRY_HOURS
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("data/exports")
}
fn default_compression() -> String {
    "deflated".to_string()
}
fn default_storage_provider() -> String {
    "local".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("data/documents")
}
fn default_http_connect_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_cleanup_interval() -> u64 {
    300
}
fn default_stale_sweep_interval() -> u64 {
    60
}
fn default_jitter() -> u64 {
    10
}
fn default_shutdown_timeout() -> u64 {
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
    /// 3. Environment variables with EXPORT__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("EXPORT").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files (which may not be accessible during tests).
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        // Embed defaults directly to avoid file system dependency in tests
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            max_body_size = 1048576

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [export]
            max_active_jobs_per_user = 2
            fetch_concurrency = 4
            fetch_timeout_secs = 30
            write_buffer_entries = 8
            max_documents = 1000
            max_total_size_bytes = 2147483648
            date_span_warning_days = 730
            citizen_warning_threshold = 100
            request_warning_threshold = 50
            page_size = 100
            stale_timeout_minutes = 30
            retention_hours = 24
            archive_dir = "data/exports"
            compression = "deflated"

            [storage]
            provider = "local"
            local_root = "data/documents"

            [scheduler]
            enabled = false
            cleanup_interval_secs = 300
            stale_sweep_interval_secs = 60
            jitter_secs = 0
            shutdown_timeout_secs = 5
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "EXPORT__DATABASE__URL environment variable must be set".to_string(),
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

        let export = &self.export;
        if export.max_active_jobs_per_user < 1 {
            return Err(ConfigValidationError::InvalidValue(
                "export.max_active_jobs_per_user must be at least 1".to_string(),
            ));
        }
        if export.fetch_concurrency == 0 || export.write_buffer_entries == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.fetch_concurrency and export.write_buffer_entries must be at least 1"
                    .to_string(),
            ));
        }
        if export.page_size == 0 || export.max_documents < 1 || export.max_total_size_bytes < 1 {
            return Err(ConfigValidationError::InvalidValue(
                "export.page_size, export.max_documents and export.max_total_size_bytes must be positive"
                    .to_string(),
            ));
        }
        if export.fetch_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.fetch_timeout_secs cannot be 0".to_string(),
            ));
        }
        // A fetch that may outlive the whole job budget would never time out.
        if export.fetch_timeout_secs as i64 >= export.stale_timeout_minutes * 60 {
            return Err(ConfigValidationError::InvalidValue(
                "export.fetch_timeout_secs must be shorter than export.stale_timeout_minutes"
                    .to_string(),
            ));
        }
        if export.retention_hours * 60 <= export.stale_timeout_minutes {
            return Err(ConfigValidationError::InvalidValue(
                "export.retention_hours must exceed export.stale_timeout_minutes".to_string(),
            ));
        }
        if !matches!(export.compression.as_str(), "stored" | "deflated") {
            return Err(ConfigValidationError::InvalidValue(format!(
                "Unknown export.compression '{}'; expected stored or deflated",
                export.compression
            )));
        }
        if let Some(level) = export.compression_level {
            if export.compression == "deflated" && !(1..=9).contains(&level) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "export.compression_level {} is not a deflate level; expected 1 to 9",
                    level
                )));
            }
        }

        match self.storage.provider.as_str() {
            "local" => {}
            "http" => {
                if self.storage.http_base_url.is_empty() {
                    return Err(ConfigValidationError::MissingRequired(
                        "storage.http_base_url is required for the http provider".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "Unknown storage.provider '{}'; expected local or http",
                    other
                )));
            }
        }

        if self.scheduler.cleanup_interval_secs == 0 || self.scheduler.stale_sweep_interval_secs == 0
        {
            return Err(ConfigValidationError::InvalidValue(
                "Scheduler intervals cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
