use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the material tracker
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Remote store connection settings
    pub store: StoreConfig,
    /// Query cache settings
    pub cache: CacheConfig,
    /// Read retry policy
    pub retry: RetryConfig,
    /// Page size bounds
    pub pagination: PaginationConfig,
    /// Export limits
    pub export: ExportConfig,
    /// Static credentials for the command-line client
    pub auth: AuthConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// PostgREST base URL, e.g. https://project.example.com
    pub base_url: String,
    /// Anonymous API key sent as `apikey`
    pub api_key: Option<String>,
    /// Per-call timeout; exceeding it is a network timeout
    pub request_timeout_ms: u64,
    /// Outgoing request quota
    pub requests_per_second: u32,
    /// Burst capacity on top of the steady quota
    pub burst: u32,
    /// Surface requester-lookup failures instead of degrading to "Unknown"
    pub strict_requester_lookup: bool,
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
            requests_per_second: 10,
            burst: 20,
            strict_requester_lookup: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries younger than this are served without a background refresh
    pub stale_time_secs: u64,
    /// Idle entries are evicted after this long
    pub gc_time_secs: u64,
    /// Upper bound on cached list pages plus single requests
    pub max_entries: u64,
}

impl CacheConfig {
    pub fn stale_time(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_time_secs as i64)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_time_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: 30,
            gc_time_secs: 300,
            max_entries: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_page_size: usize,
    pub min_page_size: usize,
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            min_page_size: 5,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Hard cap on rows handed to the export renderer
    pub max_rows: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { max_rows: 10_000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub access_token: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (material-tracker.toml, .material-tracker-rc)
    /// 3. Environment variables (prefixed with MATERIAL_TRACKER__)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("material-tracker.toml").exists() {
            builder = builder.add_source(File::with_name("material-tracker"));
        }

        if Path::new(".material-tracker-rc").exists() {
            builder = builder.add_source(
                File::with_name(".material-tracker-rc").format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("MATERIAL_TRACKER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut tracker_config: TrackerConfig = config.try_deserialize()?;

        // Conventional hosted-backend variables as a fallback
        if tracker_config.store.api_key.is_none() {
            if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
                tracker_config.store.api_key = Some(key);
            }
        }

        Ok(tracker_config)
    }

    /// Load from an explicit TOML file, ignoring the working directory
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).format(config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
