use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub use crate::logging::LoggingConfig;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub render: RenderConfig,
    pub parser: ParserConfig,
    pub classifier: ClassifierConfig,
    pub pagination: PaginationConfig,
    pub preview: PreviewConfig,
    pub storage: StorageConfig,
    #[cfg(feature = "api")]
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Static HTTP fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_redirects: usize,
    pub accept_language: String,
    pub user_agents: Vec<String>,
}

/// Headless rendering and the session pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub enabled: bool,
    pub pool_size: usize,
    pub timeout_ms: u64,
    pub wait_selector_timeout_ms: u64,
    pub idle_wait_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserBackend {
    InProcess,
    Subprocess,
}

/// Structural parser selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub backend: ParserBackend,
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

/// Thresholds for the render-mode heuristic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub min_body_text_chars: usize,
    pub min_text_ratio: f64,
    pub ratio_min_html_bytes: usize,
    pub script_tag_threshold: usize,
    pub spa_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_max_pages: usize,
    pub hard_max_pages: usize,
    pub per_page_timeout_ms: u64,
    pub inter_page_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub sample_count: usize,
    pub sample_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[cfg(feature = "api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size_mb: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
            max_retries: 2,
            retry_delay_ms: 500,
            max_redirects: 5,
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            ],
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(feature = "browser"),
            pool_size: 2,
            timeout_ms: 90_000,
            wait_selector_timeout_ms: 30_000,
            idle_wait_ms: 2_000,
            viewport_width: 1920,
            viewport_height: 1080,
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: ParserBackend::InProcess,
            program: None,
            args: Vec::new(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_body_text_chars: 200,
            min_text_ratio: 0.02,
            ratio_min_html_bytes: 20_000,
            script_tag_threshold: 10,
            spa_markers: vec![
                r#"id="app""#.to_string(),
                r#"id="root""#.to_string(),
                "__NEXT_DATA__".to_string(),
                "__NUXT__".to_string(),
                "ng-version".to_string(),
                "data-reactroot".to_string(),
                "data-v-app".to_string(),
                "data-server-rendered".to_string(),
            ],
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_max_pages: 50,
            hard_max_pages: 500,
            per_page_timeout_ms: 20_000,
            inter_page_delay_ms: 500,
        }
    }
}

impl PaginationConfig {
    pub fn per_page_timeout(&self) -> Duration {
        Duration::from_millis(self.per_page_timeout_ms)
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 200,
            sample_count: 5,
            sample_max_chars: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: get_data_directory().join("selector-crawler.db"),
        }
    }
}

#[cfg(feature = "api")]
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_request_size_mb: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from default locations
    pub async fn load() -> Result<Self> {
        let config_path = get_config_path();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path).await?
        } else {
            info!("No configuration file found, using defaults");
            let config = Self::default();
            config.save().await?;
            config
        };

        ConfigOverrides::apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to default location
    pub async fn save(&self) -> Result<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_path, content).await?;

        info!("Configuration saved to: {}", config_path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetch.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("fetch.request_timeout_ms must be > 0"));
        }

        if self.fetch.user_agents.is_empty() {
            return Err(anyhow::anyhow!("At least one user agent must be configured"));
        }

        if self.render.pool_size == 0 {
            return Err(anyhow::anyhow!("render.pool_size must be > 0"));
        }

        if self.render.timeout_ms == 0 {
            return Err(anyhow::anyhow!("render.timeout_ms must be > 0"));
        }

        if self.parser.backend == ParserBackend::Subprocess && self.parser.program.is_none() {
            return Err(anyhow::anyhow!("parser.program is required for the subprocess backend"));
        }

        if self.parser.timeout_ms == 0 {
            return Err(anyhow::anyhow!("parser.timeout_ms must be > 0"));
        }

        if !(0.0..=1.0).contains(&self.classifier.min_text_ratio) {
            return Err(anyhow::anyhow!("classifier.min_text_ratio must be between 0.0 and 1.0"));
        }

        if self.pagination.default_max_pages == 0 {
            return Err(anyhow::anyhow!("pagination.default_max_pages must be > 0"));
        }

        if self.pagination.hard_max_pages < self.pagination.default_max_pages {
            return Err(anyhow::anyhow!("pagination.hard_max_pages must be >= default_max_pages"));
        }

        if self.pagination.per_page_timeout_ms == 0 {
            return Err(anyhow::anyhow!("pagination.per_page_timeout_ms must be > 0"));
        }

        if self.preview.max_limit == 0 || self.preview.default_limit > self.preview.max_limit {
            return Err(anyhow::anyhow!("preview limits must satisfy 0 < default_limit <= max_limit"));
        }

        #[cfg(feature = "api")]
        {
            if self.api.port == 0 {
                return Err(anyhow::anyhow!("API port must be > 0"));
            }
        }

        Ok(())
    }
}

/// Get the default data directory
fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("com", "selector-crawler", "scc")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "selector-crawler", "scc")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        if let Some(timeout) = env_parse::<u64>("SCC_FETCH_TIMEOUT_MS") {
            config.fetch.request_timeout_ms = timeout;
        }

        if let Ok(enabled) = std::env::var("SCC_RENDER_ENABLED") {
            config.render.enabled = enabled.to_lowercase() == "true";
        }

        if let Some(pool_size) = env_parse::<usize>("SCC_RENDER_POOL_SIZE") {
            config.render.pool_size = pool_size;
        }

        if let Ok(program) = std::env::var("SCC_PARSER_PROGRAM") {
            config.parser.backend = ParserBackend::Subprocess;
            config.parser.program = Some(PathBuf::from(program));
        }

        if let Some(max_pages) = env_parse::<usize>("SCC_MAX_PAGES") {
            config.pagination.default_max_pages = max_pages;
        }

        if let Ok(db_path) = std::env::var("SCC_DB_PATH") {
            config.storage.path = PathBuf::from(db_path);
        }

        #[cfg(feature = "api")]
        {
            if let Ok(api_host) = std::env::var("SCC_API_HOST") {
                config.api.host = api_host;
            }

            if let Some(api_port) = env_parse::<u16>("SCC_API_PORT") {
                config.api.port = api_port;
            }
        }

        if let Ok(log_level) = std::env::var("SCC_LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
