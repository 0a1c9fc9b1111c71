use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// HTTP fetching of listing pages
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fixed pause before every request; zero disables it.
    #[serde(default)]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Batch extraction and fallback policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    #[serde(default = "default_quality_floor")]
    pub quality_floor: f64,

    #[serde(default)]
    pub force_synthetic: bool,

    #[serde(default = "default_true")]
    pub filter_sales: bool,

    #[serde(default = "default_max_urls")]
    pub max_urls: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    /// Scrape the listing sites' own search pages.
    Sites,
    /// Google results via serper.dev.
    Serper,
    /// Offline slug URLs, no network.
    Template,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_provider")]
    pub provider: SearchProviderKind,

    #[serde(default)]
    pub serper_api_key: Option<String>,

    #[serde(default = "default_serper_url")]
    pub serper_url: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_timeout_secs() -> u64 {
    30
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/ads.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    3
}
fn default_batch_timeout_secs() -> u64 {
    90
}
fn default_quality_floor() -> f64 {
    0.3
}
fn default_max_urls() -> usize {
    crate::discovery::DEFAULT_LIMIT
}
fn default_provider() -> SearchProviderKind {
    SearchProviderKind::Sites
}
fn default_serper_url() -> String {
    "https://google.serper.dev/search".to_string()
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_delay_ms: 0,
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_timeout_secs: default_batch_timeout_secs(),
            quality_floor: default_quality_floor(),
            force_synthetic: false,
            filter_sales: true,
            max_urls: default_max_urls(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            serper_api_key: None,
            serper_url: default_serper_url(),
        }
    }
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("ADH").separator("__"))
            .build()?;

        let mut app_cfg: AppConfig = match cfg.try_deserialize() {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid configuration ({}), using defaults", e);
                AppConfig::default()
            }
        };

        if app_cfg.search.serper_api_key.is_none() {
            app_cfg.search.serper_api_key = std::env::var("SERPER_API_KEY").ok();
        }

        Ok(app_cfg.sanitized())
    }

    /// Clamp values that would make the pipeline misbehave.
    pub fn sanitized(mut self) -> Self {
        if self.pipeline.concurrency == 0 {
            self.pipeline.concurrency = 1;
        }
        if !self.pipeline.quality_floor.is_finite() {
            self.pipeline.quality_floor = default_quality_floor();
        }
        self.pipeline.quality_floor = self.pipeline.quality_floor.clamp(0.0, 1.0);
        if self.pipeline.max_urls == 0 {
            self.pipeline.max_urls = default_max_urls();
        }
        if self.scraper.timeout_secs == 0 {
            self.scraper.timeout_secs = default_timeout_secs();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.concurrency, 3);
        assert_eq!(cfg.pipeline.quality_floor, 0.3);
        assert_eq!(cfg.scraper.timeout(), Duration::from_secs(30));
        assert!(cfg.pipeline.filter_sales);
        assert!(!cfg.pipeline.force_synthetic);
        assert_eq!(cfg.search.provider, SearchProviderKind::Sites);
    }

    #[test]
    fn sanitized_clamps_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.concurrency = 0;
        cfg.pipeline.quality_floor = 4.0;
        cfg.scraper.timeout_secs = 0;
        let cfg = cfg.sanitized();
        assert_eq!(cfg.pipeline.concurrency, 1);
        assert_eq!(cfg.pipeline.quality_floor, 1.0);
        assert_eq!(cfg.scraper.timeout_secs, 30);
    }

    #[test]
    fn non_finite_quality_floor_resets_to_default() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut cfg = AppConfig::default();
            cfg.pipeline.quality_floor = bad;
            cfg.pipeline.max_urls = 0;
            let cfg = cfg.sanitized();
            assert_eq!(cfg.pipeline.quality_floor, 0.3, "{}", bad);
            assert_eq!(cfg.pipeline.max_urls, 5);
        }
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nconcurrency = 5\n[search]\nprovider = \"template\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.pipeline.concurrency, 5);
        assert_eq!(cfg.pipeline.max_urls, 5);
        assert_eq!(cfg.search.provider, SearchProviderKind::Template);
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/ads.duckdb"));
    }
}
