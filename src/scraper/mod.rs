pub mod cleaner;
pub mod http_client;
pub mod parsers;
pub mod synthetic;

use crate::config::ScraperConfig;
use crate::models::{ExtractionMethod, RawExtraction, RawField};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use self::http_client::HttpClient;
use self::parsers::parse_ad_page;
use self::synthetic::SyntheticGenerator;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Something that turns one ad URL into raw fields. Implementations never
/// fail outright: problems are reported inside the `RawExtraction`.
#[async_trait]
pub trait AdSource: Send + Sync {
    async fn extract(&self, url: &str) -> RawExtraction;
    fn method(&self) -> ExtractionMethod;
}

// ── Real pages ────────────────────────────────────────────────────────────────

pub struct HttpAdScraper {
    config: ScraperConfig,
}

impl HttpAdScraper {
    pub fn new(config: &ScraperConfig) -> Self {
        Self { config: config.clone() }
    }
}

#[async_trait]
impl AdSource for HttpAdScraper {
    async fn extract(&self, url: &str) -> RawExtraction {
        // A client per call keeps concurrent workers from sharing a pool.
        let client = match HttpClient::new(&self.config) {
            Ok(c) => c,
            Err(e) => return RawExtraction::failed(url, RawField::Error, format!("{:#}", e)),
        };

        match client.get_text(url).await {
            Ok(html) => {
                let raw = parse_ad_page(&html, url);
                let found = [&raw.title, &raw.price, &raw.location, &raw.mileage, &raw.year]
                    .iter()
                    .filter(|f| f.is_found())
                    .count();
                debug!("{}: {}/5 fields, title={}", url, found, raw.title.as_str());
                raw
            }
            Err(e) if e.is_timeout() => {
                warn!("{}", e);
                RawExtraction::failed(url, RawField::Timeout, e.to_string())
            }
            Err(e) => {
                warn!("{}", e);
                RawExtraction::failed(url, RawField::Error, e.to_string())
            }
        }
    }

    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Real
    }
}

// ── Synthetic ─────────────────────────────────────────────────────────────────

pub struct SyntheticSource {
    generator: SyntheticGenerator,
}

impl SyntheticSource {
    pub fn new(vehicle: Option<&str>) -> Self {
        Self { generator: SyntheticGenerator::new(vehicle) }
    }
}

#[async_trait]
impl AdSource for SyntheticSource {
    async fn extract(&self, url: &str) -> RawExtraction {
        self.generator.generate(url)
    }

    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Synthetic
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Real,
    Synthetic,
}

/// Both strategies behind one handle; the caller picks per call.
#[derive(Clone)]
pub struct ExtractionEngine {
    real: Arc<dyn AdSource>,
    synthetic: Arc<dyn AdSource>,
}

impl ExtractionEngine {
    pub fn new(config: &ScraperConfig, vehicle: Option<&str>) -> Self {
        Self::with_sources(
            Arc::new(HttpAdScraper::new(config)),
            Arc::new(SyntheticSource::new(vehicle)),
        )
    }

    pub fn with_sources(real: Arc<dyn AdSource>, synthetic: Arc<dyn AdSource>) -> Self {
        Self { real, synthetic }
    }

    pub fn source(&self, strategy: Strategy) -> Arc<dyn AdSource> {
        match strategy {
            Strategy::Real => Arc::clone(&self.real),
            Strategy::Synthetic => Arc::clone(&self.synthetic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> ScraperConfig {
        ScraperConfig {
            timeout_secs: 2,
            request_delay_ms: 0,
            jitter_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unreachable_page_is_error_tagged_not_not_found() {
        let scraper = HttpAdScraper::new(&quiet_config());
        let raw = scraper.extract("http://127.0.0.1:9/en/ad/aqua-1").await;
        assert!(raw.error.is_some());
        assert_eq!(raw.title, RawField::Error);
        assert_eq!(raw.price, RawField::Error);
        assert_eq!(raw.method, ExtractionMethod::Real);
    }

    #[tokio::test]
    async fn silent_server_is_timeout_tagged() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever answering.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ScraperConfig { timeout_secs: 1, ..quiet_config() };
        let raw = HttpAdScraper::new(&config)
            .extract(&format!("http://{}/en/ad/aqua-1", addr))
            .await;
        server.abort();

        assert_eq!(raw.title, RawField::Timeout);
        assert_eq!(raw.year, RawField::Timeout);
        assert!(raw.error.as_deref().is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn engine_selects_strategy_per_call() {
        let engine = ExtractionEngine::new(&quiet_config(), Some("Toyota Aqua"));
        let raw = engine
            .source(Strategy::Synthetic)
            .extract("https://ikman.lk/en/ad/toyota-aqua-2018-for-sale-1")
            .await;
        assert_eq!(raw.method, ExtractionMethod::Synthetic);
        assert!(raw.title.is_found());
        assert_eq!(engine.source(Strategy::Real).method(), ExtractionMethod::Real);
    }
}
