//! Real extraction with an all-or-nothing synthetic fallback.
//!
//! A batch is either entirely real or entirely synthetic. When the real pass
//! averages below the quality floor, or produced nothing usable, every real
//! record is discarded and the same URLs are run through the synthetic source.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::config::PipelineConfig;
use crate::models::{ExtractionMethod, NormalizedAd, Quality, QualityTier, Verdict, ERROR, TIMEOUT};
use crate::pipeline::batch::{BatchError, BatchResult, BatchRunner};
use crate::scoring::{mean_confidence, scored};
use crate::scraper::cleaner::normalize;
use crate::scraper::{AdSource, ExtractionEngine, Strategy};

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub quality_floor: f64,
    pub max_concurrency: usize,
    pub batch_timeout: Duration,
    pub force_synthetic: bool,
    pub filter_sales: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        (&PipelineConfig::default()).into()
    }
}

impl From<&PipelineConfig> for FallbackConfig {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            quality_floor: cfg.quality_floor,
            max_concurrency: cfg.concurrency,
            batch_timeout: cfg.batch_timeout(),
            force_synthetic: cfg.force_synthetic,
            filter_sales: cfg.filter_sales,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    Real,
    FallbackSynthetic,
    ForcedSynthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DiscardReason {
    BelowQualityFloor { quality: f64, floor: f64 },
    NoSuccessfulExtractions,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::BelowQualityFloor { quality, floor } => {
                write!(f, "mean confidence {:.2} below floor {:.2}", quality, floor)
            }
            DiscardReason::NoSuccessfulExtractions => f.write_str("no successful extractions"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackOutcome {
    pub ads: Vec<NormalizedAd>,
    pub mode: BatchMode,
    pub quality_score: f64,
    pub discard_reason: Option<DiscardReason>,
    pub total_urls: usize,
    pub successful: usize,
    pub failed: usize,
    pub rejected: usize,
    pub errors: Vec<String>,
}

impl FallbackOutcome {
    pub fn recommendation(&self) -> &'static str {
        if self.quality_score >= 0.8 {
            "High quality data extracted. Proceed with analysis."
        } else if self.quality_score >= 0.5 {
            "Moderate quality data. Consider manual review of missing fields."
        } else if self.successful > 0 {
            "Low quality extraction. Recommend re-trying with different parameters."
        } else {
            "Extraction failed. Check URLs and network connectivity."
        }
    }
}

pub struct FallbackOrchestrator {
    engine: ExtractionEngine,
    config: FallbackConfig,
}

impl FallbackOrchestrator {
    pub fn new(engine: ExtractionEngine, config: FallbackConfig) -> Self {
        Self { engine, config }
    }

    pub async fn extract_with_fallback(&self, urls: &[String]) -> FallbackOutcome {
        if self.config.force_synthetic {
            info!("Synthetic extraction forced for {} URLs", urls.len());
            return self.synthetic_pass(urls, BatchMode::ForcedSynthetic, None, Vec::new()).await;
        }

        let mut ads = self.extract_all(urls, Strategy::Real).await;

        let mut rejected = 0;
        if self.config.filter_sales {
            let before = ads.len();
            ads.retain(|ad| {
                ad.is_error() || classifier::classify(&ad.link, Some(&ad.title)) == Verdict::Sale
            });
            rejected = before - ads.len();
            if rejected > 0 {
                info!("Dropped {} non-sale ads after reading titles", rejected);
            }
        }

        let successful = ads.iter().filter(|a| !a.is_error()).count();
        let failed = ads.len() - successful;
        let quality = mean_confidence(&ads);
        let errors: Vec<String> = ads
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| format!("{}: {}", a.link, e)))
            .collect();

        let discard = if successful == 0 {
            Some(DiscardReason::NoSuccessfulExtractions)
        } else if quality < self.config.quality_floor {
            Some(DiscardReason::BelowQualityFloor {
                quality,
                floor: self.config.quality_floor,
            })
        } else {
            None
        };

        match discard {
            None => {
                info!(
                    "Real extraction kept: {} ads, quality {:.2} ({} failed, {} rejected)",
                    ads.len(),
                    quality,
                    failed,
                    rejected
                );
                FallbackOutcome {
                    ads,
                    mode: BatchMode::Real,
                    quality_score: quality,
                    discard_reason: None,
                    total_urls: urls.len(),
                    successful,
                    failed,
                    rejected,
                    errors,
                }
            }
            Some(reason) => {
                warn!("Discarding {} real ads: {}", ads.len(), reason);
                let mut outcome = self
                    .synthetic_pass(urls, BatchMode::FallbackSynthetic, Some(reason.clone()), errors)
                    .await;
                outcome
                    .errors
                    .push(format!("Fell back to synthetic data: {}", reason));
                outcome.rejected = rejected;
                outcome
            }
        }
    }

    async fn synthetic_pass(
        &self,
        urls: &[String],
        mode: BatchMode,
        reason: Option<DiscardReason>,
        errors: Vec<String>,
    ) -> FallbackOutcome {
        let ads = self.extract_all(urls, Strategy::Synthetic).await;
        let successful = ads.iter().filter(|a| !a.is_error()).count();
        FallbackOutcome {
            quality_score: mean_confidence(&ads),
            failed: ads.len() - successful,
            successful,
            ads,
            mode,
            discard_reason: reason,
            total_urls: urls.len(),
            rejected: 0,
            errors,
        }
    }

    /// Extract, normalize and score every URL with one strategy.
    pub async fn extract_all(&self, urls: &[String], strategy: Strategy) -> Vec<NormalizedAd> {
        let source = self.engine.source(strategy);
        let method = source.method();
        let runner = BatchRunner::new(self.config.max_concurrency, self.config.batch_timeout);
        debug!("{} {} URLs, {} at a time", method, urls.len(), runner.max_concurrency());

        let results = runner
            .run(urls.to_vec(), move |url| {
                let source: Arc<dyn AdSource> = Arc::clone(&source);
                async move {
                    let raw = source.extract(&url).await;
                    Ok::<_, anyhow::Error>(scored(normalize(&raw)))
                }
            })
            .await;
        results
            .into_iter()
            .map(|r| into_ad(r, method))
            .collect()
    }
}

fn into_ad(result: BatchResult<NormalizedAd>, method: ExtractionMethod) -> NormalizedAd {
    match result.outcome {
        Ok(ad) => ad,
        Err(e) => error_ad(result.url, method, &e),
    }
}

/// Placeholder for a unit that never produced an extraction.
fn error_ad(url: String, method: ExtractionMethod, err: &BatchError) -> NormalizedAd {
    let sentinel = match err {
        BatchError::TimedOut => TIMEOUT,
        _ => ERROR,
    };
    NormalizedAd {
        title: sentinel.to_string(),
        price: sentinel.to_string(),
        location: sentinel.to_string(),
        mileage: sentinel.to_string(),
        year: sentinel.to_string(),
        link: url,
        method,
        quality: Some(Quality { confidence: 0.0, tier: QualityTier::Poor }),
        error: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawExtraction, RawField};
    use crate::scraper::SyntheticSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Real-source stand-in driven by a plain function.
    struct StubSource {
        make: fn(&str) -> RawExtraction,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(make: fn(&str) -> RawExtraction) -> Arc<Self> {
            Arc::new(Self { make, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl AdSource for StubSource {
        async fn extract(&self, url: &str) -> RawExtraction {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.make)(url)
        }

        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::Real
        }
    }

    /// Never finishes for URLs ending in "-1".
    struct SlowSource;

    #[async_trait]
    impl AdSource for SlowSource {
        async fn extract(&self, url: &str) -> RawExtraction {
            if url.ends_with("-1") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            full(url)
        }

        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::Real
        }
    }

    fn full(url: &str) -> RawExtraction {
        RawExtraction {
            url: url.into(),
            title: RawField::Value("Toyota Aqua 2015 for sale".into()),
            price: RawField::Value("Rs. 4,250,000".into()),
            location: RawField::Value("Colombo".into()),
            mileage: RawField::Value("only 80".into()),
            year: RawField::Value("2015".into()),
            method: ExtractionMethod::Real,
            error: None,
        }
    }

    /// Scores 0.1: only the year is found.
    fn year_only(url: &str) -> RawExtraction {
        RawExtraction {
            url: url.into(),
            title: RawField::NotFound,
            price: RawField::NotFound,
            location: RawField::NotFound,
            mileage: RawField::NotFound,
            year: RawField::Value("2015".into()),
            method: ExtractionMethod::Real,
            error: None,
        }
    }

    fn unreachable(url: &str) -> RawExtraction {
        RawExtraction::failed(url, RawField::Error, "connection refused")
    }

    fn panics_on_third(url: &str) -> RawExtraction {
        if url.ends_with("-3") {
            panic!("bad markup");
        }
        full(url)
    }

    fn rental_titles(url: &str) -> RawExtraction {
        let mut raw = full(url);
        if url.ends_with("-1") {
            raw.title = RawField::Value("Toyota Aqua for rent - daily".into());
        }
        raw
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://ikman.lk/en/ad/aqua-{}", i)).collect()
    }

    fn orchestrator(real: Arc<StubSource>, config: FallbackConfig) -> FallbackOrchestrator {
        let engine = ExtractionEngine::with_sources(real, Arc::new(SyntheticSource::new(Some("Toyota Aqua"))));
        FallbackOrchestrator::new(engine, config)
    }

    #[tokio::test]
    async fn good_real_batch_is_kept() {
        let orch = orchestrator(StubSource::new(full), FallbackConfig::default());
        let out = orch.extract_with_fallback(&urls(4)).await;
        assert_eq!(out.mode, BatchMode::Real);
        assert_eq!(out.ads.len(), 4);
        assert!(out.ads.iter().all(|a| a.method == ExtractionMethod::Real));
        assert_eq!(out.quality_score, 1.0);
        assert_eq!(out.ads[0].mileage, "80,000 km");
        assert_eq!(out.ads[0].price, "4,250,000");
        assert!(out.discard_reason.is_none());
    }

    #[tokio::test]
    async fn low_quality_batch_falls_back_entirely() {
        let orch = orchestrator(StubSource::new(year_only), FallbackConfig::default());
        let input = urls(5);
        let out = orch.extract_with_fallback(&input).await;

        assert_eq!(out.mode, BatchMode::FallbackSynthetic);
        assert_eq!(out.ads.len(), input.len());
        assert!(out.ads.iter().all(|a| a.method == ExtractionMethod::Synthetic));
        assert_eq!(
            out.discard_reason,
            Some(DiscardReason::BelowQualityFloor { quality: 0.1, floor: 0.3 })
        );
        assert!(out.errors.iter().any(|e| e.contains("Fell back")));
        let mut links: Vec<_> = out.ads.iter().map(|a| a.link.clone()).collect();
        links.sort();
        let mut expected = input.clone();
        expected.sort();
        assert_eq!(links, expected);
    }

    #[tokio::test]
    async fn all_failures_fall_back() {
        let orch = orchestrator(StubSource::new(unreachable), FallbackConfig::default());
        let out = orch.extract_with_fallback(&urls(3)).await;
        assert_eq!(out.mode, BatchMode::FallbackSynthetic);
        assert_eq!(out.discard_reason, Some(DiscardReason::NoSuccessfulExtractions));
        assert_eq!(out.ads.len(), 3);
        assert!(out.errors.iter().any(|e| e.contains("connection refused")));
    }

    #[tokio::test]
    async fn forced_synthetic_never_touches_real_source() {
        let real = StubSource::new(full);
        let config = FallbackConfig { force_synthetic: true, ..Default::default() };
        let orch = orchestrator(Arc::clone(&real), config);
        let out = orch.extract_with_fallback(&urls(3)).await;
        assert_eq!(out.mode, BatchMode::ForcedSynthetic);
        assert_eq!(real.calls.load(Ordering::SeqCst), 0);
        assert!(out.ads.iter().all(|a| a.method == ExtractionMethod::Synthetic));
    }

    #[tokio::test]
    async fn one_panicking_page_leaves_the_rest() {
        let orch = orchestrator(StubSource::new(panics_on_third), FallbackConfig::default());
        let out = orch.extract_with_fallback(&urls(6)).await;
        assert_eq!(out.mode, BatchMode::Real);
        assert_eq!(out.ads.len(), 6);
        assert_eq!(out.successful, 5);
        assert_eq!(out.failed, 1);
        let bad = out.ads.iter().find(|a| a.is_error()).unwrap();
        assert!(bad.link.ends_with("-3"));
        assert_eq!(bad.title, "Error");
        assert_eq!(bad.quality.map(|q| q.confidence), Some(0.0));
    }

    #[tokio::test]
    async fn page_past_batch_deadline_reads_timeout() {
        let engine = ExtractionEngine::with_sources(
            Arc::new(SlowSource),
            Arc::new(SyntheticSource::new(Some("Toyota Aqua"))),
        );
        let config = FallbackConfig { batch_timeout: Duration::from_millis(300), ..Default::default() };
        let orch = FallbackOrchestrator::new(engine, config);

        let out = orch.extract_with_fallback(&urls(4)).await;
        assert_eq!(out.mode, BatchMode::Real);
        assert_eq!((out.successful, out.failed), (3, 1));

        let slow = out.ads.iter().find(|a| a.link.ends_with("-1")).unwrap();
        assert!(slow.is_error());
        assert_eq!(slow.title, "Timeout");
        assert_eq!(slow.price, "Timeout");
        assert_eq!(slow.year, "Timeout");
        assert_eq!(slow.error.as_deref(), Some("batch deadline exceeded"));
    }

    #[tokio::test]
    async fn rental_titles_are_filtered() {
        let orch = orchestrator(StubSource::new(rental_titles), FallbackConfig::default());
        let out = orch.extract_with_fallback(&urls(3)).await;
        assert_eq!(out.mode, BatchMode::Real);
        assert_eq!(out.rejected, 1);
        assert_eq!(out.ads.len(), 2);
        assert!(out.ads.iter().all(|a| !a.title.contains("rent")));
    }

    #[test]
    fn recommendation_tracks_quality() {
        let mut out = FallbackOutcome {
            ads: vec![],
            mode: BatchMode::Real,
            quality_score: 0.85,
            discard_reason: None,
            total_urls: 0,
            successful: 1,
            failed: 0,
            rejected: 0,
            errors: vec![],
        };
        assert!(out.recommendation().starts_with("High"));
        out.quality_score = 0.6;
        assert!(out.recommendation().starts_with("Moderate"));
        out.quality_score = 0.2;
        assert!(out.recommendation().starts_with("Low"));
        out.successful = 0;
        assert!(out.recommendation().starts_with("Extraction failed"));
    }
}
