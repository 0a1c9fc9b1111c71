//! Pipeline orchestrator: discovery → extraction → storage.
//!
//! One `run()` is one analysis session covering one vehicle, or two when
//! comparing. Per vehicle:
//!   1. Candidate URLs come from the configured search provider, or from a
//!      URL-list file, and are filtered down to sale listings.
//!   2. The fallback orchestrator extracts them (real first, synthetic when the
//!      real batch is not good enough).
//!   3. Usable ads are upserted by link; re-running never duplicates rows.

pub mod batch;
pub mod fallback;

use crate::classifier::filter_sale_urls;
use crate::config::AppConfig;
use crate::discovery::{build_provider, discover, SearchProvider, TemplateSearch};
use crate::loader::load_url_list;
use crate::models::{AdRecord, CandidateUrl};
use crate::scoring::fields_extracted;
use crate::scraper::ExtractionEngine;
use crate::storage::{BatchUpsertReport, Repository};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use self::fallback::{BatchMode, FallbackConfig, FallbackOrchestrator};

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub vehicle: String,
    pub compare_with: Option<String>,
    pub urls_file: Option<PathBuf>,
    pub limit: usize,
}

impl RunRequest {
    fn vehicles(&self) -> Vec<&str> {
        std::iter::once(self.vehicle.as_str())
            .chain(self.compare_with.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleSummary {
    pub vehicle: String,
    pub candidates: usize,
    pub mode: BatchMode,
    pub quality_score: f64,
    pub successful: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Present fields summed over the stored ads, out of 5 per ad.
    pub fields_extracted: usize,
    pub recommendation: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub vehicles: Vec<VehicleSummary>,
    pub ads: Vec<AdRecord>,
    pub storage: BatchUpsertReport,
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let repo = Repository::open(&self.config.storage.db_path).context("Failed to open DuckDB")?;
        self.run_with(&repo, request).await
    }

    pub async fn run_with(&self, repo: &Repository, request: RunRequest) -> Result<RunReport> {
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let provider: Box<dyn SearchProvider> = if self.config.pipeline.force_synthetic {
            Box::new(TemplateSearch)
        } else {
            build_provider(&self.config)?
        };

        let session_id = repo
            .begin_session(&request.vehicle, request.compare_with.as_deref())
            .context("Failed to start analysis session")?;
        info!("=== Session {} ===", session_id);

        let mut vehicles = Vec::new();
        let mut ads = Vec::new();
        let mut storage = BatchUpsertReport::default();

        for vehicle in request.vehicles() {
            info!("=== {} ===", vehicle);
            let candidates = match self.candidates(provider.as_ref(), vehicle, &request).await {
                Ok(c) => c,
                Err(e) => {
                    repo.finish_session(&session_id, &storage, Some(&format!("{:#}", e))).ok();
                    return Err(e);
                }
            };
            let urls: Vec<String> = candidates.iter().map(|c| c.as_str().to_string()).collect();

            let engine = ExtractionEngine::new(&self.config.scraper, Some(vehicle));
            let orchestrator = FallbackOrchestrator::new(engine, FallbackConfig::from(&self.config.pipeline));
            let outcome = orchestrator.extract_with_fallback(&urls).await;

            let usable: Vec<_> = outcome.ads.iter().filter(|a| !a.is_error()).cloned().collect();
            let skipped = outcome.ads.len() - usable.len();
            if skipped > 0 {
                warn!("{}: {} failed pages not stored", vehicle, skipped);
            }

            storage.merge(repo.upsert_batch(&usable, Some(&session_id), Some(vehicle)));
            ads.extend(usable.iter().map(|a| AdRecord::from_ad(a, Some(&session_id), Some(vehicle))));

            info!(
                "{}: {} ads ({:?}, quality {:.2})",
                vehicle,
                usable.len(),
                outcome.mode,
                outcome.quality_score
            );
            vehicles.push(VehicleSummary {
                vehicle: vehicle.to_string(),
                candidates: urls.len(),
                mode: outcome.mode,
                quality_score: outcome.quality_score,
                successful: outcome.successful,
                failed: outcome.failed,
                rejected: outcome.rejected,
                fields_extracted: usable.iter().map(fields_extracted).sum(),
                recommendation: outcome.recommendation().to_string(),
                errors: outcome.errors,
            });
        }

        if ads.is_empty() {
            repo.finish_session(&session_id, &storage, Some("no ads extracted")).ok();
            bail!("No ads could be extracted for {}", request.vehicles().join(" / "));
        }

        repo.finish_session(&session_id, &storage, None)?;
        info!(
            "=== Done: {} ads | {} new | {} duplicate | {} failed ===",
            ads.len(),
            storage.created,
            storage.duplicates,
            storage.failed.len()
        );

        Ok(RunReport { session_id, vehicles, ads, storage })
    }

    async fn candidates(
        &self,
        provider: &dyn SearchProvider,
        vehicle: &str,
        request: &RunRequest,
    ) -> Result<Vec<CandidateUrl>> {
        let limit = request.limit.max(1);
        match &request.urls_file {
            Some(path) => {
                let (mut sale, rejected) = filter_sale_urls(load_url_list(path)?);
                if !rejected.is_empty() {
                    info!("Dropped {} non-sale URLs from {:?}", rejected.len(), path);
                }
                sale.truncate(limit);
                Ok(sale)
            }
            None => Ok(discover(provider, vehicle, limit).await),
        }
    }
}
