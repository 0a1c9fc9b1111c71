use crate::error::StoreError;
use crate::models::{AnalysisSession, NormalizedAd, StoredAd};
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::{params, params_from_iter, Connection, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_ads_id START 1;

CREATE TABLE IF NOT EXISTS ads (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_ads_id'),
    title               VARCHAR NOT NULL,
    price               VARCHAR NOT NULL,
    location            VARCHAR NOT NULL,
    mileage             VARCHAR NOT NULL,
    year                VARCHAR NOT NULL,
    -- One row per listing, across all sessions
    link                VARCHAR NOT NULL UNIQUE,
    analysis_session_id VARCHAR,
    vehicle_name        VARCHAR,
    confidence          DOUBLE,
    quality_tier        VARCHAR,
    extraction_method   VARCHAR NOT NULL DEFAULT 'real',
    created_at          TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS analysis_sessions (
    id              VARCHAR PRIMARY KEY,
    vehicle1        VARCHAR NOT NULL,
    vehicle2        VARCHAR,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    ads_created     BIGINT DEFAULT 0,
    ads_duplicate   BIGINT DEFAULT 0,
    ads_failed      BIGINT DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ads_session ON ads (analysis_session_id);
CREATE INDEX IF NOT EXISTS idx_ads_vehicle ON ads (vehicle_name);
"#;

const AD_COLUMNS: &str = "id, title, price, location, mileage, year, link, analysis_session_id, \
                          vehicle_name, confidence, quality_tier, extraction_method, created_at";

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(i64),
    Duplicate,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchUpsertReport {
    pub created: usize,
    pub duplicates: usize,
    pub failed: Vec<(String, String)>,
}

impl BatchUpsertReport {
    pub fn record(&mut self, link: &str, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created(_) => self.created += 1,
            UpsertOutcome::Duplicate => self.duplicates += 1,
            UpsertOutcome::Failed(reason) => self.failed.push((link.to_string(), reason)),
        }
    }

    pub fn merge(&mut self, other: BatchUpsertReport) {
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.failed.extend(other.failed);
    }
}

fn map_ad(r: &Row<'_>) -> duckdb::Result<StoredAd> {
    Ok(StoredAd {
        id: r.get(0)?,
        title: r.get(1)?,
        price: r.get(2)?,
        location: r.get(3)?,
        mileage: r.get(4)?,
        year: r.get(5)?,
        link: r.get(6)?,
        analysis_session_id: r.get(7)?,
        vehicle_name: r.get(8)?,
        confidence: r.get(9)?,
        quality_tier: r.get(10)?,
        extraction_method: r.get(11)?,
        created_at: r.get(12)?,
    })
}

fn map_session(r: &Row<'_>) -> duckdb::Result<AnalysisSession> {
    Ok(AnalysisSession {
        id: r.get(0)?,
        vehicle1: r.get(1)?,
        vehicle2: r.get(2)?,
        started_at: r.get(3)?,
        finished_at: r.get(4)?,
        status: r.get(5)?,
        ads_created: r.get(6)?,
        ads_duplicate: r.get(7)?,
        ads_failed: r.get(8)?,
        error_msg: r.get(9)?,
    })
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Sole writer of the unique-link invariant. The connection is serialized
/// behind a mutex so concurrent writers see each other's rows.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.lock()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Ads ───────────────────────────────────────────────────────────────────

    /// Insert a new row. Fails on an existing link.
    pub fn create(
        &self,
        ad: &NormalizedAd,
        session_id: Option<&str>,
        vehicle_name: Option<&str>,
    ) -> Result<StoredAd, StoreError> {
        let conn = self.lock()?;
        let id = insert_ad(&conn, ad, session_id, vehicle_name)?;
        let stored = conn.query_row(
            &format!("SELECT {AD_COLUMNS} FROM ads WHERE id = ?"),
            params![id],
            map_ad,
        )?;
        Ok(stored)
    }

    pub fn find_by_link(&self, link: &str) -> Result<Option<StoredAd>, StoreError> {
        let conn = self.lock()?;
        find_link(&conn, link.trim())
    }

    /// Idempotent by link: an existing link is reported, never rewritten.
    pub fn upsert(
        &self,
        ad: &NormalizedAd,
        session_id: Option<&str>,
        vehicle_name: Option<&str>,
    ) -> UpsertOutcome {
        let link = ad.link.trim();
        if link.is_empty() {
            return UpsertOutcome::Failed("empty link".into());
        }

        match self.try_upsert(ad, session_id, vehicle_name) {
            Ok(outcome) => outcome,
            Err(e) if e.is_unique_violation() => {
                debug!("{} stored concurrently, treating as duplicate", link);
                UpsertOutcome::Duplicate
            }
            Err(e) => {
                warn!("upsert {}: {}", link, e);
                UpsertOutcome::Failed(e.to_string())
            }
        }
    }

    fn try_upsert(
        &self,
        ad: &NormalizedAd,
        session_id: Option<&str>,
        vehicle_name: Option<&str>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some(existing) = find_link(&tx, ad.link.trim())? {
            debug!("{} already stored as #{}", existing.link, existing.id);
            return Ok(UpsertOutcome::Duplicate);
        }

        let id = insert_ad(&tx, ad, session_id, vehicle_name)?;
        tx.commit()?;
        Ok(UpsertOutcome::Created(id))
    }

    /// Each record commits on its own; one failure does not undo the others.
    pub fn upsert_batch(
        &self,
        ads: &[NormalizedAd],
        session_id: Option<&str>,
        vehicle_name: Option<&str>,
    ) -> BatchUpsertReport {
        let mut report = BatchUpsertReport::default();
        for ad in ads {
            let outcome = self.upsert(ad, session_id, vehicle_name);
            report.record(&ad.link, outcome);
        }
        info!(
            "Stored {} new | {} duplicate | {} failed",
            report.created,
            report.duplicates,
            report.failed.len()
        );
        report
    }

    pub fn count_by_session(&self, session_id: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM ads WHERE analysis_session_id = ?",
            params![session_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn count_by_session_and_vehicle(&self, session_id: &str, vehicle: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM ads WHERE analysis_session_id = ? AND vehicle_name = ?",
            params![session_id, vehicle],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn list_by_session(&self, session_id: &str, vehicle: Option<&str>) -> Result<Vec<StoredAd>, StoreError> {
        self.list_ads(Some(session_id), vehicle)
    }

    /// Ads newest first, optionally narrowed to a session and/or vehicle.
    pub fn list_ads(&self, session_id: Option<&str>, vehicle: Option<&str>) -> Result<Vec<StoredAd>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(s) = session_id {
            clauses.push("analysis_session_id = ?");
            values.push(s);
        }
        if let Some(v) = vehicle {
            clauses.push("vehicle_name = ?");
            values.push(v);
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AD_COLUMNS} FROM ads{filter} ORDER BY created_at DESC, id DESC"
        ))?;
        let ads = stmt
            .query_map(params_from_iter(values), map_ad)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(ads)
    }

    pub fn ad_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM ads", [], |r| r.get(0))?)
    }

    // ── Analysis sessions ─────────────────────────────────────────────────────

    pub fn begin_session(&self, vehicle1: &str, vehicle2: Option<&str>) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO analysis_sessions (id, vehicle1, vehicle2, started_at, status) VALUES (?, ?, ?, ?, 'running')",
            params![id, vehicle1, vehicle2, Utc::now().naive_utc()],
        )?;
        Ok(id)
    }

    pub fn finish_session(
        &self,
        session_id: &str,
        report: &BatchUpsertReport,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"UPDATE analysis_sessions SET
               finished_at = ?, status = ?,
               ads_created = ?, ads_duplicate = ?, ads_failed = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                report.created as i64,
                report.duplicates as i64,
                report.failed.len() as i64,
                error,
                session_id,
            ],
        )?;
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<AnalysisSession>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, vehicle1, vehicle2, started_at, finished_at, status,
                      ads_created, ads_duplicate, ads_failed, error_msg
               FROM analysis_sessions ORDER BY started_at DESC"#,
        )?;
        let sessions = stmt
            .query_map([], map_session)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(sessions)
    }
}

fn find_link(conn: &Connection, link: &str) -> Result<Option<StoredAd>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {AD_COLUMNS} FROM ads WHERE link = ?"))?;
    let found = stmt.query_map(params![link], map_ad)?.next().transpose()?;
    Ok(found)
}

fn insert_ad(
    conn: &Connection,
    ad: &NormalizedAd,
    session_id: Option<&str>,
    vehicle_name: Option<&str>,
) -> Result<i64, StoreError> {
    let id = conn.query_row(
        r#"INSERT INTO ads
               (title, price, location, mileage, year, link, analysis_session_id,
                vehicle_name, confidence, quality_tier, extraction_method, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING id"#,
        params![
            ad.title,
            ad.price,
            ad.location,
            ad.mileage,
            ad.year,
            ad.link.trim(),
            session_id,
            vehicle_name,
            ad.quality.map(|q| q.confidence),
            ad.quality.map(|q| q.tier.as_str()),
            ad.method.as_str(),
            Utc::now().naive_utc(),
        ],
        |r| r.get(0),
    )?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;
    use crate::scoring::scored;
    use std::sync::Arc;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn ad(link: &str) -> NormalizedAd {
        scored(NormalizedAd {
            title: "Toyota Aqua 2015".into(),
            price: "4,250,000".into(),
            location: "Colombo".into(),
            mileage: "80,000 km".into(),
            year: "2015".into(),
            link: link.into(),
            method: ExtractionMethod::Real,
            quality: None,
            error: None,
        })
    }

    #[test]
    fn migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.ad_count().unwrap(), 0);
    }

    #[test]
    fn second_upsert_of_same_link_is_duplicate() {
        let repo = repo();
        let a = ad("https://ikman.lk/en/ad/aqua-1");

        let first = repo.upsert(&a, Some("s1"), Some("Toyota Aqua"));
        assert!(matches!(first, UpsertOutcome::Created(_)));
        assert_eq!(repo.upsert(&a, Some("s1"), Some("Toyota Aqua")), UpsertOutcome::Duplicate);
        // A later session does not re-store the listing either.
        assert_eq!(repo.upsert(&a, Some("s2"), Some("Toyota Aqua")), UpsertOutcome::Duplicate);
        let padded = ad("  https://ikman.lk/en/ad/aqua-1 ");
        assert_eq!(repo.upsert(&padded, Some("s2"), None), UpsertOutcome::Duplicate);
        assert_eq!(repo.ad_count().unwrap(), 1);

        let stored = repo.find_by_link("https://ikman.lk/en/ad/aqua-1").unwrap().unwrap();
        assert_eq!(stored.analysis_session_id.as_deref(), Some("s1"));
        assert_eq!(stored.confidence, Some(1.0));
        assert_eq!(stored.quality_tier.as_deref(), Some("excellent"));
        assert_eq!(stored.extraction_method, "real");
    }

    #[test]
    fn create_rejects_existing_link() {
        let repo = repo();
        let stored = repo.create(&ad("https://riyasewana.com/ad/1"), None, None).unwrap();
        assert!(stored.id > 0);
        let err = repo.create(&ad("https://riyasewana.com/ad/1"), None, None).unwrap_err();
        assert!(err.is_unique_violation(), "{}", err);
    }

    #[test]
    fn concurrent_upserts_create_exactly_once() {
        let repo = Arc::new(repo());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || repo.upsert(&ad("https://ikman.lk/en/ad/race"), Some("s"), None))
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = outcomes.iter().filter(|o| matches!(o, UpsertOutcome::Created(_))).count();
        assert_eq!(created, 1);
        assert_eq!(outcomes.iter().filter(|o| **o == UpsertOutcome::Duplicate).count(), 7);
    }

    #[test]
    fn batch_continues_past_failures() {
        let repo = repo();
        let ads = vec![
            ad("https://ikman.lk/en/ad/a"),
            ad("   "),
            ad("https://ikman.lk/en/ad/a"),
            ad("https://ikman.lk/en/ad/b"),
        ];
        let report = repo.upsert_batch(&ads, Some("s1"), Some("Toyota Aqua"));
        assert_eq!(report.created, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1, "empty link");
    }

    #[test]
    fn counts_and_listing_by_session_and_vehicle() {
        let repo = repo();
        repo.upsert(&ad("https://ikman.lk/en/ad/1"), Some("s1"), Some("Toyota Aqua"));
        repo.upsert(&ad("https://ikman.lk/en/ad/2"), Some("s1"), Some("Honda Fit"));
        repo.upsert(&ad("https://ikman.lk/en/ad/3"), Some("s2"), Some("Honda Fit"));

        assert_eq!(repo.count_by_session("s1").unwrap(), 2);
        assert_eq!(repo.count_by_session_and_vehicle("s1", "Honda Fit").unwrap(), 1);
        assert_eq!(repo.list_by_session("s1", None).unwrap().len(), 2);
        assert_eq!(repo.list_by_session("s1", Some("Toyota Aqua")).unwrap().len(), 1);
        assert_eq!(repo.list_ads(None, Some("Honda Fit")).unwrap().len(), 2);
        assert_eq!(repo.list_ads(None, None).unwrap().len(), 3);
        assert_eq!(repo.count_by_session("missing").unwrap(), 0);
    }

    #[test]
    fn session_lifecycle() {
        let repo = repo();
        let id = repo.begin_session("Toyota Aqua", Some("Honda Fit")).unwrap();
        assert_eq!(id.len(), 36);

        let report = BatchUpsertReport {
            created: 3,
            duplicates: 1,
            failed: vec![("https://x/ad/1".into(), "boom".into())],
        };
        repo.finish_session(&id, &report, None).unwrap();

        let sessions = repo.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.status, "success");
        assert_eq!(s.vehicle2.as_deref(), Some("Honda Fit"));
        assert_eq!((s.ads_created, s.ads_duplicate, s.ads_failed), (3, 1, 1));
        assert!(s.finished_at.is_some());
    }
}
