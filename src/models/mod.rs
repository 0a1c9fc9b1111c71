use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::CandidateError;

pub const NOT_FOUND: &str = "Not Found";
pub const ERROR: &str = "Error";
pub const TIMEOUT: &str = "Timeout";

// ── Candidate URL ─────────────────────────────────────────────────────────────

/// An absolute http(s) listing URL plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateUrl {
    pub url: Url,
    pub source: String,
}

impl CandidateUrl {
    pub fn parse(raw: &str, source: impl Into<String>) -> Result<Self, CandidateError> {
        let raw = raw.trim();
        let url = Url::parse(raw).map_err(|e| CandidateError::Malformed {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CandidateError::UnsupportedScheme {
                    url: raw.to_string(),
                    scheme: other.to_string(),
                })
            }
        }
        if url.host_str().is_none() {
            return Err(CandidateError::Malformed {
                url: raw.to_string(),
                reason: "missing host".into(),
            });
        }

        Ok(Self { url, source: source.into() })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Sale,
    Rejected,
}

// ── Raw extraction ────────────────────────────────────────────────────────────

/// One scraped field. Sentinels are kept distinct so a parse miss is never
/// confused with an unreachable page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawField {
    Value(String),
    NotFound,
    Error,
    Timeout,
}

impl RawField {
    /// Empty or whitespace-only text counts as a miss.
    pub fn from_text(text: impl AsRef<str>) -> Self {
        let t = text.as_ref().trim();
        if t.is_empty() { RawField::NotFound } else { RawField::Value(t.to_string()) }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RawField::Value(v) => v,
            RawField::NotFound => NOT_FOUND,
            RawField::Error => ERROR,
            RawField::Timeout => TIMEOUT,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, RawField::Value(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Real,
    Synthetic,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Real => "real",
            ExtractionMethod::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction {
    pub url: String,
    pub title: RawField,
    pub price: RawField,
    pub location: RawField,
    pub mileage: RawField,
    pub year: RawField,
    pub method: ExtractionMethod,
    pub error: Option<String>,
}

impl RawExtraction {
    /// Every field set to the given sentinel, for pages that never arrived.
    pub fn failed(url: impl Into<String>, sentinel: RawField, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: sentinel.clone(),
            price: sentinel.clone(),
            location: sentinel.clone(),
            mileage: sentinel.clone(),
            year: sentinel,
            method: ExtractionMethod::Real,
            error: Some(reason.into()),
        }
    }
}

// ── Normalized ad ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Fair => "fair",
            QualityTier::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    pub confidence: f64,
    pub tier: QualityTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAd {
    pub title: String,
    pub price: String,
    pub location: String,
    pub mileage: String,
    pub year: String,
    pub link: String,
    pub method: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl NormalizedAd {
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// True when the page could not be fetched or processed at all.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ── Persisted rows ────────────────────────────────────────────────────────────

/// An ad row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAd {
    pub id: i64,
    pub title: String,
    pub price: String,
    pub location: String,
    pub mileage: String,
    pub year: String,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_name: Option<String>,
    pub confidence: Option<f64>,
    pub quality_tier: Option<String>,
    pub extraction_method: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: String,
    pub vehicle1: String,
    pub vehicle2: Option<String>,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub ads_created: i64,
    pub ads_duplicate: i64,
    pub ads_failed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

// ── Output records ────────────────────────────────────────────────────────────

/// The JSON shape handed to callers: the six ad fields plus run provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRecord {
    pub title: String,
    pub price: String,
    pub location: String,
    pub mileage: String,
    pub year: String,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub analysis_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vehicle_name: Option<String>,
}

impl AdRecord {
    pub fn from_ad(ad: &NormalizedAd, session_id: Option<&str>, vehicle: Option<&str>) -> Self {
        Self {
            title: ad.title.clone(),
            price: ad.price.clone(),
            location: ad.location.clone(),
            mileage: ad.mileage.clone(),
            year: ad.year.clone(),
            link: ad.link.clone(),
            analysis_session_id: session_id.map(str::to_string),
            vehicle_name: vehicle.map(str::to_string),
        }
    }
}

impl From<StoredAd> for AdRecord {
    fn from(ad: StoredAd) -> Self {
        Self {
            title: ad.title,
            price: ad.price,
            location: ad.location,
            mileage: ad.mileage,
            year: ad.year,
            link: ad.link,
            analysis_session_id: ad.analysis_session_id,
            vehicle_name: ad.vehicle_name,
        }
    }
}
