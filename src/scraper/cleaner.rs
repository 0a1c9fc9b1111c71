//! Canonical forms for scraped ad fields.
//!
//! Every function here is pure: the same raw input always gives the same
//! output, which keeps re-processing idempotent.

use crate::models::{NormalizedAd, RawExtraction, RawField, NOT_FOUND};
use crate::utils::group_thousands;
use regex::Regex;
use std::sync::LazyLock;

pub const MIN_YEAR: i64 = 1900;
pub const MAX_YEAR: i64 = 2030;

/// Below this a bare mileage figure is read as thousands of km.
pub const MILEAGE_THOUSANDS_BELOW: u64 = 500;

static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:rs|lkr)\b\.?").expect("static regex"));

const KM_UNIT: &str = r"(?:km|kms|kilomet(?:er|re)s?)";

static MILEAGE_ABBREVIATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(?:just|only)\s+(\d+)\s*{KM_UNIT}?$")).expect("static regex")
});
static MILEAGE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:just|only)\s+").expect("static regex"));
static MILEAGE_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(\d+)\s*{KM_UNIT}?$")).expect("static regex")
});
static MILEAGE_GROUPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(\d{{1,3}}(?:,\d{{3}})+)\s*{KM_UNIT}?$")).expect("static regex")
});

static YEAR_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})\b").expect("static regex"));

// ── Price ─────────────────────────────────────────────────────────────────────

/// "Rs. 4,250,000" → "4,250,000". Anything that is not a plain amount once
/// currency and separators are gone is returned as-is, never guessed at.
pub fn normalize_price(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NOT_FOUND.to_string();
    }

    let stripped = CURRENCY.replace_all(trimmed, "");
    let compact: String = stripped
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let compact = compact.trim_end_matches("/-");

    match parse_whole_number(compact) {
        Some(n) => group_thousands(n),
        None => trimmed.to_string(),
    }
}

/// Digits, optionally followed by an all-zero fraction ("4250000.00").
fn parse_whole_number(s: &str) -> Option<u64> {
    let (int_part, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some(f) = frac {
        if f.is_empty() || !f.chars().all(|c| c == '0') {
            return None;
        }
    }
    int_part.parse().ok()
}

// ── Mileage ───────────────────────────────────────────────────────────────────

/// Canonical "N,NNN km". Sellers abbreviate "50,000 km" as "just 50", so
/// small figures are scaled by a thousand.
pub fn normalize_mileage(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('.');

    if let Some(n) = capture_number(&MILEAGE_ABBREVIATED, trimmed) {
        if n < MILEAGE_THOUSANDS_BELOW {
            return km(n * 1000);
        }
    }

    // "just 85,000 km" is not abbreviated; judge the figure on its own.
    let figure = MILEAGE_PREFIX.replace(trimmed, "");
    let figure = figure.as_ref();

    if let Some(n) = capture_number(&MILEAGE_BARE, figure) {
        if n < MILEAGE_THOUSANDS_BELOW {
            return km(n * 1000);
        }
        if n >= 1000 {
            return km(n);
        }
        return raw.to_string();
    }

    if let Some(caps) = MILEAGE_GROUPED.captures(figure) {
        return format!("{} km", &caps[1]);
    }

    raw.to_string()
}

fn capture_number(re: &Regex, s: &str) -> Option<u64> {
    re.captures(s)?.get(1)?.as_str().parse().ok()
}

fn km(n: u64) -> String {
    format!("{} km", group_thousands(n))
}

// ── Year ──────────────────────────────────────────────────────────────────────

/// Four-digit year in [1900, 2030], or "Not Found". Tolerates "2004.0" and
/// surrounding noise such as "Year: 2004".
pub fn normalize_year(raw: &str) -> String {
    parse_year(raw)
        .filter(|y| (MIN_YEAR..=MAX_YEAR).contains(y))
        .map(|y| y.to_string())
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

fn parse_year(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(y) = s.parse::<i64>() {
        return Some(y);
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 {
            return Some(f as i64);
        }
    }
    YEAR_TOKEN
        .captures(s)
        .and_then(|c| c[1].parse().ok())
}

// ── Free text ─────────────────────────────────────────────────────────────────

pub fn normalize_text(raw: &str) -> String {
    let t = raw.trim();
    if t.is_empty() { NOT_FOUND.to_string() } else { t.to_string() }
}

// ── RawExtraction → NormalizedAd ──────────────────────────────────────────────

/// Apply `f` to real values; sentinels keep their own spelling so fetch
/// failures stay distinguishable from parse misses.
fn clean_field(field: &RawField, f: impl Fn(&str) -> String) -> String {
    match field {
        RawField::Value(v) => f(v),
        other => other.as_str().to_string(),
    }
}

/// Canonicalize one extraction. Quality is left unset for the scorer.
pub fn normalize(raw: &RawExtraction) -> NormalizedAd {
    NormalizedAd {
        title: clean_field(&raw.title, normalize_text),
        price: clean_field(&raw.price, normalize_price),
        location: clean_field(&raw.location, normalize_text),
        mileage: clean_field(&raw.mileage, normalize_mileage),
        year: clean_field(&raw.year, normalize_year),
        link: raw.url.trim().to_string(),
        method: raw.method,
        quality: None,
        error: raw.error.clone(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
