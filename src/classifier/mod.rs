//! Sale-vs-noise classification of candidate listing URLs.
//!
//! Rental, parts and service adverts share URL shapes with genuine sale ads on
//! the listing sites, so the decision is keyword based over the URL and, when
//! available, the page title. Anything without a reject term is accepted.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::models::{CandidateUrl, Verdict};
use crate::scraper::http_client::HttpClient;

/// Terms that mark a listing as something other than a vehicle sale.
pub const REJECT_TERMS: &[&str] = &[
    "rent",
    "rental",
    "hire",
    "lease",
    "parts",
    "spare",
    "accessories",
    "tyre",
    "tire",
    "battery",
    "service",
    "repair",
    "maintenance",
    "workshop",
    "insurance",
    "finance",
    "loan",
];

pub const SALE_MARKERS: &[&str] = &["for-sale", "for sale", "selling", "sell", "sale"];

static URL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>\x22'`,]+").expect("static regex"));

/// First reject term found in `haystack`, if any.
fn reject_term(haystack: &str) -> Option<&'static str> {
    REJECT_TERMS.iter().copied().find(|t| haystack.contains(t))
}

fn has_sale_marker(haystack: &str) -> bool {
    SALE_MARKERS.iter().any(|m| haystack.contains(m))
}

/// Classify a URL, optionally with the page title.
pub fn classify(url: &str, title: Option<&str>) -> Verdict {
    let mut haystack = url.to_lowercase();
    if let Some(title) = title {
        haystack.push(' ');
        haystack.push_str(&title.to_lowercase());
    }

    if let Some(term) = reject_term(&haystack) {
        debug!("Rejected {} (matched '{}')", url, term);
        return Verdict::Rejected;
    }

    if has_sale_marker(&haystack) {
        debug!("Sale marker in {}", url);
    }
    Verdict::Sale
}

/// Classify using the live page title. Any fetch failure falls back to `Sale`
/// so one dead page never blocks discovery.
pub async fn classify_remote(client: &HttpClient, candidate: &CandidateUrl) -> Verdict {
    match client.get_text(candidate.as_str()).await {
        Ok(html) => {
            let title = page_title(&html);
            classify(candidate.as_str(), title.as_deref())
        }
        Err(e) => {
            warn!("Title check failed for {}: {}, treating as sale", candidate.as_str(), e);
            Verdict::Sale
        }
    }
}

/// `<title>` text, falling back to the first `h1`.
pub fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    ["title", "h1"].iter().find_map(|sel| {
        let sel = Selector::parse(sel).ok()?;
        let text = doc.select(&sel).next()?.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() { None } else { Some(text.to_string()) }
    })
}

/// Pull every http(s) URL out of free text such as a bulleted list, keeping
/// the first occurrence of each.
pub fn parse_candidate_urls(text: &str, source: &str) -> Vec<CandidateUrl> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for line in text.lines() {
        let line = line
            .trim()
            .trim_start_matches("- ")
            .trim_start_matches("* ")
            .trim_start_matches("• ");

        for m in URL_TOKEN.find_iter(line) {
            let raw = m.as_str().trim_end_matches(['.', ')', ']', ';']);
            match CandidateUrl::parse(raw, source) {
                Ok(c) => {
                    if seen.insert(c.url.to_string()) {
                        out.push(c);
                    }
                }
                Err(e) => debug!("Skipping candidate: {}", e),
            }
        }
    }
    out
}

/// Split candidates into (sale, rejected) by URL alone.
pub fn filter_sale_urls(candidates: Vec<CandidateUrl>) -> (Vec<CandidateUrl>, Vec<CandidateUrl>) {
    candidates
        .into_iter()
        .partition(|c| classify(c.as_str(), None) == Verdict::Sale)
}
