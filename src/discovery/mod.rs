//! Finding candidate ad URLs for a vehicle name.
//!
//! Search backends sit behind [`SearchProvider`]; [`discover`] applies the
//! shared dedup / classify / limit policy on top of whichever one is wired.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::classifier::filter_sale_urls;
use crate::config::{AppConfig, ScraperConfig, SearchProviderKind};
use crate::models::CandidateUrl;
use crate::scraper::http_client::HttpClient;
use crate::scraper::parsers::collect_ad_links;
use crate::utils::slugify;

pub const DEFAULT_LIMIT: usize = 5;

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, vehicle: &str) -> Result<Vec<CandidateUrl>>;
    fn name(&self) -> &'static str;
}

// ── serper.dev ────────────────────────────────────────────────────────────────

pub struct SerperSearch {
    client: HttpClient,
    api_key: String,
    endpoint: String,
}

impl SerperSearch {
    pub fn new(config: &ScraperConfig, api_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        })
    }

    fn queries(vehicle: &str) -> [String; 2] {
        [
            format!("site:ikman.lk/en/ad {} for sale", vehicle),
            format!("site:riyasewana.com/ad {} for sale", vehicle),
        ]
    }
}

/// `organic[].link` values from a serper response.
pub fn organic_links(resp: &Value) -> Vec<String> {
    resp.get("organic")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("link").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, vehicle: &str) -> Result<Vec<CandidateUrl>> {
        let headers = [("X-API-KEY", self.api_key.as_str())];
        let mut out = Vec::new();

        for q in Self::queries(vehicle) {
            let resp = self
                .client
                .post_json(&self.endpoint, &headers, &json!({ "q": q }))
                .await
                .with_context(|| format!("serper query '{}'", q))?;

            let links = organic_links(&resp);
            debug!("serper '{}': {} results", q, links.len());
            out.extend(links.iter().filter_map(|l| CandidateUrl::parse(l, "serper").ok()));
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "serper"
    }
}

// ── Listing sites ─────────────────────────────────────────────────────────────

struct SiteSearch {
    name: &'static str,
    search_url: &'static str,
    query_param: &'static str,
    /// Path fragment that marks an individual ad link.
    ad_marker: &'static str,
    limit: usize,
}

const SITES: &[SiteSearch] = &[
    SiteSearch {
        name: "ikman",
        search_url: "https://ikman.lk/en/ads/sri-lanka/cars",
        query_param: "query",
        ad_marker: "/en/ad/",
        limit: 3,
    },
    SiteSearch {
        name: "riyasewana",
        search_url: "https://riyasewana.com/search/cars",
        query_param: "q",
        ad_marker: "/ad/",
        limit: 2,
    },
    SiteSearch {
        name: "patpat",
        search_url: "https://patpat.lk/vehicle",
        query_param: "search",
        ad_marker: "/vehicle/",
        limit: 2,
    },
];

/// Reads the sites' own search result pages.
pub struct ListingSiteSearch {
    client: HttpClient,
}

impl ListingSiteSearch {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self { client: HttpClient::new(config)? })
    }

    async fn search_site(&self, site: &SiteSearch, vehicle: &str) -> Result<Vec<CandidateUrl>> {
        let url = Url::parse_with_params(site.search_url, &[(site.query_param, vehicle)])
            .with_context(|| format!("bad search url for {}", site.name))?;
        let html = self.client.get_text(url.as_str()).await?;

        let links = collect_ad_links(&html, &url, site.ad_marker);
        Ok(links
            .iter()
            .filter(|l| l.as_str() != url.as_str())
            .filter_map(|l| CandidateUrl::parse(l, site.name).ok())
            .take(site.limit)
            .collect())
    }
}

#[async_trait]
impl SearchProvider for ListingSiteSearch {
    async fn search(&self, vehicle: &str) -> Result<Vec<CandidateUrl>> {
        let mut out = Vec::new();
        for site in SITES {
            match self.search_site(site, vehicle).await {
                Ok(found) => {
                    info!("{}: {} ad links", site.name, found.len());
                    out.extend(found);
                }
                Err(e) => warn!("Search on {} failed: {:#}", site.name, e),
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "sites"
    }
}

// ── Offline ───────────────────────────────────────────────────────────────────

/// Plausible listing URLs built from the vehicle name. No network.
pub struct TemplateSearch;

impl TemplateSearch {
    pub fn urls(vehicle: &str) -> Vec<String> {
        let slug = slugify(vehicle);
        vec![
            format!("https://ikman.lk/en/ad/{slug}-2018-for-sale-colombo-12345"),
            format!("https://ikman.lk/en/ad/{slug}-2019-for-sale-gampaha-67890"),
            format!("https://riyasewana.com/ad/{slug}-2020-for-sale-78901"),
            format!("https://riyasewana.com/ad/{slug}-2017-for-sale-45678"),
            format!("https://ikman.lk/en/ad/{slug}-2021-for-sale-kandy-34567"),
        ]
    }
}

#[async_trait]
impl SearchProvider for TemplateSearch {
    async fn search(&self, vehicle: &str) -> Result<Vec<CandidateUrl>> {
        if vehicle.trim().is_empty() {
            bail!("empty vehicle name");
        }
        Ok(Self::urls(vehicle)
            .iter()
            .filter_map(|u| CandidateUrl::parse(u, "template").ok())
            .collect())
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

pub fn build_provider(config: &AppConfig) -> Result<Box<dyn SearchProvider>> {
    let provider: Box<dyn SearchProvider> = match config.search.provider {
        SearchProviderKind::Sites => Box::new(ListingSiteSearch::new(&config.scraper)?),
        SearchProviderKind::Template => Box::new(TemplateSearch),
        SearchProviderKind::Serper => {
            let key = config
                .search
                .serper_api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .context("search.provider is serper but no API key is configured")?;
            Box::new(SerperSearch::new(&config.scraper, key, config.search.serper_url.clone())?)
        }
    };
    Ok(provider)
}

/// Search, dedup, keep sale listings only, cap at `limit`. A provider error
/// yields an empty list.
pub async fn discover(provider: &dyn SearchProvider, vehicle: &str, limit: usize) -> Vec<CandidateUrl> {
    let found = match provider.search(vehicle).await {
        Ok(found) => found,
        Err(e) => {
            warn!("{} search for '{}' failed: {:#}", provider.name(), vehicle, e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let unique: Vec<CandidateUrl> = found
        .into_iter()
        .filter(|c| seen.insert(c.as_str().to_string()))
        .collect();

    let (mut sale, rejected) = filter_sale_urls(unique);
    if !rejected.is_empty() {
        info!("Dropped {} non-sale URLs", rejected.len());
    }
    sale.truncate(limit);
    info!("{}: {} candidate URLs for '{}'", provider.name(), sale.len(), vehicle);
    sale
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSearch(Vec<&'static str>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _vehicle: &str) -> Result<Vec<CandidateUrl>> {
            Ok(self.0.iter().filter_map(|u| CandidateUrl::parse(u, "fixed").ok()).collect())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct BrokenSearch;

    #[async_trait]
    impl SearchProvider for BrokenSearch {
        async fn search(&self, _vehicle: &str) -> Result<Vec<CandidateUrl>> {
            bail!("quota exceeded")
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn template_urls_follow_vehicle_slug() {
        let found = tokio_test::block_on(discover(&TemplateSearch, "Honda Fit", DEFAULT_LIMIT));
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|c| c.as_str().contains("/honda-fit-")));
        assert_eq!(found[2].url.host_str(), Some("riyasewana.com"));
    }

    #[tokio::test]
    async fn discover_dedups_filters_and_caps() {
        let provider = FixedSearch(vec![
            "https://ikman.lk/en/ad/honda-fit-for-rent-2019",
            "https://ikman.lk/en/ad/honda-fit-2013-for-sale-1",
            "https://ikman.lk/en/ad/honda-fit-2013-for-sale-1",
            "https://riyasewana.com/ad/honda-fit-spare-parts-2",
            "https://riyasewana.com/ad/honda-fit-2015-3",
            "https://patpat.lk/vehicle/car/honda-fit-4",
        ]);

        let found = discover(&provider, "Honda Fit", 5).await;
        let got: Vec<&str> = found.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            got,
            vec![
                "https://ikman.lk/en/ad/honda-fit-2013-for-sale-1",
                "https://riyasewana.com/ad/honda-fit-2015-3",
                "https://patpat.lk/vehicle/car/honda-fit-4",
            ]
        );

        assert_eq!(discover(&provider, "Honda Fit", 2).await.len(), 2);
    }

    #[tokio::test]
    async fn failing_provider_yields_nothing() {
        assert!(discover(&BrokenSearch, "Toyota Aqua", 5).await.is_empty());
    }

    #[test]
    fn reads_serper_organic_links() {
        let resp = json!({
            "searchParameters": { "q": "site:ikman.lk/en/ad aqua for sale" },
            "organic": [
                { "title": "Aqua 2015", "link": "https://ikman.lk/en/ad/aqua-2015-1" },
                { "title": "no link" },
                { "title": "Aqua 2016", "link": "https://ikman.lk/en/ad/aqua-2016-2" }
            ]
        });
        assert_eq!(
            organic_links(&resp),
            vec!["https://ikman.lk/en/ad/aqua-2015-1", "https://ikman.lk/en/ad/aqua-2016-2"]
        );
        assert!(organic_links(&json!({})).is_empty());
    }

    #[test]
    fn serper_queries_target_both_sites() {
        let [ikman, riya] = SerperSearch::queries("Toyota Aqua");
        assert_eq!(ikman, "site:ikman.lk/en/ad Toyota Aqua for sale");
        assert!(riya.starts_with("site:riyasewana.com"));
    }

    #[test]
    fn serper_without_key_is_a_config_error() {
        let mut config = AppConfig::default();
        config.search.provider = SearchProviderKind::Serper;
        config.search.serper_api_key = None;
        assert!(build_provider(&config).is_err());

        config.search.provider = SearchProviderKind::Template;
        assert_eq!(build_provider(&config).unwrap().name(), "template");
    }
}
