//! Price statistics over stored ads.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::models::AdRecord;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

#[derive(Debug, Clone, Default)]
pub struct AdFilter {
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub year: Option<String>,
    /// Case-insensitive substring of the location.
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdStats {
    pub ads: Vec<AdRecord>,
    pub count: usize,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub avg_price: Option<u64>,
}

/// First run of digits once grouping commas are dropped: "LKR 6,500,000" → 6500000.
pub fn parse_price(price: &str) -> Option<u64> {
    let plain = price.replace(',', "");
    DIGITS.find(&plain)?.as_str().parse().ok()
}

impl AdFilter {
    fn accepts(&self, ad: &AdRecord, price: u64) -> bool {
        if self.min_price.is_some_and(|min| price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| price > max) {
            return false;
        }
        if let Some(year) = &self.year {
            if year.trim() != ad.year.trim() {
                return false;
            }
        }
        if let Some(loc) = &self.location {
            if !ad.location.to_lowercase().contains(&loc.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Ads without a readable price never count.
pub fn filter_and_stats(ads: Vec<AdRecord>, filter: &AdFilter) -> AdStats {
    let mut kept = Vec::new();
    let mut prices = Vec::new();

    for ad in ads {
        let Some(price) = parse_price(&ad.price) else { continue };
        if filter.accepts(&ad, price) {
            prices.push(price);
            kept.push(ad);
        }
    }

    // Summed as u128: a few near-max prices overflow u64.
    let avg_price = if prices.is_empty() {
        None
    } else {
        let total: u128 = prices.iter().map(|&p| u128::from(p)).sum();
        u64::try_from(total / prices.len() as u128).ok()
    };

    AdStats {
        count: prices.len(),
        min_price: prices.iter().min().copied(),
        max_price: prices.iter().max().copied(),
        avg_price,
        ads: kept,
    }
}
