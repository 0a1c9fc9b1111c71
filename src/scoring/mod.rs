//! Completeness scoring for normalized ads.

use crate::models::{NormalizedAd, Quality, QualityTier, ERROR, NOT_FOUND, TIMEOUT};

pub const TITLE_WEIGHT: f64 = 0.30;
pub const PRICE_WEIGHT: f64 = 0.25;
pub const LOCATION_WEIGHT: f64 = 0.20;
pub const MILEAGE_WEIGHT: f64 = 0.15;
pub const YEAR_WEIGHT: f64 = 0.10;

/// A field counts only when it carries real data.
pub fn is_present(value: &str) -> bool {
    let v = value.trim();
    !(v.is_empty() || v == NOT_FOUND || v == ERROR || v == TIMEOUT)
}

/// Error pages often come back 200 with an "Error 404 ..." heading.
pub fn is_title_present(title: &str) -> bool {
    let t = title.trim();
    is_present(t) && !t.starts_with(ERROR) && !t.starts_with(TIMEOUT)
}

/// (present, weight) per field.
fn weighted_fields(ad: &NormalizedAd) -> [(bool, f64); 5] {
    [
        (is_title_present(&ad.title), TITLE_WEIGHT),
        (is_present(&ad.price), PRICE_WEIGHT),
        (is_present(&ad.location), LOCATION_WEIGHT),
        (is_present(&ad.mileage), MILEAGE_WEIGHT),
        (is_present(&ad.year), YEAR_WEIGHT),
    ]
}

pub fn tier_for(confidence: f64) -> QualityTier {
    if confidence >= 0.9 {
        QualityTier::Excellent
    } else if confidence >= 0.7 {
        QualityTier::Good
    } else if confidence >= 0.5 {
        QualityTier::Fair
    } else {
        QualityTier::Poor
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Weighted presence score in [0, 1] and its tier.
pub fn score(ad: &NormalizedAd) -> Quality {
    let raw: f64 = weighted_fields(ad)
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| weight)
        .sum();
    let confidence = round2(raw).clamp(0.0, 1.0);
    Quality { confidence, tier: tier_for(confidence) }
}

/// Convenience for pipelines: attach the score to the ad.
pub fn scored(ad: NormalizedAd) -> NormalizedAd {
    let q = score(&ad);
    ad.with_quality(q)
}

pub fn fields_extracted(ad: &NormalizedAd) -> usize {
    weighted_fields(ad)
        .iter()
        .filter(|(present, _)| *present)
        .count()
}

/// Mean confidence across a batch, 0 for an empty batch. Unscored ads count
/// as zero.
pub fn mean_confidence(ads: &[NormalizedAd]) -> f64 {
    if ads.is_empty() {
        return 0.0;
    }
    let total: f64 = ads.iter().map(|a| a.quality.unwrap_or_else(|| score(a)).confidence).sum();
    round2(total / ads.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;

    fn ad(title: &str, price: &str, location: &str, mileage: &str, year: &str) -> NormalizedAd {
        NormalizedAd {
            title: title.into(),
            price: price.into(),
            location: location.into(),
            mileage: mileage.into(),
            year: year.into(),
            link: "https://ikman.lk/en/ad/x".into(),
            method: ExtractionMethod::Real,
            quality: None,
            error: None,
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = TITLE_WEIGHT + PRICE_WEIGHT + LOCATION_WEIGHT + MILEAGE_WEIGHT + YEAR_WEIGHT;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn full_record_is_excellent() {
        let q = score(&ad("Aqua", "4,250,000", "Colombo", "80,000 km", "2015"));
        assert_eq!(q.confidence, 1.0);
        assert_eq!(q.tier, QualityTier::Excellent);
    }

    #[test]
    fn partial_records_land_in_expected_tiers() {
        // title + price + location = 0.75
        let q = score(&ad("Aqua", "4,250,000", "Colombo", "Not Found", "Not Found"));
        assert_eq!(q.confidence, 0.75);
        assert_eq!(q.tier, QualityTier::Good);

        // title + price = 0.55
        let q = score(&ad("Aqua", "4,250,000", "Not Found", "", "Not Found"));
        assert_eq!(q.confidence, 0.55);
        assert_eq!(q.tier, QualityTier::Fair);

        // year only
        let q = score(&ad("Not Found", "Not Found", "Not Found", "Not Found", "2015"));
        assert_eq!(q.confidence, 0.1);
        assert_eq!(q.tier, QualityTier::Poor);
    }

    #[test]
    fn failure_sentinels_score_zero() {
        let q = score(&ad("Timeout", "Timeout", "Timeout", "Timeout", "Timeout"));
        assert_eq!(q.confidence, 0.0);
        let q = score(&ad("Error", "Error", "Error", "Error", "Error"));
        assert_eq!(q.confidence, 0.0);
        assert_eq!(q.tier, QualityTier::Poor);
    }

    #[test]
    fn error_page_title_counts_as_absent() {
        let q = score(&ad("Error 404 - Page Not Found", "Not Found", "Not Found", "Not Found", "Not Found"));
        assert_eq!(q.confidence, 0.0);
        let q = score(&ad("Timeout while loading", "4,250,000", "Not Found", "Not Found", "Not Found"));
        assert_eq!(q.confidence, 0.25);
        assert!(is_title_present("Toyota Aqua - Error free engine"));
        assert!(!is_title_present("  Error"));
    }

    #[test]
    fn tier_thresholds_are_inclusive() {
        assert_eq!(tier_for(0.9), QualityTier::Excellent);
        assert_eq!(tier_for(0.89), QualityTier::Good);
        assert_eq!(tier_for(0.7), QualityTier::Good);
        assert_eq!(tier_for(0.5), QualityTier::Fair);
        assert_eq!(tier_for(0.49), QualityTier::Poor);
    }

    #[test]
    fn mean_over_batch() {
        let ads = vec![
            scored(ad("Aqua", "1", "Colombo", "80,000 km", "2015")),
            scored(ad("Not Found", "Not Found", "Not Found", "Not Found", "Not Found")),
        ];
        assert_eq!(mean_confidence(&ads), 0.5);
        assert_eq!(mean_confidence(&[]), 0.0);
        assert_eq!(fields_extracted(&ads[0]), 5);
        assert_eq!(fields_extracted(&ads[1]), 0);
    }
}
