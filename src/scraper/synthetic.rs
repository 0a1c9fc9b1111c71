//! Offline stand-in ads for degraded operation.
//!
//! Records are seeded from the URL, so the same URL always produces the same
//! ad, and are always tagged `Synthetic`.

use crate::models::{ExtractionMethod, RawExtraction, RawField};
use crate::utils::{group_thousands, slugify};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTemplate {
    pub make: String,
    pub model: String,
    pub base_price: u64,
}

impl VehicleTemplate {
    fn new(make: &str, model: &str, base_price: u64) -> Self {
        Self { make: make.into(), model: model.into(), base_price }
    }

    fn slug(&self) -> String {
        slugify(&format!("{} {}", self.make, self.model))
    }
}

const DEFAULT_BASE_PRICE: u64 = 4_500_000;
const REFERENCE_YEAR: i64 = 2024;
const YEARS: &[i64] = &[2018, 2019, 2020, 2021, 2022, 2023];
const LOCATIONS: &[&str] = &[
    "Colombo 01",
    "Colombo 05",
    "Gampaha",
    "Kandy",
    "Negombo",
    "Kurunegala",
    "Galle",
    "Matara",
    "Kalutara",
    "Battaramulla",
];
const MILEAGES: &[&str] = &[
    "25,000 km", "28,000 km", "32,000 km", "35,000 km", "38,000 km", "42,000 km",
    "45,000 km", "48,000 km", "55,000 km", "65,000 km", "75,000 km", "85,000 km",
];
const CONDITIONS: &[&str] = &["Excellent", "Very Good", "Good", "Well Maintained"];

static URL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[-/_])((?:19|20)\d{2})(?:$|[-/_.?])").expect("static regex"));

pub fn default_templates() -> Vec<VehicleTemplate> {
    vec![
        VehicleTemplate::new("Toyota", "Aqua", 4_200_000),
        VehicleTemplate::new("Honda", "Fit", 3_800_000),
        VehicleTemplate::new("Nissan", "March", 3_600_000),
        VehicleTemplate::new("Suzuki", "Swift", 4_000_000),
        VehicleTemplate::new("Toyota", "Vitz", 3_500_000),
        VehicleTemplate::new("Honda", "Vezel", 6_500_000),
        VehicleTemplate::new("Toyota", "Prius", 5_800_000),
    ]
}

/// FNV-1a; stable across runs and platforms unlike `DefaultHasher`.
fn stable_seed(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

pub struct SyntheticGenerator {
    templates: Vec<VehicleTemplate>,
    seed_vehicle: Option<VehicleTemplate>,
}

impl SyntheticGenerator {
    /// `vehicle` is the searched name, e.g. "Toyota Aqua"; when given, every
    /// record describes that vehicle.
    pub fn new(vehicle: Option<&str>) -> Self {
        let templates = default_templates();
        let seed_vehicle = vehicle
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| template_for_name(v, &templates));
        Self { templates, seed_vehicle }
    }

    fn pick_template(&self, url: &str, rng: &mut StdRng) -> VehicleTemplate {
        if let Some(t) = &self.seed_vehicle {
            return t.clone();
        }
        let lower = url.to_lowercase();
        if let Some(t) = self.templates.iter().find(|t| lower.contains(&t.slug())) {
            return t.clone();
        }
        self.templates
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| VehicleTemplate::new("Toyota", "Car", DEFAULT_BASE_PRICE))
    }

    pub fn generate(&self, url: &str) -> RawExtraction {
        let mut rng = StdRng::seed_from_u64(stable_seed(url));
        let template = self.pick_template(url, &mut rng);

        let year = year_from_url(url).unwrap_or_else(|| *YEARS.choose(&mut rng).unwrap_or(&2020));
        let location = LOCATIONS.choose(&mut rng).copied().unwrap_or("Colombo");
        let mileage = MILEAGES.choose(&mut rng).copied().unwrap_or("45,000 km");
        let condition = CONDITIONS.choose(&mut rng).copied().unwrap_or("Good");

        let age_factor = (1.0 - (REFERENCE_YEAR - year) as f64 * 0.08).max(0.65);
        let variation: f64 = rng.random_range(0.9..1.15);
        let price = (template.base_price as f64 * age_factor * variation) as u64;
        let price = (price / 50_000) * 50_000;

        RawExtraction {
            url: url.to_string(),
            title: RawField::Value(format!(
                "{} {} {} - {} Condition",
                template.make, template.model, year, condition
            )),
            price: RawField::Value(group_thousands(price)),
            location: RawField::Value(location.to_string()),
            mileage: RawField::Value(mileage.to_string()),
            year: RawField::Value(year.to_string()),
            method: ExtractionMethod::Synthetic,
            error: None,
        }
    }
}

/// Known template for the name, or a new one at the default price band.
fn template_for_name(name: &str, templates: &[VehicleTemplate]) -> VehicleTemplate {
    let slug = slugify(name);
    if let Some(t) = templates.iter().find(|t| slug.contains(&slugify(&t.model))) {
        return t.clone();
    }

    let mut words = name.split_whitespace();
    let make = words.next().map(title_case).unwrap_or_else(|| "Toyota".into());
    let model = {
        let rest: Vec<String> = words.map(title_case).collect();
        if rest.is_empty() { "Car".to_string() } else { rest.join(" ") }
    };
    VehicleTemplate { make, model, base_price: DEFAULT_BASE_PRICE }
}

fn title_case(w: &str) -> String {
    let mut chars = w.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Listing slugs usually carry the model year ("…-2015-for-sale-…").
fn year_from_url(url: &str) -> Option<i64> {
    URL_YEAR
        .captures_iter(url)
        .filter_map(|c| c[1].parse::<i64>().ok())
        .find(|y| (2000..=REFERENCE_YEAR).contains(y))
}
