use crate::models::{ExtractionMethod, RawExtraction, RawField};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

// ── Rules ─────────────────────────────────────────────────────────────────────

/// One way of finding a field. Rules for a field are tried in order and the
/// first non-empty match wins, so markup drift on one site only costs a rule.
pub enum Rule {
    /// Text of the first element matching a CSS selector.
    Css(Selector),
    /// First capture group of a pattern run over the page's visible text.
    Text(Regex),
}

impl Rule {
    fn css(sel: &str) -> Self {
        Rule::Css(Selector::parse(sel).expect("static selector"))
    }

    fn text(pattern: &str) -> Self {
        Rule::Text(Regex::new(pattern).expect("static pattern"))
    }

    fn apply(&self, page: &Page) -> Option<String> {
        let found = match self {
            Rule::Css(sel) => page
                .doc
                .select(sel)
                .map(|el| squash(&el.text().collect::<Vec<_>>().join(" ")))
                .find(|t| !t.is_empty()),
            Rule::Text(re) => re
                .captures(&page.text)
                .and_then(|c| c.get(1))
                .map(|m| squash(m.as_str())),
        };
        found.filter(|t| !t.is_empty())
    }
}

pub struct FieldRules {
    pub title: Vec<Rule>,
    pub price: Vec<Rule>,
    /// (sub-area, parent-area), joined with ", " when both are present.
    pub location_parts: (Rule, Rule),
    pub location: Vec<Rule>,
    pub mileage: Vec<Rule>,
    pub year: Vec<Rule>,
}

/// Selectors and patterns for the supported listing sites, most specific first.
pub static AD_RULES: LazyLock<FieldRules> = LazyLock::new(|| FieldRules {
    title: vec![
        Rule::css("h1"),
        Rule::css(".ad-title"),
        Rule::css(r#"[data-testid="ad-title"]"#),
        Rule::css(".title"),
        Rule::css("title"),
    ],
    price: vec![
        Rule::css(r#"[data-testid="price"]"#),
        Rule::css(".price"),
        Rule::css(".ad-price"),
        Rule::css(".price-value"),
        Rule::text(r"(?i)\b((?:rs\.?|lkr)\s*\d{1,3}(?:,\d{3})+)"),
    ],
    location_parts: (
        Rule::css(r#"[data-testid="subtitle-sublocation-link"]"#),
        Rule::css(r#"[data-testid="subtitle-parentlocation-link"]"#),
    ),
    location: vec![
        Rule::css(".location"),
        Rule::css(".ad-location"),
        Rule::css(".area"),
    ],
    mileage: vec![
        Rule::text(r"(?i)(?:^|[^\d,])(\d{1,3}(?:,\d{3})+\s*(?:km|kilomet(?:er|re)s?))\b"),
        Rule::text(r"(?i)\b((?:just|only)\s+\d+\s*(?:km|kilomet(?:er|re)s?)?)\b"),
        Rule::text(r"(?i)\b(\d+\s*(?:km|kilomet(?:er|re)s?))\b"),
        Rule::text(r"(?i)mileage[:\s]*(\d+(?:,\d{3})*)"),
    ],
    year: vec![
        Rule::text(r"(?i)(?:year of manufacture|model year|manufactured|year)\s*:?\s*((?:19|20)\d{2})\b"),
        Rule::text(r"\b((?:19|20)\d{2})\b"),
    ],
});

// ── Page ──────────────────────────────────────────────────────────────────────

/// Parsed document plus its flattened visible text.
pub struct Page {
    doc: Html,
    text: String,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let text = visible_text(&doc);
        Self { doc, text }
    }

    pub fn first_match(&self, rules: &[Rule]) -> RawField {
        rules
            .iter()
            .find_map(|r| r.apply(self))
            .map(RawField::from_text)
            .unwrap_or(RawField::NotFound)
    }
}

fn visible_text(doc: &Html) -> String {
    static BODY: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("body").expect("static selector"));
    const HIDDEN: &[&str] = &["script", "style", "noscript"];

    let root = doc.select(&BODY).next().unwrap_or_else(|| doc.root_element());
    let parts: Vec<&str> = root
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|el| HIDDEN.contains(&el.name()))
            });
            if hidden { None } else { Some(&**text) }
        })
        .collect();
    squash(&parts.join(" "))
}

/// Collapse runs of whitespace into single spaces.
fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Ad page ───────────────────────────────────────────────────────────────────

/// Pull the raw ad fields out of a listing page.
pub fn parse_ad_page(html: &str, url: &str) -> RawExtraction {
    let page = Page::parse(html);
    let rules = &*AD_RULES;

    RawExtraction {
        url: url.to_string(),
        title: page.first_match(&rules.title),
        price: page.first_match(&rules.price),
        location: parse_location(&page, rules),
        mileage: page.first_match(&rules.mileage),
        year: page.first_match(&rules.year),
        method: ExtractionMethod::Real,
        error: None,
    }
}

fn parse_location(page: &Page, rules: &FieldRules) -> RawField {
    let (sub_rule, parent_rule) = &rules.location_parts;
    let parts: Vec<String> = [sub_rule.apply(page), parent_rule.apply(page)]
        .into_iter()
        .flatten()
        .collect();

    if parts.is_empty() {
        return page.first_match(&rules.location);
    }
    RawField::from_text(parts.join(", "))
}

// ── Search result pages ───────────────────────────────────────────────────────

/// `href`s of anchors whose target contains `path_marker`, made absolute
/// against `base`.
pub fn collect_ad_links(html: &str, base: &url::Url, path_marker: &str) -> Vec<String> {
    static ANCHOR: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

    let doc = Html::parse_document(html);
    let mut links = Vec::new();
    for a in doc.select(&ANCHOR) {
        let Some(href) = a.value().attr("href") else { continue };
        if !href.contains(path_marker) {
            continue;
        }
        let Ok(abs) = base.join(href) else { continue };
        let abs = abs.to_string();
        if !links.contains(&abs) {
            links.push(abs);
        }
    }
    links
}
