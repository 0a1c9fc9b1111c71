//! Loading candidate URL lists from disk.

use crate::classifier::parse_candidate_urls;
use crate::models::CandidateUrl;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Read candidate URLs from a file.
///
/// `.csv` files use the `url` or `link` column (first column if neither
/// exists); anything else is scanned as free text.
pub fn load_url_list(path: &Path) -> Result<Vec<CandidateUrl>> {
    let is_csv = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let urls = if is_csv {
        load_csv(path)?
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read URL list {:?}", path))?;
        parse_candidate_urls(&text, &source_name(path))
    };

    info!("{} URLs loaded from {:?}", urls.len(), path);
    Ok(urls)
}

fn source_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string()
}

fn load_csv(path: &Path) -> Result<Vec<CandidateUrl>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Could not open CSV {:?}", path))?;

    let column = {
        let headers = reader.headers()?;
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("url") || h.eq_ignore_ascii_case("link"))
            .unwrap_or(0)
    };
    debug!("Reading URLs from column {} of {:?}", column, path);

    let source = source_name(path);
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };
        let Some(raw) = record.get(column).filter(|v| !v.is_empty()) else { continue };

        match CandidateUrl::parse(raw, source.as_str()) {
            Ok(c) => {
                if seen.insert(c.as_str().to_string()) {
                    urls.push(c);
                }
            }
            Err(e) => warn!("Row {} in {:?}: {}", i + 1, path, e),
        }
    }
    Ok(urls)
}
