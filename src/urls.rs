use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use url::Url;

use crate::parser::page::extract_ids;

/// Read competition URLs from a seed file, one per line. Blank lines
/// and `#` comments are skipped; anything that does not parse as an
/// http(s) URL is logged and dropped.
pub fn load_url_file(path: &Path) -> Result<Vec<(String, String)>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let pages = parse_url_lines(&body);
    info!("Loaded {} competition URLs from {}", pages.len(), path.display());
    Ok(pages)
}

fn parse_url_lines(body: &str) -> Vec<(String, String)> {
    let mut pages = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Url::parse(line) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {
                let (external_id, _) = extract_ids(line);
                pages.push((line.to_string(), external_id));
            }
            _ => warn!("Skipping invalid URL: {}", line),
        }
    }
    pages
}
