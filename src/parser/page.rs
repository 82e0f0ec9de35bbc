use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::dates::parse_uk_datetime;
use super::money::find_money_mention;
use super::{clean_text, element_text, stable_id};

pub const FALLBACK_TITLE: &str = "Unknown Innovate UK competition";

static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static LI_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());
static LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong, b, dt").unwrap());
static HEADING_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3").unwrap());
static P_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());

/// Funding-percentage probes over the whole page text.
static RULE_PROBES: LazyLock<Vec<(Regex, &'static str, f64)>> = LazyLock::new(|| {
    [
        (r"(?is)up to 60%.*micro.*small.*medium", "micro_sme_max_pct", 0.60),
        (r"(?is)up to 50%.*large\s+organisation", "large_max_pct", 0.50),
        (r"(?is)up to 70%.*research\s+organisation", "research_max_pct", 0.70),
    ]
    .iter()
    .map(|(p, key, pct)| (Regex::new(p).unwrap(), *key, *pct))
    .collect()
});

/// Metadata lifted from a competition overview page.
#[derive(Debug, Clone)]
pub struct ProgramPage {
    /// Internal id: the numeric competition id, or a URL-hash id.
    pub id: String,
    /// Id as it appears in the source URL path.
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    /// Total-fund display string, verbatim from the page.
    pub total_fund: Option<String>,
    /// Per-project size text, verbatim from the page.
    pub project_size: Option<String>,
    pub funding_rules: BTreeMap<String, f64>,
}

pub fn extract_page_meta(doc: &Html, url: &str) -> ProgramPage {
    let (external_id, id) = extract_ids(url);
    let text_all = page_text(doc);
    let (opens_at, closes_at) = extract_dates(doc);
    ProgramPage {
        id,
        external_id,
        title: extract_title(doc),
        url: url.to_string(),
        description: extract_description(doc),
        opens_at,
        closes_at,
        total_fund: find_money_mention(&text_all),
        project_size: extract_project_size(doc),
        funding_rules: extract_funding_rules(&text_all),
    }
}

/// (external_id, internal_id) from a competition URL. The external id
/// is the numeric `/competition/{id}/` path segment when present, else
/// the last path segment. Non-numeric ids hash the URL instead.
pub fn extract_ids(url: &str) -> (String, String) {
    let mut external = None;
    if let Ok(parsed) = Url::parse(url) {
        let parts: Vec<String> = parsed
            .path()
            .split('/')
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .collect();
        for pair in parts.windows(2) {
            if pair[0] == "competition" && pair[1].chars().all(|c| c.is_ascii_digit()) && !pair[1].is_empty()
            {
                external = Some(pair[1].clone());
                break;
            }
        }
        if external.is_none() {
            external = parts.last().cloned();
        }
    }
    let external = external.unwrap_or_else(|| "unknown".to_string());
    let internal = if !external.is_empty() && external.chars().all(|c| c.is_ascii_digit()) {
        external.clone()
    } else {
        stable_id("iuk_", url)
    };
    (external, internal)
}

fn extract_title(doc: &Html) -> String {
    doc.select(&H1_SEL)
        .next()
        .map(|h1| clean_text(&element_text(&h1)))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

/// Opening and closing instants from "Competition opens:" and
/// "Competition closes:" list items. The date text follows the first
/// colon.
fn extract_dates(doc: &Html) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut opens_at = None;
    let mut closes_at = None;
    for li in doc.select(&LI_SEL) {
        let text = element_text(&li);
        let lower = text.to_lowercase();
        let Some((_, after)) = text.split_once(':') else { continue };
        if lower.contains("competition opens") {
            opens_at = parse_uk_datetime(after);
        } else if lower.contains("competition closes") {
            closes_at = parse_uk_datetime(after);
        }
    }
    (opens_at, closes_at)
}

/// "Project size" labels appear as dt/dd rows, bold labels with the
/// value after a colon, or a label with the value in the next
/// paragraph. Tried in that order.
fn extract_project_size(doc: &Html) -> Option<String> {
    for label in doc.select(&LABEL_SEL) {
        if !element_text(&label).to_lowercase().contains("project size") {
            continue;
        }
        if label.value().name() == "dt" {
            if let Some(dd) = label
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|s| s.value().name() == "dd")
            {
                return Some(clean_text(&element_text(&dd)));
            }
        }
        let Some(container) = label.parent().and_then(ElementRef::wrap) else { continue };
        let full = element_text(&container);
        if let Some((_, after)) = full.split_once(':') {
            return Some(after.trim().to_string());
        }
        for sib in container.next_siblings().filter_map(ElementRef::wrap) {
            if sib.value().name() == "p" {
                return Some(clean_text(&element_text(&sib)));
            }
            if let Some(p) = sib.select(&P_SEL).next() {
                return Some(clean_text(&element_text(&p)));
            }
        }
    }
    None
}

fn extract_funding_rules(text_all: &str) -> BTreeMap<String, f64> {
    let mut rules = BTreeMap::new();
    for (re, key, pct) in RULE_PROBES.iter() {
        if re.is_match(text_all) {
            rules.insert(key.to_string(), *pct);
        }
    }
    rules
}

/// Body of the "Description" subsection: paragraphs and lists after
/// the heading, up to the next h2/h3.
fn extract_description(doc: &Html) -> String {
    let header = doc
        .select(&HEADING_SEL)
        .find(|h| element_text(h).to_lowercase().contains("description"));
    let Some(header) = header else {
        return String::new();
    };
    let mut parts = Vec::new();
    for sib in header.next_siblings().filter_map(ElementRef::wrap) {
        let tag = sib.value().name();
        if tag == "h2" || tag == "h3" {
            break;
        }
        if matches!(tag, "p" | "ul" | "ol" | "div") {
            let text = clean_text(&element_text(&sib));
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    parts.join("\n\n")
}

fn page_text(doc: &Html) -> String {
    doc.root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BASE: &str = "https://apply-for-innovation-funding.service.gov.uk/competition/2101/overview";

    fn fixture(name: &str) -> Html {
        let raw = std::fs::read_to_string(format!("tests/fixtures/{name}")).unwrap();
        Html::parse_document(&raw)
    }

    #[test]
    fn ids_from_competition_path() {
        let (external, internal) = extract_ids(BASE);
        assert_eq!(external, "2101");
        assert_eq!(internal, "2101");
    }

    #[test]
    fn ids_fall_back_to_last_segment_and_hash() {
        let (external, internal) = extract_ids("https://example.org/funding/quantum-catalyst");
        assert_eq!(external, "quantum-catalyst");
        assert!(internal.starts_with("iuk_"));
        assert_eq!(internal.len(), "iuk_".len() + 16);
    }

    #[test]
    fn ids_ignore_non_numeric_competition_segment() {
        let (external, _) = extract_ids("https://example.org/competition/overview");
        assert_eq!(external, "overview");
    }

    #[test]
    fn meta_from_fixture() {
        let doc = fixture("competition.html");
        let page = extract_page_meta(&doc, BASE);
        assert_eq!(page.id, "2101");
        assert_eq!(page.external_id, "2101");
        assert_eq!(page.title, "Funding competition CleanTech Pioneers: round 2");
        assert_eq!(page.total_fund.as_deref(), Some("up to £5 million"));
        assert_eq!(page.project_size.as_deref(), Some("between £150,000 and £750,000"));
        assert!(page.description.contains("low-carbon manufacturing"));
    }

    #[test]
    fn dates_from_fixture_are_utc() {
        let doc = fixture("competition.html");
        let page = extract_page_meta(&doc, BASE);
        assert_eq!(page.opens_at, Some(Utc.with_ymd_and_hms(2025, 4, 9, 10, 0, 0).unwrap()));
        assert_eq!(page.closes_at, Some(Utc.with_ymd_and_hms(2025, 6, 25, 10, 0, 0).unwrap()));
    }

    #[test]
    fn funding_rules_from_fixture() {
        let doc = fixture("competition.html");
        let page = extract_page_meta(&doc, BASE);
        assert_eq!(page.funding_rules.get("micro_sme_max_pct"), Some(&0.60));
        assert_eq!(page.funding_rules.get("large_max_pct"), Some(&0.50));
        assert_eq!(page.funding_rules.get("research_max_pct"), Some(&0.70));
    }

    #[test]
    fn missing_title_uses_fallback() {
        let doc = Html::parse_document("<html><body><p>bare page</p></body></html>");
        let page = extract_page_meta(&doc, "https://example.org/competition/99/overview");
        assert_eq!(page.title, FALLBACK_TITLE);
        assert_eq!(page.id, "99");
        assert_eq!(page.opens_at, None);
        assert_eq!(page.closes_at, None);
        assert!(page.funding_rules.is_empty());
    }

    #[test]
    fn project_size_from_bold_label() {
        let doc = Html::parse_document(
            "<html><body><p><strong>Project size:</strong> up to £500,000</p></body></html>",
        );
        let page = extract_page_meta(&doc, BASE);
        assert_eq!(page.project_size.as_deref(), Some("up to £500,000"));
    }
}
