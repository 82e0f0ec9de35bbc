pub mod dates;
pub mod money;
pub mod normalize;
pub mod page;
pub mod resources;
pub mod segment;
pub mod status;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};

use page::{extract_page_meta, ProgramPage};
use resources::{collect_resources, Resource};
use segment::{segment, Section};

static MULTI_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());
static MULTI_NEWLINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Everything parsed out of one competition page.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub page: ProgramPage,
    pub sections: Vec<Section>,
    pub resources: Vec<Resource>,
}

/// Parse a fetched competition page. The DOM is built and dropped
/// inside this call; it is not Send and never crosses an await.
pub fn parse_page(html: &str, url: &str) -> ParsedPage {
    let doc = Html::parse_document(html);
    let page = extract_page_meta(&doc, url);
    let sections = segment(&doc, url);
    let resources = collect_resources(&doc, &sections, &page);
    ParsedPage { page, sections, resources }
}

/// Collapse runs of spaces and blank lines.
pub(crate) fn clean_text(text: &str) -> String {
    let spaced = MULTI_SPACE_RE.replace_all(text, " ");
    let collapsed = MULTI_NEWLINE_RE.replace_all(&spaced, "\n\n");
    collapsed.trim().to_string()
}

/// Whitespace-normalized text content of an element.
pub(crate) fn element_text(el: &ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Short stable id derived from a URL.
pub(crate) fn stable_id(prefix: &str, url: &str) -> String {
    format!("{prefix}{}", &sha256_hex(url)[..16])
}

// ── Tests ──
