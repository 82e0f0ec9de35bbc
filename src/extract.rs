use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::parser::resources::{Resource, ResourceKind};
use crate::parser::{clean_text, element_text, sha256_hex};

static TEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, li, h1, h2, h3, div").unwrap());
static NESTED_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, li, h1, h2, h3, div, script, style").unwrap());

/// Skip boilerplate shorter than this when flattening HTML to text.
const MIN_BLOCK_CHARS: usize = 20;

/// Run-scoped content dedup, shared across concurrent page tasks.
/// Seeded with hashes from earlier runs so re-fetched files do not
/// produce duplicate documents.
pub struct DedupContext {
    seen: Mutex<HashSet<String>>,
}

impl DedupContext {
    pub fn new() -> Self {
        DedupContext { seen: Mutex::new(HashSet::new()) }
    }

    pub fn with_hashes<I: IntoIterator<Item = String>>(hashes: I) -> Self {
        DedupContext {
            seen: Mutex::new(hashes.into_iter().collect()),
        }
    }

    /// Record a hash, returning true when it was not seen before.
    pub fn insert(&self, hash: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash.to_string())
    }

    pub fn unique_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for DedupContext {
    fn default() -> Self {
        DedupContext::new()
    }
}

/// What a fetched resource turned out to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    /// PDF payload, typically competition briefing slides.
    Briefing,
    /// HTML payload, typically shared guidance pages.
    Guidance,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Briefing => "briefing_document",
            DocKind::Guidance => "guidance",
        }
    }

    pub fn parse(s: &str) -> Option<DocKind> {
        match s {
            "briefing_document" => Some(DocKind::Briefing),
            "guidance" => Some(DocKind::Guidance),
            _ => None,
        }
    }
}

/// Text extracted from one fetched resource.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub id: String,
    pub program_id: Option<String>,
    pub resource_id: String,
    pub kind: DocKind,
    pub source_url: String,
    pub text: String,
    pub content_hash: String,
}

/// Turn fetched bytes into a document, or None for videos, duplicate
/// content and payloads yielding no text. The hash covers the cleaned
/// text rather than the bytes, so the same guidance served behind
/// different page chrome still dedups; the document id is derived from
/// that hash. A duplicate resource still gets the hash recorded,
/// linking it to the surviving document's content.
pub fn extract_document(
    resource: &mut Resource,
    bytes: &[u8],
    content_type: Option<&str>,
    ctx: &DedupContext,
) -> Option<ExtractedDocument> {
    if resource.kind == ResourceKind::Video {
        return None;
    }

    let (text, kind) = if is_pdf_content(bytes, content_type) {
        (extract_pdf_text(bytes, &resource.url)?, DocKind::Briefing)
    } else {
        (extract_html_text(bytes), DocKind::Guidance)
    };

    let text = clean_text(&text);
    if text.is_empty() {
        return None;
    }

    let content_hash = sha256_hex(&text);
    resource.content_hash = Some(content_hash.clone());
    if !ctx.insert(&content_hash) {
        debug!("Skipping duplicate content at {}", resource.url);
        return None;
    }

    Some(ExtractedDocument {
        id: format!("doc_{}", &content_hash[..16]),
        program_id: resource.program_id.clone(),
        resource_id: resource.id.clone(),
        kind,
        source_url: resource.url.clone(),
        text,
        content_hash,
    })
}

/// PDF when the Content-Type header says so or the payload opens with
/// the %PDF- magic.
fn is_pdf_content(bytes: &[u8], content_type: Option<&str>) -> bool {
    if content_type.map_or(false, |ct| ct.to_lowercase().contains("application/pdf")) {
        return true;
    }
    bytes.starts_with(b"%PDF-")
}

fn extract_pdf_text(bytes: &[u8], url: &str) -> Option<String> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("PDF text extraction failed for {}: {}", url, e);
            None
        }
    }
}

fn extract_html_text(bytes: &[u8]) -> String {
    let html = String::from_utf8_lossy(bytes);
    html_to_text(&html)
}

/// Flatten an HTML page to plain text: content blocks outside
/// nav/footer/aside chrome, keeping only leaf divs so nested markup is
/// not emitted twice.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts = Vec::new();
    for el in doc.select(&TEXT_SEL) {
        let in_chrome = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| matches!(a.value().name(), "nav" | "footer" | "aside"));
        if in_chrome {
            continue;
        }
        if el.value().name() == "div" && el.select(&NESTED_SEL).next().is_some() {
            continue;
        }
        let text = element_text(&el);
        if text.chars().count() > MIN_BLOCK_CHARS {
            parts.push(text);
        }
    }
    parts.join("\n\n")
}

// ── Tests ──
