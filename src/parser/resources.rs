use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::page::ProgramPage;
use super::segment::{Section, SectionName};
use super::{element_text, stable_id};

static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static SUBHEAD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3").unwrap());

const SKIP_SCHEMES: [&str; 3] = ["mailto:", "tel:", "javascript:"];
const VIDEO_DOMAINS: [&str; 5] = ["youtube.com", "youtu.be", "vimeo.com", "webex.com", "zoom.us"];
const OFFICE_EXTENSIONS: [&str; 4] = [".doc", ".docx", ".ppt", ".pptx"];

/// Whether a resource belongs to one competition or is shared guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    Program,
    Global,
}

impl ResourceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceScope::Program => "program",
            ResourceScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Video,
    Webpage,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Video => "video",
            ResourceKind::Webpage => "webpage",
            ResourceKind::Other => "other",
        }
    }
}

/// A link harvested from the supporting-information section.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    /// Set when the resource is scoped to the discovering competition.
    pub program_id: Option<String>,
    pub scope: ResourceScope,
    pub kind: ResourceKind,
    /// Hash of fetched content, filled in by the document extractor.
    pub content_hash: Option<String>,
}

/// Kind rules, highest priority first, matched on lowercased URL and
/// link text.
const KIND_RULES: [(fn(&str, &str) -> bool, ResourceKind); 6] = [
    (is_pdf_url, ResourceKind::Document),
    (is_download_endpoint, ResourceKind::Document),
    (is_pdf_text, ResourceKind::Document),
    (is_video_host, ResourceKind::Video),
    (is_office_doc, ResourceKind::Document),
    (is_http, ResourceKind::Webpage),
];

fn is_pdf_url(url: &str, _text: &str) -> bool {
    url.ends_with(".pdf")
}

fn is_download_endpoint(url: &str, _text: &str) -> bool {
    url.contains("/download/") && url.contains("competition")
}

fn is_pdf_text(_url: &str, text: &str) -> bool {
    text.contains(".pdf")
}

fn is_video_host(url: &str, _text: &str) -> bool {
    VIDEO_DOMAINS.iter().any(|d| url.contains(d))
}

fn is_office_doc(url: &str, _text: &str) -> bool {
    OFFICE_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
}

fn is_http(url: &str, _text: &str) -> bool {
    url.starts_with("http")
}

/// Resource kind from URL and link text. Download endpoints under a
/// competition path serve PDFs, and office formats count as documents.
pub fn infer_kind(url: &str, link_text: Option<&str>) -> ResourceKind {
    let lower_url = url.to_lowercase();
    let lower_text = link_text.unwrap_or("").to_lowercase();
    KIND_RULES
        .iter()
        .find(|(matches, _)| matches(&lower_url, &lower_text))
        .map(|(_, kind)| *kind)
        .unwrap_or(ResourceKind::Other)
}

/// Program scope when the URL path carries the competition's external
/// id, or lives under /competition/ on the application service.
pub fn classify_scope(url: &str, page: &ProgramPage) -> ResourceScope {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return ResourceScope::Global,
    };
    let path = parsed.path().to_lowercase();
    if !page.external_id.is_empty()
        && page.external_id != "unknown"
        && path.contains(&page.external_id.to_lowercase())
    {
        return ResourceScope::Program;
    }
    if parsed
        .host_str()
        .map_or(false, |h| h.contains("apply-for-innovation-funding.service.gov.uk"))
        && path.contains("/competition/")
    {
        return ResourceScope::Program;
    }
    ResourceScope::Global
}

/// Harvest resources from the supporting-information section, falling
/// back to a whole-page scan below the "Supporting information"
/// heading. Links are kept whatever their kind; only junk schemes,
/// in-page fragments and duplicates are dropped.
pub fn collect_resources(doc: &Html, sections: &[Section], page: &ProgramPage) -> Vec<Resource> {
    let supporting = sections
        .iter()
        .find(|s| s.name == SectionName::SupportingInformation);
    match supporting {
        Some(section) if !section.html.is_empty() => {
            let fragment = Html::parse_fragment(&section.html);
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            collect_links(fragment.root_element(), page, &mut seen, &mut out);
            out
        }
        _ => fallback_resources(doc, page),
    }
}

fn fallback_resources(doc: &Html, page: &ProgramPage) -> Vec<Resource> {
    let header = doc
        .select(&SUBHEAD_SEL)
        .find(|h| element_text(h).to_lowercase().contains("supporting information"));
    let Some(header) = header else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for sib in header.next_siblings().filter_map(ElementRef::wrap) {
        let tag = sib.value().name();
        if tag == "h2" || tag == "h3" {
            break;
        }
        collect_links(sib, page, &mut seen, &mut out);
    }
    out
}

fn collect_links(
    root: ElementRef,
    page: &ProgramPage,
    seen: &mut HashSet<String>,
    out: &mut Vec<Resource>,
) {
    for a in root.select(&LINK_SEL) {
        let Some(href) = a.value().attr("href") else { continue };
        let text = element_text(&a);
        let link_text = if text.is_empty() { None } else { Some(text.as_str()) };
        if let Some(res) = resource_from_link(href, link_text, page, seen) {
            out.push(res);
        }
    }
}

/// Build a resource from one link, or None for junk and duplicates.
pub fn resource_from_link(
    href: &str,
    link_text: Option<&str>,
    page: &ProgramPage,
    seen: &mut HashSet<String>,
) -> Option<Resource> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if SKIP_SCHEMES.iter().any(|s| href.starts_with(s)) {
        return None;
    }

    let full_url = Url::parse(&page.url).and_then(|base| base.join(href)).ok()?.to_string();
    if !seen.insert(full_url.clone()) {
        return None;
    }

    let scope = classify_scope(&full_url, page);
    let kind = infer_kind(&full_url, link_text);
    Some(Resource {
        id: stable_id("res_", &full_url),
        url: full_url,
        title: link_text.map(str::to_string),
        program_id: (scope == ResourceScope::Program).then(|| page.id.clone()),
        scope,
        kind,
        content_hash: None,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::page::extract_page_meta;
    use crate::parser::segment::segment;

    const BASE: &str = "https://apply-for-innovation-funding.service.gov.uk/competition/2101/overview";

    fn fixture(name: &str) -> Html {
        let raw = std::fs::read_to_string(format!("tests/fixtures/{name}")).unwrap();
        Html::parse_document(&raw)
    }

    fn page_at(url: &str) -> ProgramPage {
        let doc = Html::parse_document("<html><body></body></html>");
        extract_page_meta(&doc, url)
    }

    #[test]
    fn kind_priority_order() {
        assert_eq!(infer_kind("https://x.org/briefing.PDF", None), ResourceKind::Document);
        assert_eq!(
            infer_kind("https://svc.gov.uk/competition/2101/download/4876", None),
            ResourceKind::Document
        );
        assert_eq!(
            infer_kind("https://x.org/view", Some("Briefing slides.pdf")),
            ResourceKind::Document
        );
        assert_eq!(
            infer_kind("https://www.youtube.com/watch?v=abc", None),
            ResourceKind::Video
        );
        assert_eq!(infer_kind("https://x.org/deck.pptx", None), ResourceKind::Document);
        assert_eq!(infer_kind("https://www.gov.uk/guidance", None), ResourceKind::Webpage);
        assert_eq!(infer_kind("ftp://x.org/file", None), ResourceKind::Other);
    }

    #[test]
    fn scope_from_external_id_in_path() {
        let page = page_at(BASE);
        assert_eq!(
            classify_scope("https://elsewhere.org/files/2101-brief.pdf", &page),
            ResourceScope::Program
        );
        assert_eq!(classify_scope("https://www.gov.uk/guidance", &page), ResourceScope::Global);
    }

    #[test]
    fn scope_from_service_competition_path() {
        let page = page_at("https://example.org/funding/alpha");
        assert_eq!(
            classify_scope(
                "https://apply-for-innovation-funding.service.gov.uk/competition/900/overview",
                &page
            ),
            ResourceScope::Program
        );
    }

    #[test]
    fn unknown_external_id_never_scopes() {
        let page = page_at("https://example.org/");
        assert_eq!(page.external_id, "unknown");
        assert_eq!(
            classify_scope("https://example.org/unknown/file.pdf", &page),
            ResourceScope::Global
        );
    }

    #[test]
    fn resources_from_fixture_section() {
        let doc = fixture("competition.html");
        let page = extract_page_meta(&doc, BASE);
        let sections = segment(&doc, BASE);
        let resources = collect_resources(&doc, &sections, &page);

        assert_eq!(resources.len(), 3);
        let briefing = &resources[0];
        assert_eq!(
            briefing.url,
            "https://apply-for-innovation-funding.service.gov.uk/competition/2101/download/4876"
        );
        assert_eq!(briefing.kind, ResourceKind::Document);
        assert_eq!(briefing.scope, ResourceScope::Program);
        assert_eq!(briefing.program_id.as_deref(), Some("2101"));
        assert!(briefing.id.starts_with("res_"));

        assert_eq!(resources[1].kind, ResourceKind::Video);
        assert_eq!(resources[1].scope, ResourceScope::Global);
        assert_eq!(resources[2].kind, ResourceKind::Webpage);
    }

    #[test]
    fn junk_links_and_duplicates_skipped() {
        let page = page_at(BASE);
        let mut seen = HashSet::new();
        assert!(resource_from_link("#summary", None, &page, &mut seen).is_none());
        assert!(resource_from_link("mailto:support@iuk.ukri.org", None, &page, &mut seen).is_none());
        assert!(resource_from_link("tel:0300123", None, &page, &mut seen).is_none());
        assert!(resource_from_link("", None, &page, &mut seen).is_none());
        assert!(resource_from_link("/guidance", None, &page, &mut seen).is_some());
        assert!(resource_from_link("/guidance", None, &page, &mut seen).is_none());
    }

    #[test]
    fn relative_links_resolve_against_page() {
        let page = page_at(BASE);
        let mut seen = HashSet::new();
        let res = resource_from_link("slides.pdf", Some("slides"), &page, &mut seen).unwrap();
        assert_eq!(
            res.url,
            "https://apply-for-innovation-funding.service.gov.uk/competition/2101/slides.pdf"
        );
    }

    #[test]
    fn fallback_scan_below_heading() {
        let doc = Html::parse_document(
            r#"<html><body>
            <h2>Supporting information</h2>
            <div><a href="https://www.gov.uk/a">Guidance A</a></div>
            <p><a href="https://www.gov.uk/b">Guidance B</a></p>
            <h2>Contact</h2>
            <p><a href="https://www.gov.uk/c">Not a resource</a></p>
            </body></html>"#,
        );
        let page = page_at("https://example.org/funding/alpha");
        let resources = collect_resources(&doc, &[], &page);
        let urls: Vec<&str> = resources.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, ["https://www.gov.uk/a", "https://www.gov.uk/b"]);
    }
}
