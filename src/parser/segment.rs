use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::{clean_text, element_text};

static NAV_HEADING_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3, h4").unwrap());
static SUBHEAD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r##"a[href^="#"]"##).unwrap());
static ID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[id]").unwrap());
static UL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul").unwrap());

/// Content tags collected into a section body.
const BLOCK_TAGS: [&str; 7] = ["p", "ul", "ol", "div", "table", "dl", "details"];
/// When the anchor target is one of these, the body is its direct children.
const CONTAINER_TAGS: [&str; 3] = ["section", "div", "article"];
/// Tags collected by the no-navigation fallback.
const FALLBACK_BLOCK_TAGS: [&str; 6] = ["p", "ul", "ol", "div", "table", "dl"];

/// The canonical competition sections, in page order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionName {
    Summary,
    Eligibility,
    Scope,
    Dates,
    HowToApply,
    SupportingInformation,
}

impl SectionName {
    pub const ALL: [SectionName; 6] = [
        SectionName::Summary,
        SectionName::Eligibility,
        SectionName::Scope,
        SectionName::Dates,
        SectionName::HowToApply,
        SectionName::SupportingInformation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionName::Summary => "summary",
            SectionName::Eligibility => "eligibility",
            SectionName::Scope => "scope",
            SectionName::Dates => "dates",
            SectionName::HowToApply => "how-to-apply",
            SectionName::SupportingInformation => "supporting-information",
        }
    }

    /// Title-case form used in citation labels.
    pub fn display_name(&self) -> &'static str {
        match self {
            SectionName::Summary => "Summary",
            SectionName::Eligibility => "Eligibility",
            SectionName::Scope => "Scope",
            SectionName::Dates => "Dates",
            SectionName::HowToApply => "How-To-Apply",
            SectionName::SupportingInformation => "Supporting-Information",
        }
    }

    /// Match a navigation label or URL fragment to a canonical name.
    pub fn from_label(label: &str) -> Option<SectionName> {
        let norm = label.trim().to_lowercase();
        SectionName::ALL
            .into_iter()
            .find(|name| norm == name.as_str() || norm == name.as_str().replace('-', " "))
    }
}

/// One canonical section of a competition page.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: SectionName,
    pub url: String,
    pub html: String,
    pub text: String,
}

/// An in-page navigation link. Non-canonical entries never become
/// sections but still terminate the sections before them.
struct NavEntry {
    name: Option<SectionName>,
    fragment: String,
    label: String,
}

/// Split a competition page into its canonical sections.
///
/// Pages carry a "Competition sections" navigation list of fragment
/// links; each link's target anchors a section whose body runs until
/// the next entry's anchor or heading. Pages without the navigation
/// fall back to heading scanning. First occurrence wins when a name
/// appears twice.
pub fn segment(doc: &Html, base_url: &str) -> Vec<Section> {
    let entries = nav_entries(doc);
    if entries.is_empty() {
        return fallback_sections(doc, base_url);
    }

    let fragments: HashSet<&str> = entries.iter().map(|e| e.fragment.as_str()).collect();
    let mut seen: HashSet<SectionName> = HashSet::new();
    let mut out = Vec::new();
    for entry in &entries {
        let Some(name) = entry.name else { continue };
        if !seen.insert(name) {
            continue;
        }
        let Some(start) = find_section_start(doc, entry) else { continue };
        let blocks = collect_blocks(start, entry, &entries, &fragments);
        if blocks.is_empty() {
            continue;
        }
        out.push(section_from_blocks(name, base_url, &entry.fragment, &blocks));
    }
    out
}

/// Locate the "Competition sections" navigation list and read its
/// fragment links.
fn nav_entries(doc: &Html) -> Vec<NavEntry> {
    for heading in doc.select(&NAV_HEADING_SEL) {
        if !element_text(&heading).to_lowercase().contains("competition sections") {
            continue;
        }
        let Some(list) = following_list(&heading) else { continue };
        let mut entries = Vec::new();
        for a in list.select(&ANCHOR_SEL) {
            let Some(href) = a.value().attr("href") else { continue };
            let fragment = href.trim_start_matches('#').to_string();
            if fragment.is_empty() {
                continue;
            }
            let label = element_text(&a);
            let name = SectionName::from_label(&label).or_else(|| SectionName::from_label(&fragment));
            entries.push(NavEntry { name, fragment, label });
        }
        if !entries.is_empty() {
            return entries;
        }
    }
    Vec::new()
}

/// First list following the heading, either a direct sibling or nested
/// in a sibling div/nav. Gives up at the next heading.
fn following_list<'a>(heading: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    for sib in heading.next_siblings().filter_map(ElementRef::wrap) {
        match sib.value().name() {
            "ul" => return Some(sib),
            "div" | "nav" => {
                if let Some(list) = sib.select(&UL_SEL).next() {
                    return Some(list);
                }
            }
            "h2" | "h3" | "h4" => return None,
            _ => {}
        }
    }
    None
}

/// The element a nav entry points at: exact id match first, then an
/// h2/h3 whose text matches the link label in either direction.
fn find_section_start<'a>(doc: &'a Html, entry: &NavEntry) -> Option<ElementRef<'a>> {
    for el in doc.select(&ID_SEL) {
        if el.value().attr("id") == Some(entry.fragment.as_str()) {
            return Some(el);
        }
    }
    let label = entry.label.to_lowercase();
    if label.is_empty() {
        return None;
    }
    for el in doc.select(&SUBHEAD_SEL) {
        let text = element_text(&el).to_lowercase();
        if !text.is_empty() && (text.contains(&label) || label.contains(&text)) {
            return Some(el);
        }
    }
    None
}

fn collect_blocks<'a>(
    start: ElementRef<'a>,
    entry: &NavEntry,
    entries: &[NavEntry],
    fragments: &HashSet<&str>,
) -> Vec<ElementRef<'a>> {
    let mut blocks = Vec::new();
    if CONTAINER_TAGS.contains(&start.value().name()) {
        for child in start.children().filter_map(ElementRef::wrap) {
            if is_boundary(&child, entry, entries, fragments) {
                break;
            }
            if BLOCK_TAGS.contains(&child.value().name()) {
                blocks.push(child);
            }
        }
    } else {
        for sib in start.next_siblings().filter_map(ElementRef::wrap) {
            if is_boundary(&sib, entry, entries, fragments) {
                break;
            }
            if BLOCK_TAGS.contains(&sib.value().name()) {
                blocks.push(sib);
            }
        }
    }
    blocks
}

/// An element ends the current section when it anchors another nav
/// entry or is a subheading matching another entry's label.
fn is_boundary(el: &ElementRef, entry: &NavEntry, entries: &[NavEntry], fragments: &HashSet<&str>) -> bool {
    if let Some(id) = el.value().attr("id") {
        if id != entry.fragment && fragments.contains(id) {
            return true;
        }
    }
    let tag = el.value().name();
    if tag == "h2" || tag == "h3" {
        let text = element_text(el).to_lowercase();
        for other in entries {
            if other.fragment == entry.fragment {
                continue;
            }
            let label = other.label.to_lowercase();
            if !label.is_empty() && text.contains(&label) {
                return true;
            }
        }
    }
    false
}

fn section_from_blocks(
    name: SectionName,
    base_url: &str,
    fragment: &str,
    blocks: &[ElementRef],
) -> Section {
    let html = blocks.iter().map(|b| b.html()).collect::<Vec<_>>().join("\n");
    let text = clean_text(
        &blocks
            .iter()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
    );
    Section {
        name,
        url: format!("{base_url}#{fragment}"),
        html,
        text,
    }
}

/// Heading-scan fallback for pages without the navigation list. Each
/// canonical name is looked up by exact id, then by heading text with
/// dashes read as spaces; the body runs to the next h2/h3.
fn fallback_sections(doc: &Html, base_url: &str) -> Vec<Section> {
    let mut out = Vec::new();
    for name in SectionName::ALL {
        let Some(start) = fallback_header(doc, name) else { continue };
        let mut blocks = Vec::new();
        for sib in start.next_siblings().filter_map(ElementRef::wrap) {
            let tag = sib.value().name();
            if tag == "h2" || tag == "h3" {
                break;
            }
            if FALLBACK_BLOCK_TAGS.contains(&tag) {
                blocks.push(sib);
            }
        }
        if blocks.is_empty() {
            continue;
        }
        out.push(section_from_blocks(name, base_url, name.as_str(), &blocks));
    }
    out
}

fn fallback_header<'a>(doc: &'a Html, name: SectionName) -> Option<ElementRef<'a>> {
    let spaced = name.as_str().replace('-', " ");
    let mut by_text = None;
    for el in doc.select(&SUBHEAD_SEL) {
        if el.value().attr("id") == Some(name.as_str()) {
            return Some(el);
        }
        if by_text.is_none() && element_text(&el).to_lowercase().contains(&spaced) {
            by_text = Some(el);
        }
    }
    by_text
}

// ── Tests ──
