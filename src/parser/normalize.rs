use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::extract::{DocKind, ExtractedDocument};

use super::money::{parse_prize, parse_project_range, parse_total};
use super::page::ProgramPage;
use super::resources::{Resource, ResourceScope};
use super::segment::{Section, SectionName};
use super::status::{infer_status, Status};

pub const SOURCE: &str = "innovate_uk";

/// Typical share of the per-project maximum actually drawn down,
/// used to estimate winner counts.
pub const TYPICAL_DRAWDOWN: f64 = 0.70;

static TITLE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*funding competition\s*[:\-]?\s*").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const LOAN_HINTS: [&str; 3] = ["innovation loan", "loans for", "loan funding"];
const PRIZE_HINTS: [&str; 4] = ["challenge prize", "prize pot", "prize fund", "prize competition"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitionType {
    Grant,
    Loan,
    Prize,
}

impl CompetitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionType::Grant => "grant",
            CompetitionType::Loan => "loan",
            CompetitionType::Prize => "prize",
        }
    }

    pub fn parse(s: &str) -> Option<CompetitionType> {
        match s {
            "grant" => Some(CompetitionType::Grant),
            "loan" => Some(CompetitionType::Loan),
            "prize" => Some(CompetitionType::Prize),
            _ => None,
        }
    }
}

/// Canonical competition record.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub id: String,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub status: Status,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    pub total_fund_display: Option<String>,
    pub total_fund_gbp: Option<i64>,
    pub project_size_display: Option<String>,
    pub project_min_gbp: Option<i64>,
    pub project_max_gbp: Option<i64>,
    pub expected_winners: Option<i64>,
    pub competition_type: CompetitionType,
    pub funding_rules: BTreeMap<String, f64>,
    pub tags: Vec<String>,
}

impl Grant {
    pub fn is_active(&self) -> bool {
        self.status == Status::Open
    }
}

/// One retrievable unit of text tied to a grant: a page section or an
/// extracted document. Replaced wholesale on re-ingestion, never
/// mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexableDoc {
    pub id: String,
    pub grant_id: String,
    pub kind: String,
    pub section_name: Option<String>,
    pub text: String,
    pub source_url: String,
    pub citation: String,
    pub scope: ResourceScope,
    pub resource_id: Option<String>,
}

/// Build the canonical grant and its indexable documents from one
/// parsed page.
///
/// `now` is the reference instant for status inference; callers pass
/// `Utc::now()` outside tests.
pub fn normalize(
    page: &ProgramPage,
    sections: &[Section],
    resources: &[Resource],
    documents: &[ExtractedDocument],
    now: DateTime<Utc>,
) -> (Grant, Vec<IndexableDoc>) {
    let title = clean_title(&page.title);
    let competition_type = detect_competition_type(&title, &page.description);

    let (total_fund_display, total_fund_gbp) = match &page.total_fund {
        Some(raw) => parse_total(raw),
        None => (None, None),
    };
    let (project_min_gbp, project_max_gbp, project_size_display) = project_funding(page, sections);

    let mut grant = Grant {
        id: format!("{SOURCE}_{}", page.id),
        source: SOURCE.to_string(),
        external_id: page.external_id.clone(),
        title,
        description: page.description.clone(),
        url: page.url.clone(),
        status: infer_status(page.opens_at, page.closes_at, now),
        opens_at: page.opens_at,
        closes_at: page.closes_at,
        expected_winners: expected_winners(total_fund_gbp, project_max_gbp),
        total_fund_display,
        total_fund_gbp,
        project_size_display,
        project_min_gbp,
        project_max_gbp,
        competition_type,
        funding_rules: page.funding_rules.clone(),
        tags: build_tags(page),
    };

    let docs = index_documents(&grant.id, page, sections, resources, documents);
    apply_prize_fallback(&mut grant, page, sections);
    (grant, docs)
}

/// Strip the "Funding competition" site prefix and collapse whitespace.
pub fn clean_title(raw: &str) -> String {
    let stripped = TITLE_PREFIX_RE.replace(raw, "");
    SPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Keyword precedence: loan indicators first, then prize, else grant.
fn detect_competition_type(title: &str, description: &str) -> CompetitionType {
    let title = title.to_lowercase();
    let desc = description.to_lowercase();
    if title.contains("loan") || LOAN_HINTS.iter().any(|h| desc.contains(h)) {
        return CompetitionType::Loan;
    }
    if title.contains("prize") || PRIZE_HINTS.iter().any(|h| desc.contains(h)) {
        return CompetitionType::Prize;
    }
    CompetitionType::Grant
}

/// Per-project bounds: the project-size field takes priority, with all
/// section text as the fallback search domain. The display string stays
/// verbatim when the page stated one.
fn project_funding(page: &ProgramPage, sections: &[Section]) -> (Option<i64>, Option<i64>, Option<String>) {
    if let Some(raw) = &page.project_size {
        let (min, max, _) = parse_project_range(raw);
        if min.is_some() || max.is_some() {
            return (min, max, Some(raw.clone()));
        }
        let (min, max, _) = parse_project_range(&joined_section_text(sections));
        return (min, max, Some(raw.clone()));
    }
    parse_project_range(&joined_section_text(sections))
}

fn joined_section_text(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn expected_winners(total_fund_gbp: Option<i64>, project_max_gbp: Option<i64>) -> Option<i64> {
    let total = total_fund_gbp?;
    let max = project_max_gbp?;
    if total <= 0 || max <= 0 {
        return None;
    }
    let typical = (max as f64 * TYPICAL_DRAWDOWN) as i64;
    if typical <= 0 {
        return None;
    }
    Some(total / typical)
}

fn build_tags(page: &ProgramPage) -> Vec<String> {
    let mut tags = vec!["innovate_uk".to_string()];
    if let Some(fund) = &page.total_fund {
        let lower = fund.to_lowercase();
        if lower.contains("million") {
            tags.push("large_fund".to_string());
        } else if lower.contains("thousand") {
            tags.push("small_fund".to_string());
        }
    }
    if let Some(size) = &page.project_size {
        let lower = size.to_lowercase();
        if lower.contains("million") {
            tags.push("large_project".to_string());
        } else if lower.contains("thousand") {
            tags.push("small_project".to_string());
        }
    }
    if page.opens_at.is_some() && page.closes_at.is_some() {
        tags.push("dated".to_string());
    } else {
        tags.push("rolling".to_string());
    }
    tags
}

/// When the primary grammar found no total, re-scan the description
/// and then each section with the prize grammar and adopt the first
/// match. Funding only; the competition type is not revisited.
fn apply_prize_fallback(grant: &mut Grant, page: &ProgramPage, sections: &[Section]) {
    if grant.total_fund_gbp.is_some() {
        return;
    }
    let found = parse_prize(&page.description)
        .or_else(|| sections.iter().find_map(|s| parse_prize(&s.text)));
    if let Some((display, amount)) = found {
        grant.total_fund_display = Some(display);
        grant.total_fund_gbp = Some(amount);
    }
}

fn index_documents(
    grant_id: &str,
    page: &ProgramPage,
    sections: &[Section],
    resources: &[Resource],
    documents: &[ExtractedDocument],
) -> Vec<IndexableDoc> {
    let mut docs = Vec::with_capacity(sections.len() + documents.len());

    for section in sections {
        if section.text.is_empty() {
            continue;
        }
        docs.push(IndexableDoc {
            id: format!("{grant_id}_section_{}", section.name.as_str()),
            grant_id: grant_id.to_string(),
            kind: "competition_section".to_string(),
            section_name: Some(section.name.as_str().to_string()),
            text: section.text.clone(),
            source_url: section.url.clone(),
            citation: format!("{} - {} Section", page.title, section.name.display_name()),
            scope: ResourceScope::Program,
            resource_id: None,
        });
    }

    for doc in documents {
        let section_name = doc.program_id.as_ref().map(|_| match doc.kind {
            DocKind::Briefing => "briefing".to_string(),
            DocKind::Guidance => "supporting_information".to_string(),
        });
        let scope = if doc.program_id.is_some() {
            ResourceScope::Program
        } else {
            ResourceScope::Global
        };
        let label = resources
            .iter()
            .find(|r| r.id == doc.resource_id)
            .and_then(|r| r.title.clone())
            .unwrap_or_else(|| doc.source_url.clone());
        docs.push(IndexableDoc {
            id: format!("{grant_id}_doc_{}", doc.id),
            grant_id: grant_id.to_string(),
            kind: doc.kind.as_str().to_string(),
            section_name,
            text: doc.text.clone(),
            source_url: doc.source_url.clone(),
            citation: format!("{} - {}", page.title, label),
            scope,
            resource_id: Some(doc.resource_id.clone()),
        });
    }

    docs
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::resources::ResourceKind;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
    }

    fn page() -> ProgramPage {
        ProgramPage {
            id: "2101".to_string(),
            external_id: "2101".to_string(),
            title: "Funding competition CleanTech Pioneers: round 2".to_string(),
            url: "https://apply-for-innovation-funding.service.gov.uk/competition/2101/overview"
                .to_string(),
            description: "Funding for low-carbon manufacturing projects.".to_string(),
            opens_at: Some(utc(2025, 4, 9)),
            closes_at: Some(utc(2025, 6, 25)),
            total_fund: Some("up to £5 million".to_string()),
            project_size: Some("between £150,000 and £750,000".to_string()),
            funding_rules: BTreeMap::new(),
        }
    }

    fn section(name: SectionName, text: &str) -> Section {
        Section {
            name,
            url: format!("https://example.org/competition/2101/overview#{}", name.as_str()),
            html: format!("<p>{text}</p>"),
            text: text.to_string(),
        }
    }

    fn extracted(id_url: &str, program_id: Option<&str>, kind: DocKind) -> ExtractedDocument {
        ExtractedDocument {
            id: crate::parser::stable_id("doc_", id_url),
            program_id: program_id.map(str::to_string),
            resource_id: crate::parser::stable_id("res_", id_url),
            kind,
            source_url: id_url.to_string(),
            text: "Some extracted body text.".to_string(),
            content_hash: "hash".to_string(),
        }
    }

    #[test]
    fn title_prefix_stripped() {
        assert_eq!(
            clean_title("Funding competition\n  DRIVE35: Scale-up"),
            "DRIVE35: Scale-up"
        );
        assert_eq!(clean_title("Funding competition: Alpha"), "Alpha");
        assert_eq!(clean_title("Plain title"), "Plain title");
    }

    #[test]
    fn grant_fields_from_page() {
        let (grant, _) = normalize(&page(), &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.id, "innovate_uk_2101");
        assert_eq!(grant.source, "innovate_uk");
        assert_eq!(grant.title, "CleanTech Pioneers: round 2");
        assert_eq!(grant.status, Status::Open);
        assert!(grant.is_active());
        assert_eq!(grant.total_fund_display.as_deref(), Some("up to £5 million"));
        assert_eq!(grant.total_fund_gbp, Some(5_000_000));
        assert_eq!(grant.project_min_gbp, Some(150_000));
        assert_eq!(grant.project_max_gbp, Some(750_000));
        assert_eq!(
            grant.project_size_display.as_deref(),
            Some("between £150,000 and £750,000")
        );
        assert_eq!(grant.competition_type, CompetitionType::Grant);
    }

    #[test]
    fn expected_winner_count() {
        // 5,000,000 / (750,000 * 0.70) = 9.52 → 9
        let (grant, _) = normalize(&page(), &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.expected_winners, Some(9));

        let mut no_total = page();
        no_total.total_fund = None;
        let (grant, _) = normalize(&no_total, &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.expected_winners, None);
    }

    #[test]
    fn loan_detection_precedes_prize() {
        let mut p = page();
        p.title = "Innovation loan prize round".to_string();
        let (grant, _) = normalize(&p, &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.competition_type, CompetitionType::Loan);

        p.title = "Plain title".to_string();
        p.description = "Apply for innovation loan funding.".to_string();
        let (grant, _) = normalize(&p, &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.competition_type, CompetitionType::Loan);
    }

    #[test]
    fn prize_detection_from_description() {
        let mut p = page();
        p.description = "Winners receive a share of a £1 million prize pot.".to_string();
        p.total_fund = None;
        let (grant, _) = normalize(&p, &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.competition_type, CompetitionType::Prize);
        assert_eq!(grant.total_fund_display.as_deref(), Some("share of a £1 million prize pot"));
        assert_eq!(grant.total_fund_gbp, Some(1_000_000));
    }

    #[test]
    fn prize_fallback_from_sections_sets_funding_only() {
        let mut p = page();
        p.total_fund = None;
        let sections = [section(SectionName::Summary, "The best entries get £250k each.")];
        let (grant, _) = normalize(&p, &sections, &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.total_fund_gbp, Some(250_000));
        assert_eq!(grant.competition_type, CompetitionType::Grant);
    }

    #[test]
    fn primary_total_suppresses_prize_fallback() {
        let mut p = page();
        p.description = "a share of a £1 million prize pot".to_string();
        let (grant, _) = normalize(&p, &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.total_fund_gbp, Some(5_000_000));
    }

    #[test]
    fn project_bounds_fall_back_to_section_text() {
        let mut p = page();
        p.project_size = None;
        let sections = [section(
            SectionName::Eligibility,
            "Your project's total costs must be between £150,000 and £750,000.",
        )];
        let (grant, _) = normalize(&p, &sections, &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.project_min_gbp, Some(150_000));
        assert_eq!(grant.project_max_gbp, Some(750_000));
        assert_eq!(grant.project_size_display.as_deref(), Some("£150,000 to £750,000"));
    }

    #[test]
    fn tags_reflect_metadata() {
        let (grant, _) = normalize(&page(), &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.tags, ["innovate_uk", "large_fund", "dated"]);

        let mut undated = page();
        undated.opens_at = None;
        undated.closes_at = None;
        undated.total_fund = Some("a £900 thousand fund".to_string());
        undated.project_size = Some("up to £2 million".to_string());
        let (grant, _) = normalize(&undated, &[], &[], &[], utc(2025, 5, 1));
        assert_eq!(grant.tags, ["innovate_uk", "small_fund", "large_project", "rolling"]);
    }

    #[test]
    fn section_documents_carry_citations() {
        let sections = [
            section(SectionName::Summary, "Summary text."),
            section(SectionName::HowToApply, "Apply online."),
        ];
        let (_, docs) = normalize(&page(), &sections, &[], &[], utc(2025, 5, 1));
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "innovate_uk_2101_section_summary");
        assert_eq!(docs[0].kind, "competition_section");
        assert_eq!(docs[0].scope, ResourceScope::Program);
        assert_eq!(
            docs[0].citation,
            "Funding competition CleanTech Pioneers: round 2 - Summary Section"
        );
        assert_eq!(
            docs[1].citation,
            "Funding competition CleanTech Pioneers: round 2 - How-To-Apply Section"
        );
    }

    #[test]
    fn extracted_documents_carry_scope_and_labels() {
        let briefing_url =
            "https://apply-for-innovation-funding.service.gov.uk/competition/2101/download/4876";
        let briefing = extracted(briefing_url, Some("2101"), DocKind::Briefing);
        let resources = [Resource {
            id: briefing.resource_id.clone(),
            url: briefing_url.to_string(),
            title: Some("competition briefing slides.pdf".to_string()),
            program_id: Some("2101".to_string()),
            scope: ResourceScope::Program,
            kind: ResourceKind::Document,
            content_hash: None,
        }];
        let guidance = extracted("https://www.gov.uk/guidance/applying", None, DocKind::Guidance);

        let (_, docs) = normalize(&page(), &[], &resources, &[briefing.clone(), guidance], utc(2025, 5, 1));
        assert_eq!(docs.len(), 2);

        let b = &docs[0];
        assert_eq!(b.id, format!("innovate_uk_2101_doc_{}", briefing.id));
        assert_eq!(b.kind, "briefing_document");
        assert_eq!(b.section_name.as_deref(), Some("briefing"));
        assert_eq!(b.scope, ResourceScope::Program);
        assert_eq!(
            b.citation,
            "Funding competition CleanTech Pioneers: round 2 - competition briefing slides.pdf"
        );

        let g = &docs[1];
        assert_eq!(g.section_name, None);
        assert_eq!(g.scope, ResourceScope::Global);
        assert_eq!(
            g.citation,
            "Funding competition CleanTech Pioneers: round 2 - https://www.gov.uk/guidance/applying"
        );
    }
}
