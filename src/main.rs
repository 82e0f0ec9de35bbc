mod db;
mod extract;
mod fetcher;
mod parser;
mod urls;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, Subcommand};
use reqwest::Client;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::warn;

use extract::{DedupContext, DocKind, ExtractedDocument};
use parser::normalize::{normalize, Grant, IndexableDoc};
use parser::resources::{Resource, ResourceKind};
use parser::segment::Section;

#[derive(Parser)]
#[command(name = "iuk_scraper", about = "Innovate UK funding competition scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load competition URLs into the queue
    Init {
        /// Seed file with one competition URL per line
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Fetch unvisited competition pages
    Scrape {
        /// Max pages to fetch (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Concurrent requests
        #[arg(short, long, default_value = "4")]
        concurrency: usize,
    },
    /// Parse, extract and normalize scraped pages
    Process {
        /// Max pages to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Concurrent pages in flight
        #[arg(short, long, default_value = "4")]
        concurrency: usize,
    },
    /// Init + scrape + process in one pipeline
    Run {
        /// Seed file with one competition URL per line
        #[arg(short, long)]
        file: PathBuf,
        /// Max pages to fetch+process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Concurrent requests
        #[arg(short, long, default_value = "4")]
        concurrency: usize,
    },
    /// Re-run parsing and normalization over stored HTML, no refetching
    Renormalize {
        /// Max pages to renormalize (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show pipeline statistics
    Stats,
    /// Grants overview table
    Overview {
        /// Only open competitions
        #[arg(short, long)]
        active: bool,
        /// Filter by competition type (grant, loan, prize)
        #[arg(short = 't', long)]
        competition_type: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { file } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = urls::load_url_file(&file)?;
            let inserted = db::insert_pages(&conn, &pages)?;
            println!("Queued {} new competition URLs ({} in file)", inserted, pages.len());
            Ok(())
        }
        Commands::Scrape { limit, concurrency } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first or all pages are fetched.");
                return Ok(());
            }
            println!("Fetching {} pages (streaming to DB)...", pages.len());
            let client = fetcher::build_client()?;
            let stats = fetcher::scrape_pages_streaming(&conn, client, pages, concurrency).await?;
            println!(
                "Done: {} fetched ({} ok, {} errors).",
                stats.total, stats.ok, stats.errors
            );
            Ok(())
        }
        Commands::Process { limit, concurrency } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_unprocessed(&conn, limit)?;
            if pages.is_empty() {
                println!("No unprocessed pages. Run 'scrape' first.");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let client = fetcher::build_client()?;
            let counts = process_pages(&conn, client, pages, concurrency).await?;
            counts.print();
            Ok(())
        }
        Commands::Run { file, limit, concurrency } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let seeds = urls::load_url_file(&file)?;
            let inserted = db::insert_pages(&conn, &seeds)?;
            println!("Queued {} new competition URLs", inserted);

            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages.");
                return Ok(());
            }

            // Phase 1: fetch (streaming to DB)
            let t_scrape = Instant::now();
            println!("Pipeline: fetching {} pages (streaming to DB)...", pages.len());
            let client = fetcher::build_client()?;
            let stats =
                fetcher::scrape_pages_streaming(&conn, client.clone(), pages, concurrency).await?;
            println!(
                "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                stats.total,
                stats.ok,
                stats.errors,
                t_scrape.elapsed().as_secs_f64()
            );

            // Phase 2: process
            let t_process = Instant::now();
            let unprocessed = db::fetch_unprocessed(&conn, None)?;
            if unprocessed.is_empty() {
                println!("Nothing to process (all fetched pages had errors).");
                return Ok(());
            }
            println!("Processing {} pages...", unprocessed.len());
            let counts = process_pages(&conn, client, unprocessed, concurrency).await?;
            println!("Processed in {:.1}s", t_process.elapsed().as_secs_f64());
            counts.print();
            Ok(())
        }
        Commands::Renormalize { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_processed_pages(&conn, limit)?;
            if pages.is_empty() {
                println!("No stored pages. Run 'scrape' first.");
                return Ok(());
            }
            println!("Renormalizing {} pages from stored HTML...", pages.len());
            let counts = renormalize_pages(&conn, &pages)?;
            counts.print();
            Ok(())
        }
        Commands::Overview { active, competition_type, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, active, competition_type.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No grants found.");
                return Ok(());
            }

            // Compact, readable table
            println!(
                "{:>3} | {:<36} | {:<5} | {:<11} | {:<20} | {:<24} | {:<10} | {:>7}",
                "#", "Competition", "Type", "Status", "Total fund", "Project size", "Closes", "Winners"
            );
            println!("{}", "-".repeat(137));

            for (i, r) in rows.iter().enumerate() {
                let title = truncate(&r.title, 36);
                let fund = truncate(&r.total_fund, 20);
                let project = truncate(&r.project_size, 24);
                let closes = if r.closes_at.len() >= 10 { &r.closes_at[..10] } else { "-" };
                let winners = r.expected_winners.map_or("-".to_string(), |w| w.to_string());

                println!(
                    "{:>3} | {:<36} | {:<5} | {:<11} | {:<20} | {:<24} | {:<10} | {:>7}",
                    i + 1,
                    title,
                    r.competition_type,
                    r.status,
                    fund,
                    project,
                    closes,
                    winners
                );
            }

            // Tags summary (separate section to avoid clutter)
            let with_tags: Vec<_> = rows.iter().filter(|r| !r.tags.is_empty()).collect();
            if !with_tags.is_empty() {
                println!("\n--- Tags ---");
                for r in &with_tags {
                    println!("  {}: {}", truncate(&r.id, 36), r.tags);
                }
            }

            println!("\n{} grants", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Pages:     {}", s.total);
            println!("Visited:   {}", s.visited);
            println!("Unvisited: {}", s.unvisited);
            println!("Fetched:   {}", s.scraped);
            println!("Errors:    {}", s.errors);
            println!("Grants:    {} ({} active)", s.grants, s.active);
            println!("Sections:  {}", s.sections);
            println!("Resources: {}", s.resources);
            println!("Documents: {}", s.documents);
            if s.scraped > 0 {
                let rate = 100.0 * (s.scraped - s.errors) as f64 / s.scraped as f64;
                println!("Fetch success rate: {:.1}%", rate);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct ProcessedPage {
    grant: Grant,
    sections: Vec<Section>,
    resources: Vec<Resource>,
    documents: Vec<IndexableDoc>,
}

#[derive(Default)]
struct ProcessCounts {
    grants: usize,
    sections: usize,
    resources: usize,
    documents: usize,
}

impl ProcessCounts {
    fn add(&mut self, p: &ProcessedPage) {
        self.grants += 1;
        self.sections += p.sections.len();
        self.resources += p.resources.len();
        self.documents += p.documents.len();
    }

    fn print(&self) {
        println!(
            "Saved {} grants, {} sections, {} resources, {} documents.",
            self.grants, self.sections, self.resources, self.documents,
        );
    }
}

/// Parse, fetch resources, extract and normalize pages concurrently,
/// saving each grant as it completes.
async fn process_pages(
    conn: &Connection,
    client: Client,
    pages: Vec<db::ScrapedPage>,
    concurrency: usize,
) -> anyhow::Result<ProcessCounts> {
    use indicatif::{ProgressBar, ProgressStyle};

    let client = Arc::new(client);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let ctx = Arc::new(DedupContext::with_hashes(db::fetch_known_hashes(conn)?));
    let total = pages.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<ProcessedPage>(concurrency * 2);

    for page in pages {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let ctx = Arc::clone(&ctx);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let processed = process_one(&client, &ctx, &page).await;
            let _ = tx.send(processed).await;
        });
    }

    drop(tx);

    let mut counts = ProcessCounts::default();
    while let Some(p) = rx.recv().await {
        db::save_processed(conn, &p.grant, &p.sections, &p.resources, &p.documents)?;
        counts.add(&p);
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(counts)
}

/// Full pipeline for one scraped page. Resource failures are logged
/// and skipped; the grant is still produced from what parsed.
async fn process_one(
    client: &Client,
    ctx: &DedupContext,
    scraped: &db::ScrapedPage,
) -> ProcessedPage {
    let parsed = parser::parse_page(&scraped.html, &scraped.url);
    let mut resources = parsed.resources;

    let mut extracted = Vec::new();
    for res in resources.iter_mut() {
        if res.kind == ResourceKind::Video {
            continue;
        }
        match fetcher::fetch_resource(client, &res.url).await {
            Ok((bytes, content_type)) => {
                if let Some(doc) = extract::extract_document(res, &bytes, content_type.as_deref(), ctx)
                {
                    extracted.push(doc);
                }
            }
            Err(e) => warn!("Failed to fetch resource {}: {}", res.url, e),
        }
    }

    let (grant, documents) =
        normalize(&parsed.page, &parsed.sections, &resources, &extracted, Utc::now());
    ProcessedPage { grant, sections: parsed.sections, resources, documents }
}

/// CPU-only pass over stored HTML and stored documents.
fn renormalize_pages(
    conn: &Connection,
    pages: &[db::ScrapedPage],
) -> anyhow::Result<ProcessCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let mut docs_by_grant: HashMap<String, Vec<db::StoredDocumentRow>> = HashMap::new();
    for row in db::fetch_stored_documents(conn)? {
        docs_by_grant.entry(row.grant_id.clone()).or_default().push(row);
    }

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts::default();
    for chunk in pages.chunks(500) {
        let results: Vec<ProcessedPage> = chunk
            .par_iter()
            .map(|p| renormalize_one(p, &docs_by_grant))
            .collect();

        for p in results {
            db::save_processed(conn, &p.grant, &p.sections, &p.resources, &p.documents)?;
            counts.add(&p);
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn renormalize_one(
    scraped: &db::ScrapedPage,
    docs_by_grant: &HashMap<String, Vec<db::StoredDocumentRow>>,
) -> ProcessedPage {
    let parsed = parser::parse_page(&scraped.html, &scraped.url);
    let mut resources = parsed.resources;
    let grant_id = format!("innovate_uk_{}", parsed.page.id);

    let mut extracted = Vec::new();
    if let Some(rows) = docs_by_grant.get(&grant_id) {
        for row in rows {
            // Carry stored hashes over so rewritten resource rows keep them.
            if !row.content_hash.is_empty() {
                if let Some(res) = resources.iter_mut().find(|r| r.id == row.resource_id) {
                    res.content_hash = Some(row.content_hash.clone());
                }
            }
            extracted.push(stored_document(row, &parsed.page.id));
        }
    }

    let (grant, documents) =
        normalize(&parsed.page, &parsed.sections, &resources, &extracted, Utc::now());
    ProcessedPage { grant, sections: parsed.sections, resources, documents }
}

/// Rebuild an extracted document from its stored row.
fn stored_document(row: &db::StoredDocumentRow, internal_id: &str) -> ExtractedDocument {
    let prefix = format!("{}_doc_", row.grant_id);
    let id = row.doc_id.strip_prefix(&prefix).unwrap_or(&row.doc_id).to_string();
    ExtractedDocument {
        id,
        program_id: (row.scope == "program").then(|| internal_id.to_string()),
        resource_id: row.resource_id.clone(),
        kind: DocKind::parse(&row.kind).unwrap_or(DocKind::Guidance),
        source_url: row.source_url.clone(),
        text: row.text.clone(),
        content_hash: row.content_hash.clone(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
