use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::db::ScrapeRow;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client")
}

/// Scrape stats returned after completion.
pub struct ScrapeStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Fetch pages concurrently, saving each result to DB as it arrives.
pub async fn scrape_pages_streaming(
    conn: &Connection,
    client: Client,
    pages: Vec<(i64, String, String)>,
    concurrency: usize,
) -> Result<ScrapeStats> {
    let client = Arc::new(client);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = pages.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send results, main loop saves to DB
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ScrapeRow>(concurrency * 2);

    for (page_id, url, external_id) in pages {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            // Failures come back as error rows so the page is still marked visited
            let row = fetch_with_retry(&client, page_id, &url, &external_id).await;
            let _ = tx.send(row).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;

    // Prepare statements once, reuse for each row
    let mut insert_stmt = conn.prepare(
        "INSERT INTO page_data (page_id, url, external_id, html, status, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut update_stmt =
        conn.prepare("UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1")?;

    while let Some(row) = rx.recv().await {
        if row.error.is_some() {
            errors += 1;
        } else {
            ok += 1;
        }

        save_one(&mut insert_stmt, &mut update_stmt, &row)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors)", total, ok, errors);

    Ok(ScrapeStats { total, ok, errors })
}

/// Save a single fetch result to DB using pre-prepared statements.
fn save_one(
    insert: &mut rusqlite::Statement,
    update: &mut rusqlite::Statement,
    row: &ScrapeRow,
) -> Result<()> {
    insert.execute(rusqlite::params![
        row.page_id,
        row.url,
        row.external_id,
        row.html,
        row.status,
        row.error,
        row.latency_ms,
    ])?;
    update.execute(rusqlite::params![row.page_id])?;
    Ok(())
}

async fn fetch_with_retry(
    client: &Client,
    page_id: i64,
    url: &str,
    external_id: &str,
) -> ScrapeRow {
    for attempt in 0..=MAX_RETRIES {
        let row = fetch_one(client, page_id, url, external_id).await;

        let should_retry = matches!(row.status, Some(429 | 500 | 502 | 503));
        if !should_retry || attempt == MAX_RETRIES {
            return row;
        }

        let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
        warn!(
            "HTTP {} on {} (attempt {}/{}), backing off {:.1}s",
            row.status.unwrap_or(0),
            url,
            attempt + 1,
            MAX_RETRIES,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
    }

    fetch_one(client, page_id, url, external_id).await
}

async fn fetch_one(client: &Client, page_id: i64, url: &str, external_id: &str) -> ScrapeRow {
    let start = Instant::now();
    let response = client.get(url).send().await;
    let elapsed = start.elapsed().as_millis() as i64;

    match response {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                match resp.text().await {
                    Ok(html) => ScrapeRow {
                        page_id,
                        url: url.to_string(),
                        external_id: external_id.to_string(),
                        html: Some(html),
                        status: Some(status.as_u16() as i32),
                        error: None,
                        latency_ms: Some(elapsed),
                    },
                    Err(e) => ScrapeRow {
                        page_id,
                        url: url.to_string(),
                        external_id: external_id.to_string(),
                        html: None,
                        status: Some(status.as_u16() as i32),
                        error: Some(e.to_string()),
                        latency_ms: Some(elapsed),
                    },
                }
            } else {
                ScrapeRow {
                    page_id,
                    url: url.to_string(),
                    external_id: external_id.to_string(),
                    html: None,
                    status: Some(status.as_u16() as i32),
                    error: Some(format!("HTTP {}", status.as_u16())),
                    latency_ms: Some(elapsed),
                }
            }
        }
        Err(e) => ScrapeRow {
            page_id,
            url: url.to_string(),
            external_id: external_id.to_string(),
            html: None,
            status: None,
            error: Some(e.to_string()),
            latency_ms: Some(elapsed),
        },
    }
}

/// Download one supporting resource, returning its body and content type.
pub async fn fetch_resource(client: &Client, url: &str) -> Result<(Vec<u8>, Option<String>)> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request failed for {}", url))?
        .error_for_status()
        .with_context(|| format!("Bad status for {}", url))?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("Failed to read body for {}", url))?;

    Ok((bytes.to_vec(), content_type))
}
