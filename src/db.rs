use anyhow::Result;
use rusqlite::Connection;

use crate::parser::normalize::{Grant, IndexableDoc};
use crate::parser::resources::Resource;
use crate::parser::segment::Section;

const DB_PATH: &str = "data/iuk.sqlite";

pub fn connect() -> Result<Connection> {
    std::fs::create_dir_all("data")?;
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id          INTEGER PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            external_id TEXT NOT NULL,
            visited     BOOLEAN NOT NULL DEFAULT 0,
            visited_at  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

        CREATE TABLE IF NOT EXISTS page_data (
            id          INTEGER PRIMARY KEY,
            page_id     INTEGER NOT NULL REFERENCES pages(id),
            url         TEXT NOT NULL,
            external_id TEXT NOT NULL,
            html        TEXT,
            status      INTEGER,
            error       TEXT,
            latency_ms  INTEGER,
            scraped_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_page_data_url ON page_data(url);

        -- Normalized output
        CREATE TABLE IF NOT EXISTS grants (
            id                   TEXT PRIMARY KEY,
            source               TEXT NOT NULL,
            external_id          TEXT NOT NULL,
            title                TEXT NOT NULL,
            description          TEXT,
            url                  TEXT NOT NULL,
            status               TEXT NOT NULL CHECK(status IN ('forthcoming','open','closed')),
            is_active            BOOLEAN GENERATED ALWAYS AS (status = 'open') STORED,
            opens_at             TEXT,
            closes_at            TEXT,
            total_fund_display   TEXT,
            total_fund_gbp       INTEGER,
            project_size_display TEXT,
            project_min_gbp      INTEGER,
            project_max_gbp      INTEGER,
            expected_winners     INTEGER,
            competition_type     TEXT NOT NULL CHECK(competition_type IN ('grant','loan','prize')),
            funding_rules        TEXT,
            tags                 TEXT,
            processed_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_grants_active ON grants(is_active);
        CREATE INDEX IF NOT EXISTS idx_grants_type ON grants(competition_type);

        CREATE TABLE IF NOT EXISTS sections (
            id        INTEGER PRIMARY KEY,
            grant_id  TEXT NOT NULL REFERENCES grants(id),
            name      TEXT NOT NULL,
            url       TEXT NOT NULL,
            html      TEXT,
            text      TEXT,
            UNIQUE(grant_id, name)
        );
        CREATE INDEX IF NOT EXISTS idx_sections_grant ON sections(grant_id);

        CREATE TABLE IF NOT EXISTS resources (
            id           INTEGER PRIMARY KEY,
            res_id       TEXT NOT NULL,
            grant_id     TEXT NOT NULL REFERENCES grants(id),
            url          TEXT NOT NULL,
            title        TEXT,
            scope        TEXT NOT NULL CHECK(scope IN ('program','global')),
            kind         TEXT NOT NULL CHECK(kind IN ('document','video','webpage','other')),
            content_hash TEXT,
            UNIQUE(grant_id, res_id)
        );
        CREATE INDEX IF NOT EXISTS idx_resources_grant ON resources(grant_id);
        CREATE INDEX IF NOT EXISTS idx_resources_hash ON resources(content_hash);

        CREATE TABLE IF NOT EXISTS documents (
            id           TEXT PRIMARY KEY,
            grant_id     TEXT NOT NULL REFERENCES grants(id),
            kind         TEXT NOT NULL,
            section_name TEXT,
            text         TEXT NOT NULL,
            source_url   TEXT NOT NULL,
            citation     TEXT NOT NULL,
            scope        TEXT NOT NULL CHECK(scope IN ('program','global')),
            resource_id  TEXT,
            indexed_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_documents_grant ON documents(grant_id);
        ",
    )?;
    Ok(())
}

// ── Scraping ──

pub fn insert_pages(conn: &Connection, pages: &[(String, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO pages (url, external_id) VALUES (?1, ?2)")?;
        for (url, external_id) in pages {
            count += stmt.execute(rusqlite::params![url, external_id])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unvisited(
    conn: &Connection,
    limit: Option<usize>,
) -> Result<Vec<(i64, String, String)>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT id, url, external_id FROM pages WHERE visited = 0 ORDER BY id LIMIT {}",
            n
        ),
        None => "SELECT id, url, external_id FROM pages WHERE visited = 0 ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct ScrapeRow {
    pub page_id: i64,
    pub url: String,
    pub external_id: String,
    pub html: Option<String>,
    pub status: Option<i32>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

// ── Processing ──

pub struct ScrapedPage {
    pub url: String,
    pub html: String,
}

/// Scraped pages with no grant yet.
pub fn fetch_unprocessed(conn: &Connection, limit: Option<usize>) -> Result<Vec<ScrapedPage>> {
    let sql = format!(
        "SELECT pd.url, pd.html
         FROM page_data pd
         LEFT JOIN grants g ON g.url = pd.url
         WHERE pd.html IS NOT NULL AND g.id IS NULL
         ORDER BY pd.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ScrapedPage { url: row.get(0)?, html: row.get(1)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Latest scrape of every page, whether processed or not.
pub fn fetch_processed_pages(conn: &Connection, limit: Option<usize>) -> Result<Vec<ScrapedPage>> {
    let sql = format!(
        "SELECT pd.url, pd.html
         FROM page_data pd
         WHERE pd.html IS NOT NULL
           AND pd.id IN (SELECT MAX(id) FROM page_data WHERE html IS NOT NULL GROUP BY url)
         ORDER BY pd.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ScrapedPage { url: row.get(0)?, html: row.get(1)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Normalized output ──

/// Upsert one grant with all of its children. The grant row is
/// replaced by id; sections, resources and documents are deleted and
/// rewritten so stale children never survive re-ingestion.
pub fn save_processed(
    conn: &Connection,
    grant: &Grant,
    sections: &[Section],
    resources: &[Resource],
    documents: &[IndexableDoc],
) -> Result<()> {
    let funding_rules = serde_json::to_string(&grant.funding_rules)?;
    let tags = serde_json::to_string(&grant.tags)?;

    let tx = conn.unchecked_transaction()?;
    {
        tx.execute("DELETE FROM sections WHERE grant_id = ?1", [&grant.id])?;
        tx.execute("DELETE FROM resources WHERE grant_id = ?1", [&grant.id])?;
        tx.execute("DELETE FROM documents WHERE grant_id = ?1", [&grant.id])?;

        tx.execute(
            "INSERT OR REPLACE INTO grants
             (id, source, external_id, title, description, url, status, opens_at, closes_at,
              total_fund_display, total_fund_gbp, project_size_display, project_min_gbp,
              project_max_gbp, expected_winners, competition_type, funding_rules, tags)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            rusqlite::params![
                grant.id,
                grant.source,
                grant.external_id,
                grant.title,
                grant.description,
                grant.url,
                grant.status.as_str(),
                grant.opens_at.map(|d| d.to_rfc3339()),
                grant.closes_at.map(|d| d.to_rfc3339()),
                grant.total_fund_display,
                grant.total_fund_gbp,
                grant.project_size_display,
                grant.project_min_gbp,
                grant.project_max_gbp,
                grant.expected_winners,
                grant.competition_type.as_str(),
                funding_rules,
                tags,
            ],
        )?;

        let mut s_stmt = tx.prepare(
            "INSERT INTO sections (grant_id, name, url, html, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for s in sections {
            s_stmt.execute(rusqlite::params![
                grant.id,
                s.name.as_str(),
                s.url,
                s.html,
                s.text,
            ])?;
        }

        let mut r_stmt = tx.prepare(
            "INSERT INTO resources (res_id, grant_id, url, title, scope, kind, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for r in resources {
            r_stmt.execute(rusqlite::params![
                r.id,
                grant.id,
                r.url,
                r.title,
                r.scope.as_str(),
                r.kind.as_str(),
                r.content_hash,
            ])?;
        }

        let mut d_stmt = tx.prepare(
            "INSERT INTO documents
             (id, grant_id, kind, section_name, text, source_url, citation, scope, resource_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for d in documents {
            d_stmt.execute(rusqlite::params![
                d.id,
                d.grant_id,
                d.kind,
                d.section_name,
                d.text,
                d.source_url,
                d.citation,
                d.scope.as_str(),
                d.resource_id,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Content hashes of every resource fetched in earlier runs, used to
/// seed the dedup context.
pub fn fetch_known_hashes(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT content_hash FROM resources WHERE content_hash IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A stored resource-backed document, for rebuilding grants without
/// refetching.
pub struct StoredDocumentRow {
    pub grant_id: String,
    pub doc_id: String,
    pub kind: String,
    pub text: String,
    pub source_url: String,
    pub resource_id: String,
    pub scope: String,
    pub content_hash: String,
}

pub fn fetch_stored_documents(conn: &Connection) -> Result<Vec<StoredDocumentRow>> {
    let mut stmt = conn.prepare(
        "SELECT d.grant_id, d.id, d.kind, d.text, d.source_url, d.resource_id, d.scope,
                COALESCE(r.content_hash, '')
         FROM documents d
         LEFT JOIN resources r ON r.res_id = d.resource_id AND r.grant_id = d.grant_id
         WHERE d.resource_id IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredDocumentRow {
                grant_id: row.get(0)?,
                doc_id: row.get(1)?,
                kind: row.get(2)?,
                text: row.get(3)?,
                source_url: row.get(4)?,
                resource_id: row.get(5)?,
                scope: row.get(6)?,
                content_hash: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Overview ──

pub struct OverviewRow {
    pub id: String,
    pub title: String,
    pub status: String,
    pub competition_type: String,
    pub total_fund: String,
    pub project_size: String,
    pub closes_at: String,
    pub expected_winners: Option<i64>,
    pub tags: String,
}

pub fn fetch_overview(
    conn: &Connection,
    active_only: bool,
    competition_type: Option<&str>,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if active_only {
        conditions.push("is_active = 1".to_string());
    }
    if let Some(t) = competition_type {
        conditions.push(format!("competition_type = ?{}", params.len() + 1));
        params.push(Box::new(t.to_string()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT id, title, status, competition_type,
                COALESCE(total_fund_display,''), COALESCE(project_size_display,''),
                COALESCE(closes_at,''), expected_winners, COALESCE(tags,'')
         FROM grants{}
         ORDER BY closes_at IS NULL, closes_at, id
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(OverviewRow {
                id: row.get(0)?,
                title: row.get(1)?,
                status: row.get(2)?,
                competition_type: row.get(3)?,
                total_fund: row.get(4)?,
                project_size: row.get(5)?,
                closes_at: row.get(6)?,
                expected_winners: row.get(7)?,
                tags: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub scraped: usize,
    pub errors: usize,
    pub grants: usize,
    pub active: usize,
    pub sections: usize,
    pub resources: usize,
    pub documents: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 1", [], |r| r.get(0))?;
    let scraped: usize = conn.query_row("SELECT COUNT(*) FROM page_data", [], |r| r.get(0))?;
    let errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_data WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let grants: usize = conn.query_row("SELECT COUNT(*) FROM grants", [], |r| r.get(0))?;
    let active: usize =
        conn.query_row("SELECT COUNT(*) FROM grants WHERE is_active = 1", [], |r| r.get(0))?;
    let sections: usize = conn.query_row("SELECT COUNT(*) FROM sections", [], |r| r.get(0))?;
    let resources: usize = conn.query_row("SELECT COUNT(*) FROM resources", [], |r| r.get(0))?;
    let documents: usize = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        scraped,
        errors,
        grants,
        active,
        sections,
        resources,
        documents,
    })
}

// ── Tests ──
