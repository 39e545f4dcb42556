//! Knowledge Base - SQLite FTS5 index over AV operations articles
//!
//! - `kb_docs` holds the articles, `kb_docs_fts` is an external-content FTS5
//!   table over title and body
//! - Triggers keep the FTS table in sync, so callers only ever write `kb_docs`
//! - Queries are AND-of-prefixes built from the operator's text
//! - Hits carry a short highlighted snippet for explainability

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::{KnowledgeDocument, RetrievalHit};

// =============================================================================
// Constants
// =============================================================================

/// Default number of hits returned per query
pub const DEFAULT_TOP_K: usize = 5;

/// Tokens of context around a match in a snippet
pub const SNIPPET_TOKENS: i64 = 12;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("word pattern is valid"));

/// Built-in articles written by `seed_defaults`: (title, source, body)
const SEED_ARTICLES: &[(&str, &str, &str)] = &[
    (
        "Audio dropouts on Dante-enabled devices",
        "AV Ops Handbook",
        "Frequent audio dropouts on Dante devices are often caused by:
- Clock sync mismatch
- Faulty Ethernet cables
- Switch QoS misconfiguration
Recommended actions:
- Verify master clock
- Replace Cat6 cables
- Enable QoS and IGMP snooping",
    ),
    (
        "Packet loss troubleshooting for AV networks",
        "Network Ops Guide",
        "Packet loss above 5% can severely impact real-time AV streams.
Common causes include:
- Congested switch ports
- Duplex mismatches
- Broadcast storms
Resolution steps:
- Check interface statistics
- Run continuous ping and jitter tests
- Isolate AV VLAN",
    ),
    (
        "High temperature alerts on AV processors",
        "Vendor KB",
        "Temperatures above 70°C may indicate:
- Fan failure
- Blocked ventilation
- Excessive DSP load
Immediate actions:
- Inspect cooling fans
- Improve airflow
- Reduce processing load",
    ),
];

// =============================================================================
// Query building
// =============================================================================

/// Turn free text into an FTS5 query requiring every word as a prefix.
///
/// `"device-001 E42 audio"` becomes `"device"* AND "001"* AND "E42"* AND "audio"*`.
/// Words are quoted so FTS5 keywords (`AND`, `NEAR`, ...) in the input stay
/// plain terms. Returns an empty string when the text has no words.
pub fn to_fts_query(text: &str) -> String {
    WORD_RE
        .find_iter(text)
        .map(|m| format!("\"{}\"*", m.as_str()))
        .collect::<Vec<_>>()
        .join(" AND ")
}

// =============================================================================
// Knowledge Index
// =============================================================================

/// Full-text index over knowledge base articles
#[derive(Clone)]
pub struct KnowledgeIndex {
    conn: Arc<Mutex<Connection>>,
}

impl KnowledgeIndex {
    /// Open or create the index at `path`
    pub async fn open_with_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;
            Ok(conn)
        })
        .await??;

        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        index.init_schema().await?;
        Ok(index)
    }

    /// Run a closure against the connection on the blocking pool
    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }

    async fn init_schema(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kb_docs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    source TEXT,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE VIRTUAL TABLE IF NOT EXISTS kb_docs_fts USING fts5(
                    title,
                    content,
                    content='kb_docs',
                    content_rowid='id'
                );

                CREATE TRIGGER IF NOT EXISTS kb_docs_ai AFTER INSERT ON kb_docs BEGIN
                    INSERT INTO kb_docs_fts(rowid, title, content)
                    VALUES (new.id, new.title, new.content);
                END;

                CREATE TRIGGER IF NOT EXISTS kb_docs_ad AFTER DELETE ON kb_docs BEGIN
                    INSERT INTO kb_docs_fts(kb_docs_fts, rowid, title, content)
                    VALUES ('delete', old.id, old.title, old.content);
                END;

                CREATE TRIGGER IF NOT EXISTS kb_docs_au AFTER UPDATE ON kb_docs BEGIN
                    INSERT INTO kb_docs_fts(kb_docs_fts, rowid, title, content)
                    VALUES ('delete', old.id, old.title, old.content);
                    INSERT INTO kb_docs_fts(rowid, title, content)
                    VALUES (new.id, new.title, new.content);
                END;
                "#,
            )?;
            Ok(())
        })
        .await
    }

    /// Add an article, returning its id
    pub async fn add_document(
        &self,
        title: &str,
        source: Option<&str>,
        content: &str,
    ) -> Result<i64> {
        let title = title.trim().to_string();
        let source = source.map(|s| s.trim().to_string());
        let content = content.trim().to_string();
        if title.is_empty() || content.is_empty() {
            anyhow::bail!("Knowledge document needs a title and a body");
        }

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kb_docs (title, source, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![title, source, content, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Fetch one article by id
    pub async fn get_document(&self, id: i64) -> Result<Option<KnowledgeDocument>> {
        self.execute(move |conn| {
            let doc = conn
                .query_row(
                    "SELECT id, title, source, content, created_at FROM kb_docs WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(KnowledgeDocument {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            source: row.get(2)?,
                            content: row.get(3)?,
                            created_at: row.get::<_, DateTime<Utc>>(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(doc)
        })
        .await
    }

    /// Number of indexed articles
    pub async fn document_count(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM kb_docs", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Run an FTS5 query, best matches first, at most `limit` rows.
    ///
    /// Errors (malformed query, missing table) are returned as-is; deciding
    /// whether to swallow them is the caller's job.
    pub async fn search(&self, fts_query: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
        let fts_query = fts_query.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT d.id, d.title, d.source,
                       snippet(kb_docs_fts, 1, '[', ']', '...', ?3) AS snippet
                FROM kb_docs_fts
                JOIN kb_docs d ON d.id = kb_docs_fts.rowid
                WHERE kb_docs_fts MATCH ?1
                ORDER BY rank
                LIMIT ?2
                "#,
            )?;

            let hits = stmt
                .query_map(params![fts_query, limit as i64, SNIPPET_TOKENS], |row| {
                    Ok(RetrievalHit {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        source: row.get(2)?,
                        snippet: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            debug!("FTS query {:?} returned {} hits", fts_query, hits.len());
            Ok(hits)
        })
        .await
    }

    /// Insert the built-in articles that are not present yet (matched by title)
    pub async fn seed_defaults(&self) -> Result<usize> {
        let inserted = self
            .execute(|conn| {
                let mut inserted = 0;
                for (title, source, content) in SEED_ARTICLES {
                    let exists: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM kb_docs WHERE title = ?1)",
                        params![title],
                        |row| row.get(0),
                    )?;
                    if exists {
                        continue;
                    }
                    conn.execute(
                        "INSERT INTO kb_docs (title, source, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                        params![title, source, content, Utc::now()],
                    )?;
                    inserted += 1;
                }
                Ok(inserted)
            })
            .await?;

        info!("Seeded {} knowledge base articles", inserted);
        Ok(inserted)
    }
}

// =============================================================================
// Tests
// =============================================================================
