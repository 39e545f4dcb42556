// Copilot database: telemetry samples and copilot run records
// Storage is the single source of truth; nothing is cached in memory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::{
    CopilotRun, InputContext, NewCopilotRun, NewTelemetrySample, RunStatus, TelemetrySample,
};

/// SQLite connection (single connection with mutex)
#[derive(Clone)]
pub struct CopilotDb {
    conn: Arc<Mutex<Connection>>,
}

impl CopilotDb {
    /// Open or create the database at `path`
    pub async fn open_with_path(path: &Path) -> Result<Self> {
        let db_path = path.to_path_buf();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        info!("Opening copilot database at: {}", db_path.display());

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path).context("Failed to open SQLite database")?;

            // WAL lets the knowledge index and this store share one file
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;

            Ok(conn)
        })
        .await??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS telemetry_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    device_id TEXT NOT NULL,
                    temperature INTEGER NOT NULL,
                    packet_loss INTEGER NOT NULL,
                    audio_dropouts INTEGER NOT NULL,
                    error_code TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_telemetry_device
                    ON telemetry_events(device_id, id);

                CREATE TABLE IF NOT EXISTS copilot_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    task TEXT NOT NULL,
                    input_context TEXT NOT NULL DEFAULT '{}',
                    output TEXT NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_runs_user
                    ON copilot_runs(user_id, created_at);
                "#,
            )?;
            Ok(())
        })
        .await?;

        debug!("Copilot database schema ready");
        Ok(())
    }

    /// Execute a closure with the database connection on the blocking pool
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
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

    // -------------------------------------------------------------------------
    // Telemetry
    // -------------------------------------------------------------------------

    /// Store a telemetry sample
    pub async fn insert_telemetry(&self, sample: NewTelemetrySample) -> Result<TelemetrySample> {
        self.execute(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO telemetry_events
                 (device_id, temperature, packet_loss, audio_dropouts, error_code, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sample.device_id,
                    sample.temperature,
                    sample.packet_loss,
                    sample.audio_dropouts,
                    sample.error_code,
                    created_at,
                ],
            )?;

            Ok(TelemetrySample {
                id: conn.last_insert_rowid(),
                device_id: sample.device_id,
                temperature: sample.temperature,
                packet_loss: sample.packet_loss,
                audio_dropouts: sample.audio_dropouts,
                error_code: sample.error_code,
                created_at,
            })
        })
        .await
    }

    /// Most recent sample for a device (by insertion order)
    pub async fn latest_telemetry(&self, device_id: &str) -> Result<Option<TelemetrySample>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let sample = conn
                .query_row(
                    "SELECT id, device_id, temperature, packet_loss, audio_dropouts, error_code, created_at
                     FROM telemetry_events
                     WHERE device_id = ?1
                     ORDER BY id DESC
                     LIMIT 1",
                    params![device_id],
                    |row| {
                        Ok(TelemetrySample {
                            id: row.get(0)?,
                            device_id: row.get(1)?,
                            temperature: row.get(2)?,
                            packet_loss: row.get(3)?,
                            audio_dropouts: row.get(4)?,
                            error_code: row.get(5)?,
                            created_at: row.get::<_, DateTime<Utc>>(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(sample)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Copilot runs (append-only)
    // -------------------------------------------------------------------------

    /// Append a run record. Runs are never updated or deleted.
    pub async fn append_run(&self, run: NewCopilotRun) -> Result<CopilotRun> {
        let input_json = serde_json::to_string(&run.input_context)?;
        let output_json = serde_json::to_string(&run.output)?;

        self.execute(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO copilot_runs (user_id, task, input_context, output, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run.user_id,
                    run.task,
                    input_json,
                    output_json,
                    run.status.as_str(),
                    created_at,
                ],
            )?;

            Ok(CopilotRun {
                id: conn.last_insert_rowid(),
                user_id: run.user_id,
                task: run.task,
                input_context: run.input_context,
                output: run.output,
                status: run.status,
                created_at,
            })
        })
        .await
    }

    /// Runs owned by `user_id`, newest first
    pub async fn list_runs(&self, user_id: i64, limit: usize, offset: usize) -> Result<Vec<CopilotRun>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, task, input_context, output, status, created_at
                 FROM copilot_runs
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let raw = stmt
                .query_map(params![user_id, limit as i64, offset as i64], RawRun::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            raw.into_iter().map(RawRun::decode).collect()
        })
        .await
    }

    /// One run, only if it belongs to `user_id`
    pub async fn get_run(&self, id: i64, user_id: i64) -> Result<Option<CopilotRun>> {
        self.execute(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT id, user_id, task, input_context, output, status, created_at
                     FROM copilot_runs
                     WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                    RawRun::from_row,
                )
                .optional()?;

            raw.map(RawRun::decode).transpose()
        })
        .await
    }
}

/// Row as stored, before the JSON columns are decoded
struct RawRun {
    id: i64,
    user_id: i64,
    task: String,
    input_context: String,
    output: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            task: row.get(2)?,
            input_context: row.get(3)?,
            output: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CopilotRun> {
        let input_context: InputContext = serde_json::from_str(&self.input_context)
            .with_context(|| format!("Corrupt input_context in run {}", self.id))?;
        let output = serde_json::from_str(&self.output)
            .with_context(|| format!("Corrupt output in run {}", self.id))?;
        let status = RunStatus::parse(&self.status)
            .with_context(|| format!("Unknown status '{}' in run {}", self.status, self.id))?;

        Ok(CopilotRun {
            id: self.id,
            user_id: self.user_id,
            task: self.task,
            input_context,
            output,
            status,
            created_at: self.created_at,
        })
    }
}
