//! Database repository layer
//!
//! Reference host storage: forms, submissions and the regeneration queue.

use crate::config::FieldsConfig;
use crate::error::{Error, Result};
use crate::jobs::{CacheRegenerationJob, JobQueue, JobStatus, QueuedJob};
use crate::source::{FormRegistry, SubmissionReader};
use crate::types::{FieldCapability, FieldDescriptor, FieldValue, Form, FormDefinition, Submission};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Fixed-width UTC timestamp, so stored values compare as text
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        // Several workers may share the file
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Form operations
    // ============================================

    /// Insert or replace a form and its fields.
    ///
    /// Forms are matched by `id` when given, otherwise by handle. Rating
    /// settings are validated before anything is written.
    pub fn import_form(&self, definition: FormDefinition, defaults: &FieldsConfig) -> Result<Form> {
        let FormDefinition {
            id,
            handle,
            title,
            fields,
        } = definition;

        let fields = fields
            .into_iter()
            .map(|f| f.into_descriptor(defaults))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Option<i64> = match id {
            Some(id) => tx
                .query_row("SELECT id FROM forms WHERE id = ?", [id], |r| r.get(0))
                .optional()?,
            None => tx
                .query_row("SELECT id FROM forms WHERE handle = ?", [&handle], |r| r.get(0))
                .optional()?,
        };

        let form_id = match existing {
            Some(form_id) => {
                tx.execute(
                    "UPDATE forms SET handle = ?1, title = ?2 WHERE id = ?3",
                    params![handle, title, form_id],
                )?;
                tx.execute("DELETE FROM form_fields WHERE form_id = ?", [form_id])?;
                form_id
            }
            None => {
                tx.execute(
                    "INSERT INTO forms (id, handle, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, handle, title, timestamp(&Utc::now())],
                )?;
                tx.last_insert_rowid()
            }
        };

        for (position, field) in fields.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO form_fields (form_id, position, handle, label, kind, capability)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    form_id,
                    position as i64,
                    field.handle,
                    field.label,
                    field.kind,
                    serde_json::to_string(&field.capability)?,
                ],
            )?;
        }

        tx.commit()?;

        tracing::info!(form_id, handle = %handle, fields = fields.len(), "Imported form");

        Ok(Form {
            id: form_id,
            handle,
            title,
            fields,
        })
    }

    /// Delete a form with its fields and submissions
    pub fn delete_form(&self, form_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM forms WHERE id = ?", [form_id])?;
        Ok(deleted > 0)
    }

    fn load_fields(conn: &Connection, form_id: i64) -> Result<Vec<FieldDescriptor>> {
        let mut stmt = conn.prepare(
            "SELECT handle, label, kind, capability FROM form_fields WHERE form_id = ? ORDER BY position",
        )?;
        let fields = stmt
            .query_map([form_id], |row| {
                let capability: FieldCapability = json_column(row, "capability")?;
                Ok(FieldDescriptor {
                    handle: row.get("handle")?,
                    label: row.get("label")?,
                    kind: row.get("kind")?,
                    capability,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(fields)
    }

    fn load_forms(conn: &Connection, id: Option<i64>) -> Result<Vec<Form>> {
        let mut stmt = conn.prepare(
            "SELECT id, handle, title FROM forms WHERE (?1 IS NULL OR id = ?1) ORDER BY id",
        )?;
        let heads = stmt
            .query_map([id], |row| {
                Ok((
                    row.get::<_, i64>("id")?,
                    row.get::<_, String>("handle")?,
                    row.get::<_, String>("title")?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        heads
            .into_iter()
            .map(|(id, handle, title)| {
                Ok(Form {
                    id,
                    handle,
                    title,
                    fields: Self::load_fields(conn, id)?,
                })
            })
            .collect()
    }

    // ============================================
    // Submission operations
    // ============================================

    /// Store a submission; null values are dropped
    pub fn insert_submission(
        &self,
        form_id: i64,
        created_at: DateTime<Utc>,
        values: BTreeMap<String, FieldValue>,
    ) -> Result<Submission> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM forms WHERE id = ?)",
            [form_id],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(Error::FormNotFound(form_id));
        }

        conn.execute(
            "INSERT INTO submissions (form_id, created_at, field_values) VALUES (?1, ?2, ?3)",
            params![form_id, timestamp(&created_at), serde_json::to_string(&values)?],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(form_id, submission_id = id, "Stored submission");

        Ok(Submission {
            id,
            form_id,
            created_at,
            values,
        })
    }

    /// Delete a submission, returning the form it belonged to
    pub fn delete_submission(&self, id: i64) -> Result<Option<i64>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let form_id: Option<i64> = tx
            .query_row("SELECT form_id FROM submissions WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        if form_id.is_some() {
            tx.execute("DELETE FROM submissions WHERE id = ?", [id])?;
        }
        tx.commit()?;
        Ok(form_id)
    }

    fn row_to_submission(row: &Row) -> rusqlite::Result<Submission> {
        let created_at_str: String = row.get("created_at")?;
        Ok(Submission {
            id: row.get("id")?,
            form_id: row.get("form_id")?,
            created_at: parse_timestamp(&created_at_str).unwrap_or_else(Utc::now),
            values: json_column(row, "field_values")?,
        })
    }

    // ============================================
    // Queue operations
    // ============================================

    /// Most recently created jobs, newest first
    pub fn recent_jobs(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM queue_jobs ORDER BY id DESC LIMIT ?")?;
        let jobs = stmt
            .query_map([limit as i64], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<QueuedJob> {
        let status_str: String = row.get("status")?;
        let available_at_str: String = row.get("available_at")?;
        let attempts: i64 = row.get("attempts")?;

        Ok(QueuedJob {
            id: row.get("id")?,
            job: json_column(row, "job")?,
            status: status_str.parse().unwrap_or(JobStatus::Failed),
            available_at: parse_timestamp(&available_at_str).unwrap_or_else(Utc::now),
            attempts: attempts.max(0) as u32,
            progress: row.get("progress")?,
            progress_label: row.get("progress_label")?,
            error: row.get("error")?,
        })
    }

    fn update_job(&self, id: i64, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(sql, params)?;
        if updated == 0 {
            return Err(Error::Queue(format!("job {} not found", id)));
        }
        Ok(())
    }
}

impl FormRegistry for Database {
    fn forms(&self) -> Result<Vec<Form>> {
        let conn = self.conn.lock().unwrap();
        Self::load_forms(&conn, None)
    }

    fn form(&self, id: i64) -> Result<Option<Form>> {
        let conn = self.conn.lock().unwrap();
        Ok(Self::load_forms(&conn, Some(id))?.into_iter().next())
    }

    fn count_submissions(&self, form_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM submissions WHERE form_id = ?",
            [form_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }
}

impl SubmissionReader for Database {
    fn submissions(&self, form_id: i64, since: Option<DateTime<Utc>>) -> Result<Vec<Submission>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, form_id, created_at, field_values FROM submissions
            WHERE form_id = ?1 AND (?2 IS NULL OR created_at >= ?2)
            ORDER BY created_at DESC, id DESC
            "#,
        )?;
        let submissions = stmt
            .query_map(
                params![form_id, since.as_ref().map(timestamp)],
                Self::row_to_submission,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(submissions)
    }
}

impl JobQueue for Database {
    fn push(&self, job: &CacheRegenerationJob, delay: Option<Duration>) -> Result<i64> {
        let now = Utc::now();
        let available_at = now + delay.unwrap_or_else(Duration::zero);
        let kind = if job.is_master() { "master" } else { "batch" };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO queue_jobs (kind, job, status, available_at, created_at)
            VALUES (?1, ?2, 'waiting', ?3, ?4)
            "#,
            params![kind, serde_json::to_string(job)?, timestamp(&available_at), timestamp(&now)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn reserve(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        let mut conn = self.conn.lock().unwrap();
        // Immediate: other worker processes block instead of double-reserving
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now_str = timestamp(&now);
        let next: Option<i64> = tx
            .query_row(
                r#"
                SELECT id FROM queue_jobs
                WHERE status = 'waiting' AND available_at <= ?
                ORDER BY available_at, id
                LIMIT 1
                "#,
                [&now_str],
                |r| r.get(0),
            )
            .optional()?;

        let Some(id) = next else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            r#"
            UPDATE queue_jobs
            SET status = 'reserved', reserved_at = ?1, attempts = attempts + 1
            WHERE id = ?2
            "#,
            params![now_str, id],
        )?;
        let job = tx.query_row("SELECT * FROM queue_jobs WHERE id = ?", [id], Self::row_to_job)?;
        tx.commit()?;
        Ok(Some(job))
    }

    fn complete(&self, id: i64) -> Result<()> {
        self.update_job(
            id,
            "UPDATE queue_jobs SET status = 'done', progress = 1 WHERE id = ?",
            &[&id],
        )
    }

    fn fail(&self, id: i64, error: &str) -> Result<()> {
        self.update_job(
            id,
            "UPDATE queue_jobs SET status = 'failed', error = ?1 WHERE id = ?2",
            &[&error, &id],
        )
    }

    fn set_progress(&self, id: i64, progress: f64, label: Option<&str>) -> Result<()> {
        let progress = progress.clamp(0.0, 1.0);
        self.update_job(
            id,
            "UPDATE queue_jobs SET progress = ?1, progress_label = ?2 WHERE id = ?3",
            &[&progress, &label, &id],
        )
    }

    fn waiting(&self) -> Result<Vec<QueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM queue_jobs WHERE status = 'waiting' ORDER BY available_at, id",
        )?;
        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn pending(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_jobs WHERE status = 'waiting'",
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn has_pending_master(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM queue_jobs
                WHERE kind = 'master' AND status IN ('waiting', 'reserved')
            )
            "#,
            [],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn release_stale(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let released = conn.execute(
            r#"
            UPDATE queue_jobs SET status = 'waiting', reserved_at = NULL
            WHERE status = 'reserved' AND reserved_at < ?
            "#,
            [timestamp(&older_than)],
        )?;
        Ok(released)
    }
}
