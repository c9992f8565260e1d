//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::model::{
    Category, Draft, Email, EmailQuery, EmailUpdate, NewEmail, PromptTemplate, ProcessingLogEntry,
    TaskItem, TemplatePurpose,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn collect_emails(
        &self,
        op: &str,
        mut rows: libsql::Rows,
    ) -> Result<Vec<Email>, DatabaseError> {
        let mut emails = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            let email = row_to_email(&row)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
            emails.push(email);
        }
        Ok(emails)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width so text order is time order.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_flag(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(i64::from(b)),
        None => libsql::Value::Null,
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint") || msg.contains("PRIMARY KEY") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn row_to_email(row: &libsql::Row) -> Result<Email, libsql::Error> {
    let timestamp_str: String = row.get(4)?;
    let has_attachment: i64 = row.get(5)?;
    let category: Option<String> = row.get(6).ok();
    let tasks_json: String = row.get::<String>(7).unwrap_or_else(|_| "[]".into());
    let processed: i64 = row.get(8)?;
    let created_str: String = row.get(9)?;

    // A corrupt task column reads as no tasks rather than hiding the email.
    let tasks: Vec<TaskItem> = serde_json::from_str(&tasks_json).unwrap_or_default();

    Ok(Email {
        id: row.get(0)?,
        sender: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        timestamp: parse_datetime(&timestamp_str),
        has_attachment: has_attachment != 0,
        category: category.map(Category::from),
        tasks,
        processed: processed != 0,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_template(row: &libsql::Row) -> Result<Option<PromptTemplate>, libsql::Error> {
    let purpose_str: String = row.get(0)?;
    let updated_str: String = row.get(3)?;
    let Ok(purpose) = purpose_str.parse::<TemplatePurpose>() else {
        return Ok(None);
    };
    Ok(Some(PromptTemplate {
        purpose,
        text: row.get(1)?,
        version: row.get(2)?,
        updated_at: parse_datetime(&updated_str),
    }))
}

fn row_to_draft(row: &libsql::Row) -> Result<Draft, libsql::Error> {
    let id_str: String = row.get(0)?;
    let metadata_str: String = row.get::<String>(4).unwrap_or_else(|_| "{}".into());
    let created_str: String = row.get(5)?;

    Ok(Draft {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        email_id: row.get(1).ok(),
        subject: row.get(2)?,
        body: row.get(3)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_log_entry(row: &libsql::Row) -> Result<ProcessingLogEntry, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(3)?;
    let timestamp_str: String = row.get(6)?;

    Ok(ProcessingLogEntry {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        email_id: row.get(1)?,
        operation: row.get(2)?,
        status: status_str
            .parse()
            .unwrap_or(crate::mail::model::LogStatus::Failed),
        llm_response: row.get(4).ok(),
        error_message: row.get(5).ok(),
        timestamp: parse_datetime(&timestamp_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const EMAIL_COLUMNS: &str =
    "id, sender, subject, body, timestamp, has_attachment, category, tasks, processed, created_at";

const TEMPLATE_COLUMNS: &str = "purpose, text, version, updated_at";

const DRAFT_COLUMNS: &str = "id, email_id, subject, body, metadata, created_at";

const LOG_COLUMNS: &str =
    "id, email_id, operation, status, llm_response, error_message, timestamp";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: &NewEmail) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let now = fmt_datetime(&Utc::now());
        let id = match email.id {
            Some(id) => libsql::Value::Integer(id),
            None => libsql::Value::Null,
        };

        conn.execute(
            "INSERT INTO emails (id, sender, subject, body, timestamp, has_attachment, tasks, processed, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', 0, ?7, ?7)",
            params![
                id,
                email.sender.as_str(),
                email.subject.as_str(),
                email.body.as_str(),
                fmt_datetime(&email.timestamp),
                i64::from(email.has_attachment),
                now,
            ],
        )
        .await
        .map_err(|e| query_error("insert_email", e))?;

        let id = email.id.unwrap_or_else(|| conn.last_insert_rowid());
        debug!(email_id = id, sender = %email.sender, "Email inserted");
        Ok(id)
    }

    async fn get_email(&self, id: i64) -> Result<Option<Email>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let email = row_to_email(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_email row parse: {e}")))?;
                Ok(Some(email))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn get_all_emails(&self, limit: usize) -> Result<Vec<Email>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails ORDER BY timestamp DESC, id DESC LIMIT ?1"
                ),
                params![i64::try_from(limit).unwrap_or(-1)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_all_emails: {e}")))?;
        self.collect_emails("get_all_emails", rows).await
    }

    async fn search_emails(&self, query: &EmailQuery) -> Result<Vec<Email>, DatabaseError> {
        let pattern = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(like_pattern);
        // SQLite treats a negative LIMIT as unbounded.
        let limit = query.limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1);

        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails \
                     WHERE (?1 IS NULL OR subject LIKE ?1 ESCAPE '\\' OR body LIKE ?1 ESCAPE '\\' OR sender LIKE ?1 ESCAPE '\\') \
                     AND (?2 IS NULL OR category = ?2) \
                     AND (?3 IS NULL OR processed = ?3) \
                     ORDER BY timestamp DESC, id DESC LIMIT ?4"
                ),
                params![
                    opt_text_owned(pattern),
                    opt_text(query.category.as_ref().map(|c| c.label())),
                    opt_flag(query.processed),
                    limit,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("search_emails: {e}")))?;
        self.collect_emails("search_emails", rows).await
    }

    async fn count_emails(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM emails", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_emails: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_emails: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_emails: {e}"))),
        }
    }

    async fn update_email(&self, id: i64, update: &EmailUpdate) -> Result<(), DatabaseError> {
        let tasks_json = match &update.tasks {
            Some(tasks) => Some(
                serde_json::to_string(tasks)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let affected = self
            .conn()
            .execute(
                "UPDATE emails SET \
                 category = COALESCE(?1, category), \
                 tasks = COALESCE(?2, tasks), \
                 processed = MAX(processed, COALESCE(?3, processed)), \
                 updated_at = ?4 \
                 WHERE id = ?5",
                params![
                    opt_text(update.category.as_ref().map(|c| c.label())),
                    opt_text_owned(tasks_json),
                    opt_flag(update.processed),
                    fmt_datetime(&Utc::now()),
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_email: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".to_string(),
                id: id.to_string(),
            });
        }
        debug!(email_id = id, "Email updated");
        Ok(())
    }

    // ── Prompt templates ────────────────────────────────────────────

    async fn get_template(
        &self,
        purpose: TemplatePurpose,
    ) -> Result<Option<PromptTemplate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE purpose = ?1"),
                params![purpose.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_template(&row)
                .map_err(|e| DatabaseError::Query(format!("get_template row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_template: {e}"))),
        }
    }

    async fn get_all_templates(&self) -> Result<Vec<PromptTemplate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates ORDER BY purpose"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_all_templates: {e}")))?;

        let mut templates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Some(template) = row_to_template(&row)
                .map_err(|e| DatabaseError::Query(format!("get_all_templates row parse: {e}")))?
            {
                templates.push(template);
            }
        }
        Ok(templates)
    }

    async fn upsert_template(
        &self,
        purpose: TemplatePurpose,
        text: &str,
    ) -> Result<PromptTemplate, DatabaseError> {
        if !PromptTemplate::is_well_formed(text) {
            return Err(DatabaseError::Constraint(format!(
                "template for {purpose} must contain exactly one {}",
                crate::mail::model::EMAIL_PLACEHOLDER
            )));
        }

        self.conn()
            .execute(
                "INSERT INTO prompt_templates (purpose, text, version, updated_at) VALUES (?1, ?2, 1, ?3) \
                 ON CONFLICT(purpose) DO UPDATE SET \
                 text = excluded.text, \
                 version = prompt_templates.version + 1, \
                 updated_at = excluded.updated_at",
                params![purpose.to_string(), text, fmt_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_template: {e}")))?;

        info!(%purpose, "Prompt template updated");
        self.get_template(purpose)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "prompt_template".to_string(),
                id: purpose.to_string(),
            })
    }

    // ── Drafts ──────────────────────────────────────────────────────

    async fn insert_draft(&self, draft: &Draft) -> Result<Uuid, DatabaseError> {
        let metadata = serde_json::to_string(&draft.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let email_id = match draft.email_id {
            Some(id) => libsql::Value::Integer(id),
            None => libsql::Value::Null,
        };

        self.conn()
            .execute(
                &format!("INSERT INTO drafts ({DRAFT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    draft.id.to_string(),
                    email_id,
                    draft.subject.as_str(),
                    draft.body.as_str(),
                    metadata,
                    fmt_datetime(&draft.created_at),
                ],
            )
            .await
            .map_err(|e| query_error("insert_draft", e))?;

        debug!(draft_id = %draft.id, email_id = ?draft.email_id, "Draft saved");
        Ok(draft.id)
    }

    async fn get_drafts(&self, email_id: Option<i64>) -> Result<Vec<Draft>, DatabaseError> {
        let email_id = match email_id {
            Some(id) => libsql::Value::Integer(id),
            None => libsql::Value::Null,
        };
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DRAFT_COLUMNS} FROM drafts WHERE (?1 IS NULL OR email_id = ?1) \
                     ORDER BY created_at DESC"
                ),
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_drafts: {e}")))?;

        let mut drafts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let draft = row_to_draft(&row)
                .map_err(|e| DatabaseError::Query(format!("get_drafts row parse: {e}")))?;
            drafts.push(draft);
        }
        Ok(drafts)
    }

    async fn delete_draft(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute("DELETE FROM drafts WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_draft: {e}")))?;
        Ok(affected > 0)
    }

    // ── Processing log ──────────────────────────────────────────────

    async fn insert_log_entry(&self, entry: &ProcessingLogEntry) -> Result<Uuid, DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO processing_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    entry.id.to_string(),
                    entry.email_id,
                    entry.operation.as_str(),
                    entry.status.to_string(),
                    opt_text(entry.llm_response.as_deref()),
                    opt_text(entry.error_message.as_deref()),
                    fmt_datetime(&entry.timestamp),
                ],
            )
            .await
            .map_err(|e| query_error("insert_log_entry", e))?;
        Ok(entry.id)
    }

    async fn get_log_entries(
        &self,
        email_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ProcessingLogEntry>, DatabaseError> {
        let email_id = match email_id {
            Some(id) => libsql::Value::Integer(id),
            None => libsql::Value::Null,
        };
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM processing_logs WHERE (?1 IS NULL OR email_id = ?1) \
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
                ),
                params![email_id, i64::try_from(limit).unwrap_or(-1)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_log_entries: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let entry = row_to_log_entry(&row)
                .map_err(|e| DatabaseError::Query(format!("get_log_entries row parse: {e}")))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
