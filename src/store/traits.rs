//! The `Database` trait: the single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::model::{
    Draft, Email, EmailQuery, EmailUpdate, NewEmail, ProcessingLogEntry, PromptTemplate,
    TemplatePurpose,
};

/// Backend-agnostic store for emails, templates, drafts, and the processing log.
///
/// Every method is one bounded statement; nothing holds a transaction open
/// across calls.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    /// Insert an email and return its id. A caller-supplied id that already
    /// exists is a `Constraint` error.
    async fn insert_email(&self, email: &NewEmail) -> Result<i64, DatabaseError>;

    async fn get_email(&self, id: i64) -> Result<Option<Email>, DatabaseError>;

    /// Most recent first.
    async fn get_all_emails(&self, limit: usize) -> Result<Vec<Email>, DatabaseError>;

    /// Most recent first, filtered by every field set on the query.
    async fn search_emails(&self, query: &EmailQuery) -> Result<Vec<Email>, DatabaseError>;

    async fn count_emails(&self) -> Result<u64, DatabaseError>;

    /// Apply a partial update as one statement. `processed` never goes
    /// back from true to false. Unknown ids are `NotFound`.
    async fn update_email(&self, id: i64, update: &EmailUpdate) -> Result<(), DatabaseError>;

    // ── Prompt templates ────────────────────────────────────────────

    async fn get_template(
        &self,
        purpose: TemplatePurpose,
    ) -> Result<Option<PromptTemplate>, DatabaseError>;

    async fn get_all_templates(&self) -> Result<Vec<PromptTemplate>, DatabaseError>;

    /// Replace the active template for a purpose, bumping its version.
    /// Text without exactly one `{email_content}` is rejected.
    async fn upsert_template(
        &self,
        purpose: TemplatePurpose,
        text: &str,
    ) -> Result<PromptTemplate, DatabaseError>;

    // ── Drafts ──────────────────────────────────────────────────────

    async fn insert_draft(&self, draft: &Draft) -> Result<Uuid, DatabaseError>;

    /// Newest first, optionally only those for one email.
    async fn get_drafts(&self, email_id: Option<i64>) -> Result<Vec<Draft>, DatabaseError>;

    /// Returns whether a draft was deleted.
    async fn delete_draft(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Processing log ──────────────────────────────────────────────

    async fn insert_log_entry(&self, entry: &ProcessingLogEntry) -> Result<Uuid, DatabaseError>;

    /// Newest first.
    async fn get_log_entries(
        &self,
        email_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ProcessingLogEntry>, DatabaseError>;
}
