//! Email processor: drives one email through categorize, extract, persist.
//!
//! Flow per email:
//! 1. Fetch the email
//! 2. Categorize with the `categorization` template (required)
//! 3. Extract tasks with the `action_extraction` template (optional)
//! 4. Persist category, tasks, and `processed = true` in one update
//!
//! Every step leaves a processing log entry. An email only becomes
//! processed when categorization succeeded and the update landed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::llm::Orchestrator;
use crate::mail::model::{
    Category, EmailQuery, EmailUpdate, ProcessingLogEntry, TaskItem, TemplatePurpose,
};
use crate::pipeline::locks::ItemLocks;
use crate::store::Database;

pub const OP_CATEGORIZATION: &str = "categorization";
pub const OP_ACTION_EXTRACTION: &str = "action_extraction";
pub const OP_COMPLETE: &str = "complete_processing";
pub const OP_DATABASE_UPDATE: &str = "database_update";

/// Result of a successfully processed email.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEmail {
    pub email_id: i64,
    pub category: Category,
    pub tasks: Vec<TaskItem>,
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// One entry per failed email, in input order.
    pub errors: Vec<String>,
}

pub struct EmailProcessor {
    db: Arc<dyn Database>,
    orchestrator: Arc<Orchestrator>,
    locks: Arc<ItemLocks>,
}

impl EmailProcessor {
    pub fn new(db: Arc<dyn Database>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            db,
            orchestrator,
            locks: Arc::new(ItemLocks::new()),
        }
    }

    /// Process one email. `Ok` means it is now processed.
    pub async fn process_email(&self, id: i64) -> Result<ProcessedEmail, PipelineError> {
        let _guard = self.locks.lock(id).await;

        let email = self
            .db
            .get_email(id)
            .await?
            .ok_or(PipelineError::EmailNotFound(id))?;
        info!(email_id = id, subject = %email.subject, "Processing email");

        let text = email.prompt_text();

        // Step 1: categorization (required)
        let Some(template) = self.db.get_template(TemplatePurpose::Categorization).await? else {
            let reason = "No categorization template configured";
            self.record(ProcessingLogEntry::failed(id, OP_CATEGORIZATION, reason))
                .await;
            return Err(PipelineError::MissingTemplate(
                TemplatePurpose::Categorization.to_string(),
            ));
        };

        let category = match self.orchestrator.categorize(&text, &template).await {
            Ok(category) => {
                self.record(ProcessingLogEntry::success(
                    id,
                    OP_CATEGORIZATION,
                    category.label(),
                ))
                .await;
                category
            }
            Err(e) => {
                warn!(email_id = id, error = %e, "Categorization failed");
                self.record(ProcessingLogEntry::failed(id, OP_CATEGORIZATION, e.to_string()))
                    .await;
                return Err(PipelineError::Categorization(e.to_string()));
            }
        };

        // Step 2: task extraction (optional template, never fatal)
        let tasks = match self
            .db
            .get_template(TemplatePurpose::ActionExtraction)
            .await?
        {
            Some(template) => self.orchestrator.extract_tasks(&text, &template).await,
            None => {
                warn!(email_id = id, "No action_extraction template, skipping extraction");
                Vec::new()
            }
        };
        let summary = if tasks.is_empty() {
            "No action items found".to_string()
        } else {
            format!("Found {} action items", tasks.len())
        };
        self.record(ProcessingLogEntry::success(id, OP_ACTION_EXTRACTION, summary))
            .await;

        // Step 3: persist everything in one update
        let update = EmailUpdate {
            category: Some(category.clone()),
            tasks: Some(tasks.clone()),
            processed: Some(true),
        };
        if let Err(e) = self.db.update_email(id, &update).await {
            error!(email_id = id, error = %e, "Failed to persist processing results");
            self.record(ProcessingLogEntry::failed(id, OP_DATABASE_UPDATE, e.to_string()))
                .await;
            return Err(PipelineError::Persist(e.to_string()));
        }

        self.record(ProcessingLogEntry::success(
            id,
            OP_COMPLETE,
            format!("Category: {}, Actions: {}", category, tasks.len()),
        ))
        .await;
        info!(email_id = id, %category, tasks = tasks.len(), "Email processed");

        Ok(ProcessedEmail {
            email_id: id,
            category,
            tasks,
        })
    }

    /// Process emails one after another. A failure, or a panic, in one
    /// email never stops the rest.
    pub async fn process_batch(&self, ids: &[i64]) -> BatchReport {
        info!(count = ids.len(), "Processing email batch");
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            outcomes.push((id, self.process_guarded(id).await));
        }
        summarize(outcomes)
    }

    /// Like `process_batch`, but with up to `max_in_flight` emails at once.
    /// Each email is still serialized by its lock.
    pub async fn process_batch_concurrent(&self, ids: &[i64], max_in_flight: usize) -> BatchReport {
        info!(count = ids.len(), max_in_flight, "Processing email batch concurrently");
        let mut outcomes: Vec<(usize, i64, Result<ProcessedEmail, PipelineError>)> =
            futures::stream::iter(ids.iter().copied().enumerate())
                .map(|(idx, id)| async move { (idx, id, self.process_guarded(id).await) })
                .buffer_unordered(max_in_flight.max(1))
                .collect()
                .await;
        outcomes.sort_by_key(|(idx, _, _)| *idx);
        summarize(outcomes.into_iter().map(|(_, id, r)| (id, r)).collect())
    }

    /// Process every email not yet processed, newest first.
    pub async fn process_unprocessed(&self, limit: usize) -> Result<BatchReport, PipelineError> {
        let pending = self
            .db
            .search_emails(&EmailQuery {
                processed: Some(false),
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
        Ok(self.process_batch(&ids).await)
    }

    async fn process_guarded(&self, id: i64) -> Result<ProcessedEmail, PipelineError> {
        match AssertUnwindSafe(self.process_email(id)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(email_id = id, panic = %msg, "Email processing panicked");
                Err(PipelineError::Panicked(msg))
            }
        }
    }

    /// Append a log entry. A failing log write never fails the email.
    async fn record(&self, entry: ProcessingLogEntry) {
        debug!(
            email_id = entry.email_id,
            operation = %entry.operation,
            status = %entry.status,
            "Processing step"
        );
        if let Err(e) = self.db.insert_log_entry(&entry).await {
            warn!(email_id = entry.email_id, error = %e, "Failed to write processing log");
        }
    }
}

fn summarize(outcomes: Vec<(i64, Result<ProcessedEmail, PipelineError>)>) -> BatchReport {
    let mut report = BatchReport {
        total: outcomes.len(),
        ..Default::default()
    };
    for (id, outcome) in outcomes {
        match outcome {
            Ok(_) => report.successful += 1,
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("Email {id}: {e}"));
            }
        }
    }
    info!(
        successful = report.successful,
        failed = report.failed,
        total = report.total,
        "Batch processing complete"
    );
    report
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::config::SamplingConfig;
    use crate::error::{DatabaseError, LlmError};
    use crate::llm::provider::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, TokenStream,
    };
    use crate::llm::{LlmBackend, LlmClient, RetryPolicy};
    use crate::mail::model::{Draft, Email, LogStatus, NewEmail, PromptTemplate};
    use crate::prompts::{self, CATEGORIZE_SYSTEM};
    use crate::store::LibSqlBackend;

    use super::*;

    /// Answers categorization with `category` and extraction with `tasks`.
    /// Emails whose text contains "FAIL" get a permanent error.
    struct MockEmailLlm {
        category: &'static str,
        tasks: &'static str,
    }

    #[async_trait]
    impl LlmProvider for MockEmailLlm {
        fn name(&self) -> &str {
            "mock"
        }

        fn model_name(&self) -> &str {
            "mock-email"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let user = &request.messages[1].content;
            if user.contains("FAIL") {
                return Err(LlmError::AuthFailed {
                    provider: "mock".into(),
                });
            }
            let content = if request.messages[0].content == CATEGORIZE_SYSTEM {
                self.category
            } else {
                self.tasks
            };
            Ok(CompletionResponse {
                content: content.to_string(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn complete_stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<TokenStream, LlmError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn orchestrator(category: &'static str, tasks: &'static str) -> Arc<Orchestrator> {
        let client = LlmClient::new(
            Arc::new(MockEmailLlm { category, tasks }),
            RetryPolicy::new(3, Duration::ZERO),
        );
        Arc::new(Orchestrator::new(
            client,
            LlmBackend::Ollama,
            SamplingConfig::default(),
        ))
    }

    async fn seeded_db() -> Arc<LibSqlBackend> {
        let db = LibSqlBackend::new_memory().await.unwrap();
        prompts::seed_default_templates(&db).await.unwrap();
        Arc::new(db)
    }

    async fn add_email(db: &dyn Database, subject: &str) -> i64 {
        db.insert_email(&NewEmail {
            id: None,
            sender: "boss@example.com".into(),
            subject: subject.into(),
            body: "Please send the report by Friday.".into(),
            timestamp: Utc::now(),
            has_attachment: false,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn processes_email_end_to_end() {
        let db = seeded_db().await;
        let id = add_email(db.as_ref(), "Report").await;
        let processor = EmailProcessor::new(
            db.clone(),
            orchestrator(
                "To-Do",
                r#"[{"task": "Send report", "deadline": "Friday", "priority": "high"}]"#,
            ),
        );

        let processed = processor.process_email(id).await.unwrap();
        assert_eq!(processed.category, Category::ToDo);
        assert_eq!(processed.tasks.len(), 1);

        let email = db.get_email(id).await.unwrap().unwrap();
        assert!(email.processed);
        assert_eq!(email.category, Some(Category::ToDo));
        assert_eq!(email.tasks[0].task, "Send report");

        let logs = db.get_log_entries(Some(id), 50).await.unwrap();
        let ops: Vec<&str> = logs.iter().rev().map(|l| l.operation.as_str()).collect();
        assert_eq!(ops, vec![OP_CATEGORIZATION, OP_ACTION_EXTRACTION, OP_COMPLETE]);
        assert_eq!(logs[0].llm_response.as_deref(), Some("Category: To-Do, Actions: 1"));
    }

    #[tokio::test]
    async fn zero_tasks_still_processes() {
        let db = seeded_db().await;
        let id = add_email(db.as_ref(), "Digest").await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Newsletter", "none"));

        let processed = processor.process_email(id).await.unwrap();
        assert!(processed.tasks.is_empty());
        assert!(db.get_email(id).await.unwrap().unwrap().processed);

        let logs = db.get_log_entries(Some(id), 50).await.unwrap();
        let extraction = logs
            .iter()
            .find(|l| l.operation == OP_ACTION_EXTRACTION)
            .unwrap();
        assert_eq!(extraction.status, LogStatus::Success);
        assert_eq!(extraction.llm_response.as_deref(), Some("No action items found"));
    }

    #[tokio::test]
    async fn failed_categorization_leaves_email_unprocessed() {
        let db = seeded_db().await;
        let id = add_email(db.as_ref(), "FAIL me").await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Important", "[]"));

        let err = processor.process_email(id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Categorization(_)));

        let email = db.get_email(id).await.unwrap().unwrap();
        assert!(!email.processed);
        assert!(email.category.is_none());

        let logs = db.get_log_entries(Some(id), 50).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].operation, OP_CATEGORIZATION);
        assert_eq!(logs[0].status, LogStatus::Failed);
    }

    #[tokio::test]
    async fn missing_categorization_template_aborts() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let id = add_email(db.as_ref(), "No templates").await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Important", "[]"));

        let err = processor.process_email(id).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingTemplate(_)));
        let logs = db.get_log_entries(Some(id), 50).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert!(!db.get_email(id).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn missing_extraction_template_is_not_fatal() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_template(TemplatePurpose::Categorization, "{email_content}")
            .await
            .unwrap();
        let id = add_email(db.as_ref(), "Only categorize").await;
        let processor = EmailProcessor::new(
            db.clone(),
            orchestrator("Spam", r#"[{"task": "never asked"}]"#),
        );

        let processed = processor.process_email(id).await.unwrap();
        assert_eq!(processed.category, Category::Spam);
        assert!(processed.tasks.is_empty());
    }

    #[tokio::test]
    async fn unknown_email_fails_without_log() {
        let db = seeded_db().await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Important", "[]"));
        let err = processor.process_email(404).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmailNotFound(404)));
        assert!(db.get_log_entries(Some(404), 50).await.unwrap().is_empty());
    }

    /// Delegates to an in-memory store but refuses every email update.
    struct ReadOnlyEmails {
        inner: LibSqlBackend,
    }

    #[async_trait]
    impl Database for ReadOnlyEmails {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }
        async fn insert_email(&self, email: &NewEmail) -> Result<i64, DatabaseError> {
            self.inner.insert_email(email).await
        }
        async fn get_email(&self, id: i64) -> Result<Option<Email>, DatabaseError> {
            self.inner.get_email(id).await
        }
        async fn get_all_emails(&self, limit: usize) -> Result<Vec<Email>, DatabaseError> {
            self.inner.get_all_emails(limit).await
        }
        async fn search_emails(&self, query: &EmailQuery) -> Result<Vec<Email>, DatabaseError> {
            self.inner.search_emails(query).await
        }
        async fn count_emails(&self) -> Result<u64, DatabaseError> {
            self.inner.count_emails().await
        }
        async fn update_email(&self, _id: i64, _update: &EmailUpdate) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".into()))
        }
        async fn get_template(
            &self,
            purpose: TemplatePurpose,
        ) -> Result<Option<PromptTemplate>, DatabaseError> {
            self.inner.get_template(purpose).await
        }
        async fn get_all_templates(&self) -> Result<Vec<PromptTemplate>, DatabaseError> {
            self.inner.get_all_templates().await
        }
        async fn upsert_template(
            &self,
            purpose: TemplatePurpose,
            text: &str,
        ) -> Result<PromptTemplate, DatabaseError> {
            self.inner.upsert_template(purpose, text).await
        }
        async fn insert_draft(&self, draft: &Draft) -> Result<Uuid, DatabaseError> {
            self.inner.insert_draft(draft).await
        }
        async fn get_drafts(&self, email_id: Option<i64>) -> Result<Vec<Draft>, DatabaseError> {
            self.inner.get_drafts(email_id).await
        }
        async fn delete_draft(&self, id: Uuid) -> Result<bool, DatabaseError> {
            self.inner.delete_draft(id).await
        }
        async fn insert_log_entry(
            &self,
            entry: &ProcessingLogEntry,
        ) -> Result<Uuid, DatabaseError> {
            self.inner.insert_log_entry(entry).await
        }
        async fn get_log_entries(
            &self,
            email_id: Option<i64>,
            limit: usize,
        ) -> Result<Vec<ProcessingLogEntry>, DatabaseError> {
            self.inner.get_log_entries(email_id, limit).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_logged_and_surfaced() {
        let inner = LibSqlBackend::new_memory().await.unwrap();
        prompts::seed_default_templates(&inner).await.unwrap();
        let db = Arc::new(ReadOnlyEmails { inner });
        let id = add_email(db.as_ref(), "Stuck").await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Important", "[]"));

        let err = processor.process_email(id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persist(_)));
        assert!(!db.get_email(id).await.unwrap().unwrap().processed);

        let logs = db.get_log_entries(Some(id), 50).await.unwrap();
        assert_eq!(logs[0].operation, OP_DATABASE_UPDATE);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert_eq!(logs[0].error_message.as_deref(), Some("Query failed: disk full"));
        // The earlier audit entries survive.
        assert_eq!(logs.len(), 3);
    }

    #[tokio::test]
    async fn batch_counts_failures_without_stopping() {
        let db = seeded_db().await;
        let ok1 = add_email(db.as_ref(), "one").await;
        let bad = add_email(db.as_ref(), "FAIL two").await;
        let ok2 = add_email(db.as_ref(), "three").await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Important", "[]"));

        let report = processor.process_batch(&[ok1, bad, 999, ok2]).await;
        assert_eq!(report.total, 4);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with(&format!("Email {bad}:")));
        assert!(report.errors[1].starts_with("Email 999:"));
    }

    #[tokio::test]
    async fn concurrent_batch_matches_sequential_counts() {
        let db = seeded_db().await;
        let mut ids = Vec::new();
        for i in 0..6 {
            let subject = if i % 3 == 0 { "FAIL" } else { "fine" };
            ids.push(add_email(db.as_ref(), subject).await);
        }
        let processor = EmailProcessor::new(db.clone(), orchestrator("Important", "[]"));

        let report = processor.process_batch_concurrent(&ids, 3).await;
        assert_eq!(report.total, 6);
        assert_eq!(report.successful, 4);
        assert_eq!(report.failed, 2);
        assert!(report.errors[0].starts_with(&format!("Email {}:", ids[0])));
    }

    #[tokio::test]
    async fn process_unprocessed_skips_done_emails() {
        let db = seeded_db().await;
        let first = add_email(db.as_ref(), "first").await;
        add_email(db.as_ref(), "second").await;
        let processor = EmailProcessor::new(db.clone(), orchestrator("Spam", "[]"));

        processor.process_email(first).await.unwrap();
        let report = processor.process_unprocessed(100).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.successful, 1);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "bang");
    }
}
