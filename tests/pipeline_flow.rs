//! End-to-end flow: load an inbox, process it, then query and draft.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use inbox_assist::agent::EmailAgent;
use inbox_assist::config::SamplingConfig;
use inbox_assist::error::LlmError;
use inbox_assist::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, TokenStream,
};
use inbox_assist::llm::{LlmBackend, LlmClient, Orchestrator, RetryPolicy};
use inbox_assist::mail::ingest;
use inbox_assist::mail::model::{Category, ConversationMessage, LogStatus};
use inbox_assist::pipeline::EmailProcessor;
use inbox_assist::prompts::{self, CATEGORIZE_SYSTEM, EXTRACT_SYSTEM, REPLY_SYSTEM};
use inbox_assist::store::{Database, LibSqlBackend};

/// Stub LLM provider that answers by looking at the prompt text.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }

    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.messages[0].content.as_str();
        let user = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");

        if user.contains("BROKEN") {
            return Err(LlmError::InvalidResponse {
                provider: "stub".into(),
                reason: "garbled".into(),
            });
        }

        let content = if system == CATEGORIZE_SYSTEM {
            if user.contains("unsubscribe") {
                "This looks like a Newsletter".to_string()
            } else {
                "Category: Important".to_string()
            }
        } else if system == EXTRACT_SYSTEM {
            if user.contains("report") {
                r#"Sure, here you go: [{"task": "Send report", "deadline": "Friday"}] thanks!"#
                    .to_string()
            } else {
                "[]".to_string()
            }
        } else if system == REPLY_SYSTEM {
            "Thanks, I will send it Friday.".to_string()
        } else if user.contains("Inbox: ") {
            format!("Context seen: {}", user.lines().next().unwrap_or(""))
        } else {
            "Hello!".to_string()
        };

        Ok(CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_stream(&self, _request: CompletionRequest) -> Result<TokenStream, LlmError> {
        Ok(Box::pin(futures::stream::iter(vec![Ok("Hello!".to_string())])))
    }
}

const INBOX: &str = r#"[
  {"id": 1, "sender": "boss@corp.com", "subject": "Quarterly report",
   "body": "Please send the report by Friday.", "timestamp": "2024-11-10T09:00:00"},
  {"id": 2, "sender": "news@shop.com", "subject": "Deals",
   "body": "Big savings. Click to unsubscribe.", "timestamp": "2024-11-09T08:00:00"},
  {"id": 3, "sender": "noise@corp.com", "subject": "BROKEN",
   "body": "???", "timestamp": "2024-11-08T08:00:00"}
]"#;

fn orchestrator() -> Arc<Orchestrator> {
    let client = LlmClient::new(Arc::new(StubLlm), RetryPolicy::new(3, Duration::ZERO));
    Arc::new(Orchestrator::new(client, LlmBackend::Ollama, SamplingConfig::default()))
}

async fn seeded_store(db: &dyn Database) {
    prompts::seed_default_templates(db).await.unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(INBOX.as_bytes()).unwrap();
    assert_eq!(ingest::load_inbox_file(db, file.path()).await.unwrap(), 3);
}

#[tokio::test]
async fn inbox_is_processed_and_queried() {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    seeded_store(db.as_ref()).await;
    let orchestrator = orchestrator();

    let processor = EmailProcessor::new(Arc::clone(&db), Arc::clone(&orchestrator));
    let report = processor.process_unprocessed(100).await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("Email 3:"));

    let report_email = db.get_email(1).await.unwrap().unwrap();
    assert!(report_email.processed);
    assert_eq!(report_email.category, Some(Category::Important));
    assert_eq!(report_email.tasks.len(), 1);
    assert_eq!(report_email.tasks[0].task, "Send report");

    let newsletter = db.get_email(2).await.unwrap().unwrap();
    assert_eq!(newsletter.category, Some(Category::Newsletter));
    assert!(newsletter.tasks.is_empty());

    let broken = db.get_email(3).await.unwrap().unwrap();
    assert!(!broken.processed);
    let logs = db.get_log_entries(Some(3), 10).await.unwrap();
    assert_eq!(logs[0].status, LogStatus::Failed);

    // Reprocessing only touches what is still pending.
    let again = processor.process_unprocessed(100).await.unwrap();
    assert_eq!(again.total, 1);

    let agent = EmailAgent::new(Arc::clone(&db), Arc::clone(&orchestrator));
    let reply = agent
        .handle_query("how many emails do I have?", None, &[])
        .await;
    assert_eq!(reply, "Context seen: Email Context:");

    let history = vec![
        ConversationMessage::user("hi"),
        ConversationMessage::assistant("Hello!"),
    ];
    assert_eq!(agent.handle_query("thanks", None, &history).await, "Hello!");

    let tasks = agent.task_summary(1).await;
    assert_eq!(tasks, "Action Items:\n1. Send report (Due: Friday)");

    let urgent = agent.urgent_emails().await;
    assert!(urgent.contains("! Quarterly report from boss@corp.com"));

    let draft = agent.generate_draft(1, None).await.unwrap();
    assert_eq!(draft.subject, "Re: Quarterly report");
    assert_eq!(draft.body, "Thanks, I will send it Friday.");
    assert_eq!(db.get_drafts(Some(1)).await.unwrap().len(), 1);

    assert!(orchestrator.token_usage() > 0);
}

#[tokio::test]
async fn empty_inbox_query_still_reaches_model() {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let agent = EmailAgent::new(db, orchestrator());

    let reply = agent.handle_query("show me all emails", None, &[]).await;
    assert_eq!(reply, "Context seen: Email Context:");
}

#[tokio::test]
async fn on_disk_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("inbox.db");

    {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
        seeded_store(db.as_ref()).await;
        let processor = EmailProcessor::new(Arc::clone(&db), orchestrator());
        processor.process_email(1).await.unwrap();
    }

    let db = LibSqlBackend::new_local(&path).await.unwrap();
    assert_eq!(prompts::seed_default_templates(&db).await.unwrap(), 0);
    let email = db.get_email(1).await.unwrap().unwrap();
    assert!(email.processed);
    assert_eq!(email.category, Some(Category::Important));
}
