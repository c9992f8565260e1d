//! Query router: picks the context for a user request and turns every
//! outcome into text the user can read.
//!
//! Routing order:
//! 1. A focused email id gives email-scoped context
//! 2. Otherwise an inbox keyword gives inbox-scoped context
//! 3. Otherwise the query goes out with no context
//!
//! `handle_query` never returns an empty string.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::context::{email_context, inbox_context, is_inbox_query};
use crate::error::{CompletionFailure, DatabaseError};
use crate::llm::{Orchestrator, TextStream};
use crate::mail::model::{
    Category, ConversationMessage, Draft, Email, EmailQuery, TemplatePurpose,
};
use crate::store::Database;

pub const FALLBACK_REPLY: &str =
    "I apologize, but I'm having trouble processing your request. Please try again.";

const SUMMARY_QUERY: &str = "Please provide a concise summary of this email in 2-3 sentences.";
const SEARCH_SHOWN: usize = 10;
const URGENT_SHOWN: usize = 15;
const DEFAULT_SCAN_LIMIT: usize = 100;

/// Outcome of a streamed query: either live text or a ready fallback.
pub enum QueryReply {
    Stream(TextStream),
    Fallback(String),
}

pub struct EmailAgent {
    db: Arc<dyn Database>,
    orchestrator: Arc<Orchestrator>,
    scan_limit: usize,
}

impl EmailAgent {
    pub fn new(db: Arc<dyn Database>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            db,
            orchestrator,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Cap on emails read when building inbox context.
    pub fn with_scan_limit(mut self, scan_limit: usize) -> Self {
        self.scan_limit = scan_limit.max(1);
        self
    }

    /// Answer a free-text query.
    pub async fn handle_query(
        &self,
        query: &str,
        focused: Option<i64>,
        history: &[ConversationMessage],
    ) -> String {
        info!(query = %preview(query), ?focused, "Handling query");
        let context = self.build_context(query, focused).await;

        match self
            .orchestrator
            .answer(query, context.as_deref(), None, history)
            .await
        {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => FALLBACK_REPLY.to_string(),
            Err(failure) => fallback_for(&failure),
        }
    }

    /// Streaming variant of [`handle_query`](Self::handle_query).
    pub async fn stream_query(
        &self,
        query: &str,
        focused: Option<i64>,
        history: &[ConversationMessage],
    ) -> QueryReply {
        let context = self.build_context(query, focused).await;
        match self
            .orchestrator
            .stream_answer(query, context.as_deref(), None, history)
            .await
        {
            Ok(stream) => QueryReply::Stream(stream),
            Err(failure) => QueryReply::Fallback(fallback_for(&failure)),
        }
    }

    /// Draft and store a reply. `None` when the email, the template, or
    /// the model is unavailable.
    pub async fn generate_draft(&self, email_id: i64, instruction: Option<&str>) -> Option<Draft> {
        let email = match self.db.get_email(email_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                error!(email_id, "Email not found for draft");
                return None;
            }
            Err(e) => {
                error!(email_id, error = %e, "Failed to load email for draft");
                return None;
            }
        };

        let template = match self.db.get_template(TemplatePurpose::AutoReply).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                error!("No auto_reply template configured");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to load auto_reply template");
                return None;
            }
        };

        let context = format!("Category: {}", email.category_label());
        let body = match self
            .orchestrator
            .draft_reply(&email.prompt_text(), Some(&context), &template, instruction)
            .await
        {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => {
                warn!(email_id, "Model returned an empty draft");
                return None;
            }
            Err(e) => {
                error!(email_id, error = %e, "Draft generation failed");
                return None;
            }
        };

        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("original_sender".into(), json!(email.sender));
        metadata.insert("original_subject".into(), json!(email.subject));
        metadata.insert(
            "user_instruction".into(),
            instruction.map_or(Value::Null, |i| json!(i)),
        );
        metadata.insert("prompt_used".into(), json!(TemplatePurpose::AutoReply.to_string()));
        metadata.insert("template_version".into(), json!(template.version));
        metadata.insert("generated_at".into(), json!(now.to_rfc3339()));

        let draft = Draft {
            id: Uuid::new_v4(),
            email_id: Some(email_id),
            subject: format!("Re: {}", email.subject),
            body,
            metadata,
            created_at: now,
        };

        match self.db.insert_draft(&draft).await {
            Ok(id) => {
                info!(draft_id = %id, email_id, "Created draft");
                Some(draft)
            }
            Err(e) => {
                error!(email_id, error = %e, "Failed to save draft");
                None
            }
        }
    }

    /// A short model-written summary of one email.
    pub async fn summarize_email(&self, email_id: i64) -> String {
        let email = match self.db.get_email(email_id).await {
            Ok(Some(email)) => email,
            Ok(None) => return "Email not found.".to_string(),
            Err(e) => {
                error!(email_id, error = %e, "Failed to load email for summary");
                return "Email not found.".to_string();
            }
        };

        let context = email_context(&email);
        match self
            .orchestrator
            .answer(SUMMARY_QUERY, Some(&context), None, &[])
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary,
            _ => "Unable to generate summary.".to_string(),
        }
    }

    /// The stored tasks of one email, numbered. No model call.
    pub async fn task_summary(&self, email_id: i64) -> String {
        let email = match self.db.get_email(email_id).await {
            Ok(Some(email)) => email,
            _ => return "Email not found.".to_string(),
        };
        if email.tasks.is_empty() {
            return "No action items found in this email.".to_string();
        }

        let mut lines = vec!["Action Items:".to_string()];
        for (i, item) in email.tasks.iter().enumerate() {
            let mut line = format!("{}. {}", i + 1, item.task);
            if let Some(deadline) = &item.deadline {
                line.push_str(&format!(" (Due: {deadline})"));
            }
            if let Some(priority) = item.priority {
                line.push_str(&format!(" [Priority: {priority}]"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Substring search over sender, subject, and body.
    pub async fn search_inbox(&self, text: &str) -> String {
        let query = EmailQuery {
            text: Some(text.to_string()),
            ..Default::default()
        };
        let emails = match self.db.search_emails(&query).await {
            Ok(emails) => emails,
            Err(e) => {
                error!(error = %e, "Inbox search failed");
                Vec::new()
            }
        };
        if emails.is_empty() {
            return format!("No emails found matching '{text}'.");
        }

        let mut lines = vec![format!("Found {} email(s):\n", emails.len())];
        lines.extend(emails.iter().take(SEARCH_SHOWN).map(|e| {
            format!("- {} from {} [{}]", e.subject, e.sender, e.category_label())
        }));
        if emails.len() > SEARCH_SHOWN {
            lines.push(format!("\n... and {} more", emails.len() - SEARCH_SHOWN));
        }
        lines.join("\n")
    }

    /// Important and To-Do emails.
    pub async fn urgent_emails(&self) -> String {
        let mut urgent = Vec::new();
        for category in Category::KNOWN.into_iter().filter(Category::is_urgent) {
            let query = EmailQuery {
                category: Some(category),
                ..Default::default()
            };
            match self.db.search_emails(&query).await {
                Ok(found) => urgent.extend(found),
                Err(e) => error!(error = %e, "Urgent email lookup failed"),
            }
        }
        if urgent.is_empty() {
            return "No urgent emails at the moment!".to_string();
        }

        let mut lines = vec![format!("{} Urgent/Important Email(s):\n", urgent.len())];
        lines.extend(urgent.iter().take(URGENT_SHOWN).map(|e| {
            let marker = if e.category == Some(Category::Important) {
                "!"
            } else {
                "+"
            };
            format!("{marker} {} from {}", e.subject, e.sender)
        }));
        lines.join("\n")
    }

    async fn build_context(&self, query: &str, focused: Option<i64>) -> Option<String> {
        if let Some(id) = focused {
            return match self.db.get_email(id).await {
                Ok(Some(email)) => Some(email_context(&email)),
                Ok(None) => {
                    warn!(email_id = id, "Focused email not found, answering without context");
                    None
                }
                Err(e) => {
                    warn!(email_id = id, error = %e, "Failed to load focused email");
                    None
                }
            };
        }

        if !is_inbox_query(query) {
            return None;
        }
        match self.load_inbox().await {
            Ok((total, emails)) => Some(inbox_context(total, &emails)),
            Err(e) => {
                warn!(error = %e, "Failed to read inbox for context");
                None
            }
        }
    }

    async fn load_inbox(&self) -> Result<(u64, Vec<Email>), DatabaseError> {
        let total = self.db.count_emails().await?;
        let emails = self.db.get_all_emails(self.scan_limit).await?;
        Ok((total, emails))
    }
}

/// User-facing text for a failed model call.
pub fn fallback_for(failure: &CompletionFailure) -> String {
    match failure {
        CompletionFailure::ServiceUnavailable(reason) => format!(
            "The language model service is not reachable ({reason}). \
             Check that it is running and configured, then try again."
        ),
        CompletionFailure::Failed(_) => FALLBACK_REPLY.to_string(),
    }
}

fn preview(s: &str) -> String {
    s.chars().take(50).collect()
}
