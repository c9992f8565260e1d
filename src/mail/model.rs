//! Email data model: items, categories, tasks, templates, drafts, and logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The placeholder every prompt template must contain exactly once.
pub const EMAIL_PLACEHOLDER: &str = "{email_content}";

/// Category label attached to an email.
///
/// The fixed set is matched first; anything else the model answers with is
/// kept verbatim as `Unlisted`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Important,
    Newsletter,
    Spam,
    ToDo,
    Unlisted(String),
}

impl Category {
    /// The fixed set, in match order.
    pub const KNOWN: [Category; 4] = [
        Category::Important,
        Category::Newsletter,
        Category::Spam,
        Category::ToDo,
    ];

    pub fn label(&self) -> &str {
        match self {
            Self::Important => "Important",
            Self::Newsletter => "Newsletter",
            Self::Spam => "Spam",
            Self::ToDo => "To-Do",
            Self::Unlisted(s) => s,
        }
    }

    /// Important and To-Do items are the ones that need the user's attention.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Important | Self::ToDo)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Important" => Self::Important,
            "Newsletter" => Self::Newsletter,
            "Spam" => Self::Spam,
            "To-Do" => Self::ToDo,
            _ => Self::Unlisted(s),
        }
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.label().to_string()
    }
}

/// Priority of an extracted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Case-insensitive parse; unknown values yield `None`.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// A task extracted from an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TaskItem {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            deadline: None,
            priority: None,
        }
    }
}

/// A stored email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: i64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub has_attachment: bool,
    pub category: Option<Category>,
    pub tasks: Vec<TaskItem>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl Email {
    /// The text substituted for the template placeholder.
    pub fn prompt_text(&self) -> String {
        format!(
            "From: {}\nSubject: {}\n\n{}",
            self.sender, self.subject, self.body
        )
    }

    pub fn category_label(&self) -> &str {
        self.category
            .as_ref()
            .map(|c| c.label())
            .unwrap_or("Uncategorized")
    }
}

/// An email to be inserted. The id is optional; seeded inboxes carry their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmail {
    #[serde(default)]
    pub id: Option<i64>,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_attachment: bool,
}

/// Partial update of an email. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct EmailUpdate {
    pub category: Option<Category>,
    pub tasks: Option<Vec<TaskItem>>,
    pub processed: Option<bool>,
}

/// Filter for inbox search. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct EmailQuery {
    /// Substring matched against subject, body, and sender.
    pub text: Option<String>,
    pub category: Option<Category>,
    pub processed: Option<bool>,
    pub limit: Option<usize>,
}

/// Which operation a prompt template drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePurpose {
    Categorization,
    ActionExtraction,
    AutoReply,
}

impl TemplatePurpose {
    pub const ALL: [TemplatePurpose; 3] = [
        TemplatePurpose::Categorization,
        TemplatePurpose::ActionExtraction,
        TemplatePurpose::AutoReply,
    ];
}

impl std::fmt::Display for TemplatePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Categorization => write!(f, "categorization"),
            Self::ActionExtraction => write!(f, "action_extraction"),
            Self::AutoReply => write!(f, "auto_reply"),
        }
    }
}

impl std::str::FromStr for TemplatePurpose {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "categorization" => Ok(Self::Categorization),
            "action_extraction" => Ok(Self::ActionExtraction),
            "auto_reply" => Ok(Self::AutoReply),
            _ => Err(format!("Unknown template purpose: {}", s)),
        }
    }
}

/// A user-editable prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub purpose: TemplatePurpose,
    pub text: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl PromptTemplate {
    /// Substitute the email text for the placeholder.
    pub fn render(&self, email_text: &str) -> String {
        self.text.replacen(EMAIL_PLACEHOLDER, email_text, 1)
    }

    /// A template is usable only with exactly one placeholder.
    pub fn is_well_formed(text: &str) -> bool {
        text.matches(EMAIL_PLACEHOLDER).count() == 1
    }
}

/// Outcome recorded for a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown log status: {}", s)),
        }
    }
}

/// Append-only record of one pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub id: Uuid,
    pub email_id: i64,
    pub operation: String,
    pub status: LogStatus,
    pub llm_response: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn success(email_id: i64, operation: &str, llm_response: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email_id,
            operation: operation.to_string(),
            status: LogStatus::Success,
            llm_response: Some(llm_response.into()),
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(email_id: i64, operation: &str, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email_id,
            operation: operation.to_string(),
            status: LogStatus::Failed,
            llm_response: None,
            error_message: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One turn of the chat with the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A generated reply. Drafts are never sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub email_id: Option<i64>,
    pub subject: String,
    pub body: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_labels_round_trip_through_strings() {
        for c in Category::KNOWN {
            let s: String = c.clone().into();
            assert_eq!(Category::from(s), c);
        }
        assert_eq!(
            Category::from("Finance".to_string()),
            Category::Unlisted("Finance".into())
        );
        assert_eq!(Category::ToDo.to_string(), "To-Do");
    }

    #[test]
    fn only_important_and_todo_are_urgent() {
        let urgent: Vec<Category> = Category::KNOWN
            .into_iter()
            .filter(Category::is_urgent)
            .collect();
        assert_eq!(urgent, vec![Category::Important, Category::ToDo]);
        assert!(!Category::Unlisted("Urgent".into()).is_urgent());
    }

    #[test]
    fn template_requires_exactly_one_placeholder() {
        assert!(PromptTemplate::is_well_formed("Classify: {email_content}"));
        assert!(!PromptTemplate::is_well_formed("Classify this"));
        assert!(!PromptTemplate::is_well_formed(
            "{email_content} and {email_content}"
        ));
    }

    #[test]
    fn template_render_substitutes_email() {
        let t = PromptTemplate {
            purpose: TemplatePurpose::Categorization,
            text: "Email:\n{email_content}\nCategory?".into(),
            version: 1,
            updated_at: Utc::now(),
        };
        assert_eq!(t.render("hello"), "Email:\nhello\nCategory?");
    }

    #[test]
    fn task_item_serializes_without_empty_fields() {
        let json = serde_json::to_string(&TaskItem::new("Call Bob")).unwrap();
        assert_eq!(json, r#"{"task":"Call Bob"}"#);
    }
}
