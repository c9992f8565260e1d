//! Email domain: data model and inbox ingestion.

pub mod ingest;
pub mod model;

pub use model::{
    Category, ConversationMessage, Draft, Email, EmailQuery, EmailUpdate, LogStatus, NewEmail,
    Priority, ProcessingLogEntry, PromptTemplate, Speaker, TaskItem, TemplatePurpose,
};
