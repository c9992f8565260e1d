//! Inbox Assist: LLM-backed email triage, task extraction, and drafting.

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod prompts;
pub mod store;
