//! Email processing pipeline.
//!
//! Every unprocessed email flows through:
//! 1. `Orchestrator::categorize()` with the stored categorization template
//! 2. `Orchestrator::extract_tasks()` with the stored extraction template
//! 3. One store update that marks the email processed
//!
//! **No email is sent.** The pipeline only classifies and annotates.

pub mod locks;
pub mod processor;

pub use locks::{ItemGuard, ItemLocks};
pub use processor::{BatchReport, EmailProcessor, ProcessedEmail};
