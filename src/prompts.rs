//! Fixed system prompts and the default user-editable templates.

use tracing::info;

use crate::error::DatabaseError;
use crate::mail::model::TemplatePurpose;
use crate::store::Database;

pub const CATEGORIZE_SYSTEM: &str =
    "You are an email classification expert. Respond with ONLY the category name.";

pub const EXTRACT_SYSTEM: &str = "You are an expert at extracting actionable tasks from emails. \
Always respond with valid JSON.";

pub const REPLY_SYSTEM: &str = "You are a professional email assistant. \
Write clear, concise, and appropriate email responses.";

pub const ANSWER_SYSTEM: &str = "You are an intelligent email productivity assistant. \
Help users manage their inbox, understand emails, and draft responses. \
Be concise, helpful, and professional. \
If you reference specific emails, cite them clearly.";

const DEFAULT_CATEGORIZATION: &str = "Categorize the following email into exactly one of these \
categories: Important, Newsletter, Spam, To-Do.

- Important: time-sensitive or from people the user works with closely
- Newsletter: bulk updates, digests, marketing the user subscribed to
- Spam: unsolicited, suspicious, or irrelevant
- To-Do: asks the user to do something specific

Email:
{email_content}

Respond with only the category name.";

const DEFAULT_ACTION_EXTRACTION: &str = "Extract every action item from the email below. \
Respond with a JSON array. Each element is an object with \"task\" (string), \
\"deadline\" (string or null), and \"priority\" (\"high\", \"medium\", or \"low\"). \
Respond with [] if there are none.

Email:
{email_content}";

const DEFAULT_AUTO_REPLY: &str = "Draft a reply to the email below. Match its tone, \
answer any questions it asks, and keep it short. Do not invent commitments.

Email:
{email_content}";

/// The shipped template text for a purpose.
pub fn default_template(purpose: TemplatePurpose) -> &'static str {
    match purpose {
        TemplatePurpose::Categorization => DEFAULT_CATEGORIZATION,
        TemplatePurpose::ActionExtraction => DEFAULT_ACTION_EXTRACTION,
        TemplatePurpose::AutoReply => DEFAULT_AUTO_REPLY,
    }
}

/// Insert the default template for every purpose that has none yet.
/// Returns how many were added.
pub async fn seed_default_templates(db: &dyn Database) -> Result<usize, DatabaseError> {
    let mut added = 0;
    for purpose in TemplatePurpose::ALL {
        if db.get_template(purpose).await?.is_none() {
            db.upsert_template(purpose, default_template(purpose)).await?;
            info!(%purpose, "Seeded default prompt template");
            added += 1;
        }
    }
    Ok(added)
}
