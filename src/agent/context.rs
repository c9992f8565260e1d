//! Context text handed to the model alongside a user query.

use std::collections::BTreeMap;

use crate::mail::model::Email;

/// Substrings that mark a query as being about the whole inbox.
pub const INBOX_KEYWORDS: &[&str] = &[
    "show",
    "list",
    "urgent",
    "important",
    "all",
    "how many",
    "what",
    "tasks",
    "emails from",
];

/// Recent emails listed in inbox context.
const RECENT_IN_CONTEXT: usize = 5;

/// Case-insensitive substring match against [`INBOX_KEYWORDS`].
pub fn is_inbox_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    INBOX_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Context for a single email: headers, body, and its stored tasks.
pub fn email_context(email: &Email) -> String {
    let mut parts = vec![
        format!("Email ID: {}", email.id),
        format!("From: {}", email.sender),
        format!("Subject: {}", email.subject),
        format!("Date: {}", email.timestamp.to_rfc3339()),
        format!("Category: {}", email.category_label()),
        format!("\nContent:\n{}", email.body),
    ];

    if !email.tasks.is_empty() {
        parts.push(format!("\nAction Items: {}", email.tasks.len()));
        parts.extend(email.tasks.iter().map(|t| format!("  - {}", t.task)));
    }

    parts.join("\n")
}

/// Context for the inbox as a whole.
///
/// `total` is the full inbox size; `emails` is the scanned window, newest
/// first. When the window is smaller than the inbox, the counts are labelled
/// as covering only that window. An empty inbox still yields context so the
/// model can say so.
pub fn inbox_context(total: u64, emails: &[Email]) -> String {
    let mut histogram: BTreeMap<&str, usize> = BTreeMap::new();
    for email in emails {
        *histogram.entry(email.category_label()).or_default() += 1;
    }
    let total_tasks: usize = emails.iter().map(|e| e.tasks.len()).sum();

    let mut parts = vec![format!("Inbox: {total} items")];
    if emails.is_empty() {
        return parts.join("\n");
    }

    let categories = histogram
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ");
    if (emails.len() as u64) < total {
        parts.push(format!("Breakdown of the {} most recent emails:", emails.len()));
    }
    parts.push(format!("Categories: {categories}"));
    parts.push(format!("Total Action Items: {total_tasks}"));
    parts.push("\nRecent Emails:".to_string());
    parts.extend(emails.iter().take(RECENT_IN_CONTEXT).map(|e| {
        let category = e.category.as_ref().map(|c| c.label()).unwrap_or("N/A");
        format!("  - [{category}] {} from {}", e.subject, e.sender)
    }));

    parts.join("\n")
}
