//! Load a mock inbox from a JSON file.
//!
//! The file is a JSON array of objects with `sender`, `subject`, `body`,
//! `timestamp`, and optional `id` and `has_attachment`. Timestamps may be
//! RFC 3339 or naive ISO 8601 (read as UTC).

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{DatabaseError, IngestError};
use crate::mail::model::NewEmail;
use crate::store::Database;

#[derive(Debug, Deserialize)]
struct InboxRecord {
    #[serde(default)]
    id: Option<i64>,
    sender: String,
    subject: String,
    body: String,
    timestamp: String,
    #[serde(default)]
    has_attachment: bool,
}

impl InboxRecord {
    fn into_new_email(self) -> NewEmail {
        let timestamp = parse_timestamp(&self.timestamp).unwrap_or_else(|| {
            warn!(timestamp = %self.timestamp, "Unparsable timestamp, using now");
            Utc::now()
        });
        NewEmail {
            id: self.id,
            sender: self.sender,
            subject: self.subject,
            body: self.body,
            timestamp,
            has_attachment: self.has_attachment,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an inbox file's contents.
pub fn parse_inbox(json: &str) -> Result<Vec<NewEmail>, IngestError> {
    let records: Vec<InboxRecord> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(InboxRecord::into_new_email).collect())
}

/// Insert every email in the file. Emails whose id already exists are
/// skipped. Returns how many were inserted.
pub async fn load_inbox_file(db: &dyn Database, path: &Path) -> Result<usize, IngestError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| IngestError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let emails = parse_inbox(&raw)?;

    let mut inserted = 0;
    for email in &emails {
        match db.insert_email(email).await {
            Ok(_) => inserted += 1,
            Err(DatabaseError::Constraint(_)) => {
                warn!(id = ?email.id, subject = %email.subject, "Email already loaded, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        path = %path.display(),
        inserted,
        skipped = emails.len() - inserted,
        "Loaded inbox file"
    );
    Ok(inserted)
}
