//! Persistence layer: libSQL-backed storage for emails, templates, drafts,
//! and the processing log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;
use crate::mail::ingest;
use crate::prompts;

/// Open the configured database, seed missing templates, and load the
/// optional seed inbox.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn Database>> {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.database_path).await?);

    let seeded = prompts::seed_default_templates(db.as_ref()).await?;
    if let Some(path) = &config.inbox_seed_path {
        let loaded = ingest::load_inbox_file(db.as_ref(), path).await?;
        info!(path = %path.display(), loaded, "Seed inbox loaded");
    }

    info!(
        path = %config.database_path.display(),
        templates_seeded = seeded,
        "Store ready"
    );
    Ok(db)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn open_store_seeds_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mut inbox = tempfile::NamedTempFile::new().unwrap();
        inbox
            .write_all(
                br#"[{"sender": "a@b.c", "subject": "Hi", "body": "Hello",
                      "timestamp": "2024-01-01T00:00:00Z"}]"#,
            )
            .unwrap();
        let config = AppConfig {
            database_path: dir.path().join("store.db"),
            inbox_seed_path: Some(inbox.path().to_path_buf()),
            ..AppConfig::default()
        };

        let db = open_store(&config).await.unwrap();
        assert_eq!(db.count_emails().await.unwrap(), 1);
        assert_eq!(db.get_all_templates().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn bad_seed_file_is_an_ingest_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_path: dir.path().join("store.db"),
            inbox_seed_path: Some(dir.path().join("missing.json")),
            ..AppConfig::default()
        };
        assert!(matches!(open_store(&config).await, Err(Error::Ingest(_))));
    }
}
