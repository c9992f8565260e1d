use std::sync::Arc;

use anyhow::Context;

use inbox_assist::agent::EmailAgent;
use inbox_assist::channels::CliSession;
use inbox_assist::config::AppConfig;
use inbox_assist::llm::Orchestrator;
use inbox_assist::pipeline::EmailProcessor;
use inbox_assist::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("📬 Inbox Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {} ({})", config.backend, config.active_model());

    // ── Database ─────────────────────────────────────────────────────────
    let db = store::open_store(&config).await.with_context(|| {
        format!("Failed to open database at {}", config.database_path.display())
    })?;
    let emails = db.count_emails().await.context("Failed to read the inbox")?;
    eprintln!("   Database: {} ({} emails)", config.database_path.display(), emails);

    // ── LLM ──────────────────────────────────────────────────────────────
    let orchestrator = Arc::new(
        Orchestrator::connect(&config)
            .await
            .context("Failed to set up the LLM backend")?,
    );

    let processor = EmailProcessor::new(Arc::clone(&db), Arc::clone(&orchestrator));
    let report = processor
        .process_unprocessed(config.inbox_scan_limit)
        .await
        .context("Failed to process the inbox")?;
    if report.total > 0 {
        eprintln!(
            "   Processed {}/{} new email(s) ({} failed)",
            report.successful, report.total, report.failed
        );
    }

    let agent = EmailAgent::new(Arc::clone(&db), Arc::clone(&orchestrator))
        .with_scan_limit(config.inbox_scan_limit);

    eprintln!("   Type a question and press Enter. /help for commands, /quit to exit.\n");

    let mut session = CliSession::new(agent, processor, Arc::clone(&orchestrator));
    session.run().await;

    tracing::info!(tokens = orchestrator.token_usage(), "Session ended");
    Ok(())
}
