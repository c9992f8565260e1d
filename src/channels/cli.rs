//! CLI channel: stdin/stdout REPL over the inbox assistant.

use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{EmailAgent, QueryReply};
use crate::llm::Orchestrator;
use crate::mail::model::ConversationMessage;
use crate::pipeline::EmailProcessor;

/// Conversation turns kept in memory. The orchestrator sends fewer.
const HISTORY_CAP: usize = 50;

const HELP: &str = "\
Commands:
  /process <id>          categorize and extract tasks for one email
  /process-all           process every unprocessed email
  /draft <id> [text]     draft a reply, with optional instructions
  /summary <id>          summarize one email
  /tasks <id>            list stored action items
  /search <text>         search sender, subject, and body
  /urgent                list Important and To-Do emails
  /focus <id>            ask questions about one email
  /unfocus               ask questions about the whole inbox
  /usage                 tokens used this session
  /help                  show this list
  /quit                  exit
Anything else is sent to the assistant.";

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Process(i64),
    ProcessAll,
    Draft {
        id: i64,
        instruction: Option<String>,
    },
    Summary(i64),
    Tasks(i64),
    Search(String),
    Urgent,
    Focus(i64),
    Unfocus,
    Usage,
    Help,
    Quit,
    Query(String),
    /// A command that was recognised but given bad arguments.
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if !trimmed.starts_with('/') {
            return Self::Query(trimmed.to_string());
        }

        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };

        match head.to_lowercase().as_str() {
            "/process" => with_id(rest, "/process <id>", Self::Process),
            "/process-all" => Self::ProcessAll,
            "/draft" => {
                let (id, instruction) = match rest.split_once(char::is_whitespace) {
                    Some((id, text)) => (id, Some(text.trim().to_string())),
                    None => (rest, None),
                };
                with_id(id, "/draft <id> [instructions]", |id| Self::Draft {
                    id,
                    instruction: instruction.filter(|s| !s.is_empty()),
                })
            }
            "/summary" => with_id(rest, "/summary <id>", Self::Summary),
            "/tasks" => with_id(rest, "/tasks <id>", Self::Tasks),
            "/search" if rest.is_empty() => Self::Invalid("Usage: /search <text>".into()),
            "/search" => Self::Search(rest.to_string()),
            "/urgent" => Self::Urgent,
            "/focus" => with_id(rest, "/focus <id>", Self::Focus),
            "/unfocus" => Self::Unfocus,
            "/usage" => Self::Usage,
            "/help" | "/?" => Self::Help,
            "/quit" | "/exit" | "/q" => Self::Quit,
            other => Self::Invalid(format!("Unknown command {other}. Type /help.")),
        }
    }
}

fn with_id(arg: &str, usage: &str, build: impl FnOnce(i64) -> Command) -> Command {
    match arg.parse::<i64>() {
        Ok(id) => build(id),
        Err(_) => Command::Invalid(format!("Usage: {usage}")),
    }
}

/// Interactive session state.
pub struct CliSession {
    agent: EmailAgent,
    processor: EmailProcessor,
    orchestrator: Arc<Orchestrator>,
    history: Vec<ConversationMessage>,
    focused: Option<i64>,
}

impl CliSession {
    pub fn new(
        agent: EmailAgent,
        processor: EmailProcessor,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            agent,
            processor,
            orchestrator,
            history: Vec::new(),
            focused: None,
        }
    }

    /// Read commands from stdin until EOF or `/quit`.
    pub async fn run(&mut self) {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        eprint!("> ");
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        eprint!("> ");
                        continue;
                    }
                    if !self.handle(Command::parse(&line)).await {
                        break;
                    }
                    eprint!("> ");
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    }

    /// Run one command. Returns `false` when the session should end.
    pub async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Quit => return false,
            Command::Help => println!("{HELP}"),
            Command::Invalid(msg) => println!("{msg}"),
            Command::Process(id) => match self.processor.process_email(id).await {
                Ok(done) => println!(
                    "Email {id}: {} with {} action item(s)",
                    done.category,
                    done.tasks.len()
                ),
                Err(e) => println!("Email {id} not processed: {e}"),
            },
            Command::ProcessAll => match self.processor.process_unprocessed(usize::MAX).await {
                Ok(report) => {
                    println!(
                        "Processed {}/{} email(s), {} failed",
                        report.successful, report.total, report.failed
                    );
                    for error in &report.errors {
                        println!("  {error}");
                    }
                }
                Err(e) => println!("Could not list unprocessed emails: {e}"),
            },
            Command::Draft { id, instruction } => {
                match self.agent.generate_draft(id, instruction.as_deref()).await {
                    Some(draft) => println!("\n{}\n\n{}\n", draft.subject, draft.body),
                    None => println!("Could not draft a reply to email {id}."),
                }
            }
            Command::Summary(id) => println!("\n{}\n", self.agent.summarize_email(id).await),
            Command::Tasks(id) => println!("\n{}\n", self.agent.task_summary(id).await),
            Command::Search(text) => println!("\n{}\n", self.agent.search_inbox(&text).await),
            Command::Urgent => println!("\n{}\n", self.agent.urgent_emails().await),
            Command::Focus(id) => {
                self.focused = Some(id);
                println!("Questions now refer to email {id}.");
            }
            Command::Unfocus => {
                self.focused = None;
                println!("Questions now refer to the whole inbox.");
            }
            Command::Usage => println!(
                "{} tokens used ({} {})",
                self.orchestrator.token_usage(),
                self.orchestrator.backend(),
                self.orchestrator.model_name()
            ),
            Command::Query(query) => self.ask(query).await,
        }
        true
    }

    async fn ask(&mut self, query: String) {
        let reply = match self
            .agent
            .stream_query(&query, self.focused, &self.history)
            .await
        {
            QueryReply::Stream(mut stream) => {
                println!();
                while let Some(fragment) = stream.next().await {
                    print!("{fragment}");
                    let _ = std::io::stdout().flush();
                }
                println!("\n");
                if stream.failed() || stream.text().trim().is_empty() {
                    println!("{}\n", crate::agent::FALLBACK_REPLY);
                    crate::agent::FALLBACK_REPLY.to_string()
                } else {
                    stream.text().to_string()
                }
            }
            QueryReply::Fallback(text) => {
                println!("\n{text}\n");
                text
            }
        };

        self.history.push(ConversationMessage::user(query));
        self.history.push(ConversationMessage::assistant(reply));
        let excess = self.history.len().saturating_sub(HISTORY_CAP);
        self.history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_query() {
        assert_eq!(
            Command::parse("  what is urgent?  "),
            Command::Query("what is urgent?".into())
        );
    }

    #[test]
    fn id_commands() {
        assert_eq!(Command::parse("/process 4"), Command::Process(4));
        assert_eq!(Command::parse("/SUMMARY 2"), Command::Summary(2));
        assert_eq!(Command::parse("/tasks 9"), Command::Tasks(9));
        assert_eq!(Command::parse("/focus 3"), Command::Focus(3));
        assert!(matches!(Command::parse("/process x"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/summary"), Command::Invalid(_)));
    }

    #[test]
    fn draft_takes_optional_instructions() {
        assert_eq!(
            Command::parse("/draft 5"),
            Command::Draft {
                id: 5,
                instruction: None
            }
        );
        assert_eq!(
            Command::parse("/draft 5   decline politely"),
            Command::Draft {
                id: 5,
                instruction: Some("decline politely".into())
            }
        );
    }

    #[test]
    fn search_keeps_full_text() {
        assert_eq!(
            Command::parse("/search quarterly report"),
            Command::Search("quarterly report".into())
        );
        assert!(matches!(Command::parse("/search"), Command::Invalid(_)));
    }

    #[test]
    fn bare_commands() {
        assert_eq!(Command::parse("/process-all"), Command::ProcessAll);
        assert_eq!(Command::parse("/urgent"), Command::Urgent);
        assert_eq!(Command::parse("/usage"), Command::Usage);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert!(matches!(Command::parse("/launch"), Command::Invalid(_)));
    }

    #[test]
    fn help_lists_itself() {
        assert_eq!(Command::parse("/help"), Command::Help);
        assert!(HELP.lines().any(|line| line.trim_start().starts_with("/help ")));
    }
}
