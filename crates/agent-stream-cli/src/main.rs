//! `agent-stream`: start an agent run or attach to its streams and print them
//! as they arrive.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use agent_stream::prelude::*;
use agent_stream::{AgentConfig, SchemaMode, StreamKind, TimelineChange, ToolStatus};
use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "agent-stream", version, about = "Consume agent text and event streams")]
struct Args {
    /// Print the final timeline as JSON instead of streaming text
    #[arg(long, global = true)]
    json: bool,

    /// Reject event chunks missing the fields their type requires
    #[arg(long, global = true)]
    strict: bool,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an agent run and consume both of its streams
    Run {
        #[arg(long)]
        user_id: String,
    },
    /// Consume existing stream URLs
    Watch {
        #[arg(long)]
        events_url: String,
        #[arg(long)]
        text_url: Option<String>,
    },
    /// Resolve a stream id to its URL
    StreamUrl {
        #[arg(long)]
        stream_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    agent_stream::init_observability();
    let args = Args::parse();
    let timeout = Duration::from_secs(args.connect_timeout);

    let mode = if args.strict {
        SchemaMode::Strict
    } else {
        SchemaMode::Loose
    };
    let source = Arc::new(HttpSource::new(timeout)?);
    let mut session =
        AgentSession::with_config(source, SessionConfig::default().schema_mode(mode));

    match args.command {
        Command::Run { user_id } => {
            let client = AgentClient::new(AgentConfig::from_env()?.connect_timeout(timeout))?;
            let urls = session
                .start(&client, &user_id)
                .await
                .context("failed to start agent run")?;
            tracing::info!(full_stream_id = %urls.full_stream_id, "consuming agent run");
            eprintln!("event stream: {}", urls.full_stream_url);
            eprintln!("text stream:  {}", urls.text_stream_url);
        }
        Command::Watch {
            events_url,
            text_url,
        } => {
            session.watch(&events_url, text_url.as_deref())?;
        }
        Command::StreamUrl { stream_id } => {
            let client = AgentClient::new(AgentConfig::from_env()?.connect_timeout(timeout))?;
            println!("{}", client.stream_url(&stream_id).await?);
            return Ok(());
        }
    }

    let mut printer = Printer::new(!args.json, session.is_consuming_text());
    let mut failed = false;
    while let Some(update) = session.next_update().await {
        match &update {
            SessionUpdate::StreamError { stream, error } => {
                eprintln!("\n[{stream:?}] {error}");
            }
            SessionUpdate::StreamCompleted {
                did_fatal_error: true,
                ..
            } => failed = true,
            _ => {}
        }
        printer.print(&session, &update)?;
    }
    session.wait().await;
    printer.finish()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(session.entries())?);
    } else {
        println!();
    }
    if failed {
        anyhow::bail!("a stream ended on a fatal error");
    }
    Ok(())
}

/// Prints session updates progressively as plain text.
struct Printer {
    enabled: bool,
    text_stream: bool,
    printed: HashMap<usize, usize>,
    tool_status: HashMap<usize, ToolStatus>,
    escapes: NewlineEscapes,
}

impl Printer {
    fn new(enabled: bool, text_stream: bool) -> Self {
        Self {
            enabled,
            text_stream,
            printed: HashMap::new(),
            tool_status: HashMap::new(),
            escapes: NewlineEscapes::default(),
        }
    }

    fn print(&mut self, session: &AgentSession, update: &SessionUpdate) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut stdout = std::io::stdout().lock();
        match update {
            SessionUpdate::TextAppended { fragment, .. } => {
                write!(stdout, "{}", self.escapes.unescape(fragment))?;
            }
            SessionUpdate::Timeline { change, .. } => {
                let (TimelineChange::Appended(index) | TimelineChange::Updated(index)) = *change
                else {
                    return Ok(());
                };
                match session.timeline().get(index) {
                    // Text entries only print when no text stream is attached.
                    Some(Entry::Text(text)) if !self.text_stream => {
                        let done = self.printed.entry(index).or_default();
                        if let Some(delta) = text.content.get(*done..) {
                            write!(stdout, "{delta}")?;
                        }
                        *done = text.content.len();
                    }
                    Some(Entry::Tool(tool)) => {
                        if self.tool_status.insert(index, tool.status) != Some(tool.status) {
                            eprintln!("\n[tool {}] {:?}", tool.name, tool.status);
                        }
                    }
                    Some(Entry::Break) if !self.text_stream => writeln!(stdout)?,
                    _ => {}
                }
            }
            SessionUpdate::StreamCompleted {
                stream: StreamKind::Events,
                total_chunks,
                ..
            } => {
                tracing::debug!(total_chunks, "event stream finished");
            }
            _ => {}
        }
        stdout.flush()?;
        Ok(())
    }

    /// Writes a backslash still held back when the text stream ended.
    fn finish(&mut self) -> anyhow::Result<()> {
        let rest = self.escapes.finish();
        if self.enabled && !rest.is_empty() {
            let mut stdout = std::io::stdout().lock();
            write!(stdout, "{rest}")?;
            stdout.flush()?;
        }
        Ok(())
    }
}

/// Turns literal `\n` escapes into newlines across fragment boundaries.
#[derive(Debug, Default)]
struct NewlineEscapes {
    pending_backslash: bool,
}

impl NewlineEscapes {
    fn unescape(&mut self, fragment: &str) -> String {
        let mut text = String::with_capacity(fragment.len() + 1);
        if std::mem::take(&mut self.pending_backslash) {
            text.push('\\');
        }
        text.push_str(fragment);
        if text.ends_with('\\') {
            text.pop();
            self.pending_backslash = true;
        }
        text.replace("\\n", "\n")
    }

    fn finish(&mut self) -> &'static str {
        if std::mem::take(&mut self.pending_backslash) {
            "\\"
        } else {
            ""
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unescape_all(fragments: &[&str]) -> String {
        let mut escapes = NewlineEscapes::default();
        let mut out = fragments
            .iter()
            .map(|f| escapes.unescape(f))
            .collect::<String>();
        out.push_str(escapes.finish());
        out
    }

    #[test]
    fn escape_within_one_fragment_becomes_newline() {
        assert_eq!(unescape_all(&["Hello\\nworld"]), "Hello\nworld");
    }

    #[test]
    fn escape_split_across_fragments_becomes_newline() {
        assert_eq!(unescape_all(&["Hello\\", "nworld"]), "Hello\nworld");
        assert_eq!(unescape_all(&["a\\", "", "nb"]), "a\nb");
    }

    #[test]
    fn lone_trailing_backslash_is_kept() {
        assert_eq!(unescape_all(&["path\\", "x"]), "path\\x");
        assert_eq!(unescape_all(&["end\\"]), "end\\");
    }

    #[test]
    fn matches_whole_text_replacement() {
        let fragments = ["one\\", "ntwo\\n", "\\", "\\nthree"];
        let whole = fragments.concat().replace("\\n", "\n");
        assert_eq!(unescape_all(&fragments), whole);
    }
}
