//! Line-oriented chat front end.
//!
//! Streams the character's reply in place on stdout and reads user input one
//! line at a time. Lines starting with `/` are chat commands.

use std::error::Error;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::core::effects::SessionSink;
use crate::core::emotion::Emotion;
use crate::core::session::{Session, SessionError};
use crate::core::substitution::{substitute_placeholders, Names};

const HELP: &str = "Commands:\n  \
/regenerate   Replace the character's last reply\n  \
/history      Show the conversation so far\n  \
/help         Show this help\n  \
/quit         Leave the chat (Ctrl+C also works)";

/// Renders session events as plain text.
pub struct TerminalSink<W: Write + Send> {
    out: W,
    /// Reply text already written for the reply in progress.
    streamed: String,
    input_enabled: bool,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streamed: String::new(),
            input_enabled: true,
        }
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn prompt(&mut self) {
        let _ = write!(self.out, "> ");
        let _ = self.out.flush();
    }

    fn write_line(&mut self, line: &str) {
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> SessionSink for TerminalSink<W> {
    fn display_message(&mut self, author: &str, text: &str, is_user: bool) {
        // Echoing the user's own line again right after they typed it is noise.
        if is_user && !self.input_enabled {
            return;
        }
        self.write_line(&format!("{author}: {text}"));
    }

    fn update_reply(&mut self, author: &str, text: &str) {
        if self.streamed.is_empty() {
            let _ = write!(self.out, "{author}: ");
        }
        match text.strip_prefix(self.streamed.as_str()) {
            Some(delta) => {
                let _ = write!(self.out, "{delta}");
            }
            // A snapshot rewrote earlier text; restart the line.
            None => {
                let _ = write!(self.out, "\n{author}: {text}");
            }
        }
        let _ = self.out.flush();
        self.streamed = text.to_string();
    }

    fn finish_reply(&mut self, author: &str, text: &str) {
        let streamed = std::mem::take(&mut self.streamed);
        if streamed.is_empty() {
            self.write_line(&format!("{author}: {text}"));
        } else if streamed == text {
            self.write_line("");
        } else {
            self.write_line("");
            self.write_line(&format!("{author}: {text}"));
        }
    }

    fn set_expression(&mut self, character_name: &str, emotion: Emotion) {
        self.write_line(&format!("  [{character_name}: {emotion}]"));
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
    }

    fn notify_error(&mut self, message: &str) {
        if !self.streamed.is_empty() {
            self.streamed.clear();
            self.write_line("");
        }
        eprintln!("❌ {message}");
    }

    fn play_audio(&mut self, path: &std::path::Path) {
        self.write_line(&format!("  [voice clip: {}]", path.display()));
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Message(&'a str),
    Regenerate,
    History,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    match trimmed {
        "/quit" | "/exit" => ChatInput::Quit,
        "/regenerate" | "/retry" => ChatInput::Regenerate,
        "/history" => ChatInput::History,
        "/help" => ChatInput::Help,
        _ if trimmed.starts_with('/') => ChatInput::Unknown(trimmed),
        _ => ChatInput::Message(trimmed),
    }
}

/// Writes every ledger entry with placeholders resolved.
pub fn show_history<W: Write + Send>(
    session: &Session,
    sink: &mut TerminalSink<W>,
) -> Result<(), SessionError> {
    let record = session.record()?;
    let names = Names::new(session.user_name(), &record.character_name);
    for (id, message) in record.chat_content.iter() {
        let text = substitute_placeholders(&message.text, names);
        sink.write_line(&format!("[{id}] {}: {text}", message.author_name));
    }
    Ok(())
}

/// Runs an interactive chat until EOF, `/quit` or Ctrl+C.
pub async fn run_chat(mut session: Session) -> Result<(), Box<dyn Error>> {
    let cancel = session.cancellation_token();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut sink = TerminalSink::new(std::io::stdout());
    sink.write_line(&format!(
        "Chatting with {}. Type /help for commands.",
        session.character_name()
    ));
    show_history(&session, &mut sink)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        sink.prompt();
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let result = match parse_input(&line) {
            ChatInput::Quit => break,
            ChatInput::Help => {
                sink.write_line(HELP);
                continue;
            }
            ChatInput::History => {
                show_history(&session, &mut sink)?;
                continue;
            }
            ChatInput::Unknown(command) => {
                sink.notify_error(&format!("Unknown command: {command}"));
                continue;
            }
            ChatInput::Regenerate => session.regenerate(&mut sink).await.map(|_| ()),
            ChatInput::Message(text) => session
                .handle_user_message(text, &mut sink)
                .await
                .map(|_| ()),
        };

        match result {
            Err(SessionError::Cancelled) => break,
            // Already reported through the sink.
            Err(err) => debug!(error = %err, "turn failed"),
            Ok(()) => {}
        }
    }

    sink.write_line("");
    Ok(())
}
