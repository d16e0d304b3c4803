//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod character_list;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::character::record::ConversationMethod;
use crate::character::service::CharacterService;
use crate::cli::character_list::{list_characters, show_character};
use crate::core::config::{ConfigOrchestrator, DataPaths};
use crate::core::message::MessageId;
use crate::core::session;
use crate::core::store::CharacterStore;
use crate::providers::character_ai::{self, CharacterAiClient};
use crate::ui::terminal::{run_chat, TerminalSink};
use crate::utils::logging;

#[derive(Parser)]
#[command(name = "soul-of-waifu")]
#[command(about = "Chat with AI characters across several LLM providers")]
#[command(
    long_about = "Soul of Waifu keeps one conversation per character and talks to it through \
the character's conversation method. Every message has a stable ID that edit, delete and \
continue-from refer to; use 'show <name>' to see them.\n\n\
Data lives in configuration/characters.json, settings.json and api.json under the data \
directory (the platform data directory unless --data-dir is given).\n\n\
Environment Variables:\n\
  SOW_LOG           Log filter, e.g. 'info' or 'soul_of_waifu=debug' (default: warn)\n\n\
Chat commands:\n\
  /regenerate       Replace the character's last reply\n\
  /history          Show the conversation so far\n\
  /quit             Leave the chat (Ctrl+C also works)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory holding configuration/
    #[arg(short = 'd', long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Write logs to the specified file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored characters
    List,
    /// Show a character and its conversation with message IDs
    Show { name: String },
    /// Create a character from a chara_card_v2 JSON card
    Add {
        /// Card file to import
        #[arg(short = 'c', long, value_name = "FILE")]
        card: PathBuf,
        /// Conversation method: mistral, openai, openrouter or local_llm
        #[arg(short = 'm', long, default_value = "mistral", value_parser = parse_method)]
        method: ConversationMethod,
    },
    /// Create a character from its Character AI id and open a new chat with it
    AddCai { character_id: String },
    /// Remove a character and its conversation
    Remove { name: String },
    /// Start chatting with a character
    Chat { name: String },
    /// Replace the text of a message
    Edit {
        name: String,
        id: MessageId,
        /// New text (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        text: Vec<String>,
    },
    /// Delete messages by ID
    Delete {
        name: String,
        #[arg(required = true)]
        ids: Vec<MessageId>,
    },
    /// Drop every message after the given one
    ContinueFrom { name: String, id: MessageId },
    /// Replace the character's last reply with a new one
    Regenerate { name: String },
    /// Store an API token in api.json (e.g. mistral_api_token)
    SetToken { key: String, value: String },
}

fn parse_method(value: &str) -> Result<ConversationMethod, String> {
    ConversationMethod::parse(value).ok_or_else(|| {
        let known: Vec<&str> = ConversationMethod::ALL.iter().map(|m| m.id()).collect();
        format!(
            "unknown conversation method '{value}' (expected one of: {})",
            known.join(", ")
        )
    })
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.log.as_deref())?;

    let paths = match args.data_dir {
        Some(dir) => DataPaths::new(dir),
        None => DataPaths::platform_default()?,
    };

    if let Err(e) = run(args.command, &paths).await {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn character_service(paths: &DataPaths) -> CharacterService {
    CharacterService::new(CharacterStore::new(paths.characters_path()))
}

/// Executes one command against the data under `paths`.
pub async fn run(command: Commands, paths: &DataPaths) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::List => list_characters(&character_service(paths)),
        Commands::Show { name } => show_character(&character_service(paths), &name),
        Commands::Add { card, method } => add_from_card(paths, &card, method),
        Commands::AddCai { character_id } => {
            let tokens = ConfigOrchestrator::new(paths).tokens()?;
            let token = tokens.require(character_ai::TOKEN_KEY)?;
            let client = CharacterAiClient::new(reqwest::Client::new(), token);
            let record = character_service(paths)
                .add_from_character_ai(&client, &character_id)
                .await?;
            println!(
                "✅ Added {} from Character AI (chat {})",
                record.character_name,
                record.chat_id.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        Commands::Remove { name } => {
            character_service(paths).remove(&name)?;
            println!("✅ Removed {name}");
            Ok(())
        }
        Commands::Chat { name } => {
            let session = session::open(paths, &name).await?;
            run_chat(session).await
        }
        Commands::Edit { name, id, text } => {
            let mut session = session::open_for_history(paths, &name).await?;
            session.edit_message(id, &text.join(" ")).await?;
            println!("✅ Edited message {id}");
            Ok(())
        }
        Commands::Delete { name, ids } => {
            let mut session = session::open_for_history(paths, &name).await?;
            session.delete_messages(&ids).await?;
            println!("✅ Deleted {} message(s)", ids.len());
            Ok(())
        }
        Commands::ContinueFrom { name, id } => {
            let mut session = session::open_for_history(paths, &name).await?;
            let truncation = session.continue_from(id).await?;
            if truncation.is_empty() {
                println!("Nothing after message {id}");
            } else {
                println!(
                    "✅ Removed {} message(s) after message {id}",
                    truncation.removed.len()
                );
            }
            Ok(())
        }
        Commands::Regenerate { name } => {
            let mut session = session::open(paths, &name).await?;
            let mut sink = TerminalSink::new(std::io::stdout());
            if session.regenerate(&mut sink).await.is_err() {
                // Already reported through the sink.
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::SetToken { key, value } => {
            ConfigOrchestrator::new(paths)
                .update_tokens(|tokens| tokens.set(key.clone(), value))?;
            println!("✅ Stored {key}");
            Ok(())
        }
    }
}

fn add_from_card(
    paths: &DataPaths,
    card: &Path,
    method: ConversationMethod,
) -> Result<(), Box<dyn Error>> {
    let record = character_service(paths).add_from_card(card, method)?;
    println!(
        "✅ Added {} ({})",
        record.character_name,
        record.conversation_method.display_name()
    );
    Ok(())
}

#[cfg(test)]
mod tests;
