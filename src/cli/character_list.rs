use std::error::Error;
use std::fmt::Write;

use crate::character::record::CharacterRecord;
use crate::character::service::{CharacterService, CharacterSummary};

pub fn format_character_list(characters: &[CharacterSummary]) -> String {
    let mut out = String::new();
    if characters.is_empty() {
        out.push_str("  No characters yet.\n");
        out.push_str("\n💡 Add one with:\n");
        out.push_str("   soul-of-waifu add --card <card.json>\n");
        out.push_str("   soul-of-waifu add-cai <character_id>\n");
        return out;
    }
    for character in characters {
        let _ = writeln!(
            out,
            "  • {} ({}, {} messages)",
            character.name,
            character.conversation_method.display_name(),
            character.messages
        );
    }
    out.push_str("\n💡 Start chatting with:\n");
    out.push_str("   soul-of-waifu chat <name>\n");
    out
}

/// Character details followed by every ledger entry, tagged with its ID.
pub fn format_character(record: &CharacterRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", record.character_name);
    if !record.character_title.is_empty() {
        let _ = writeln!(out, "  {}", record.character_title);
    }
    let _ = writeln!(
        out,
        "  Conversation method: {}",
        record.conversation_method.display_name()
    );
    if let Some(chat_id) = &record.chat_id {
        let _ = writeln!(out, "  Chat: {chat_id}");
    }
    if record.voice.is_enabled() {
        let _ = writeln!(out, "  Voice: {}", record.voice.backend_name());
    }
    if record.current_sow_system_mode.detects_emotion() {
        let _ = writeln!(out, "  Current emotion: {}", record.current_emotion);
    }
    out.push('\n');
    for (id, message) in record.chat_content.iter() {
        let _ = writeln!(out, "[{id}] {}: {}", message.author_name, message.text);
    }
    out
}

pub fn list_characters(service: &CharacterService) -> Result<(), Box<dyn Error>> {
    println!(
        "Characters (from {}):\n",
        crate::core::config::path_display(service.store().path())
    );
    print!("{}", format_character_list(&service.list()?));
    Ok(())
}

pub fn show_character(service: &CharacterService, name: &str) -> Result<(), Box<dyn Error>> {
    print!("{}", format_character(&service.get(name)?));
    Ok(())
}
