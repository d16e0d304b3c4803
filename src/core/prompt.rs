//! Prompt assembly for stateless providers.

use crate::character::record::CharacterRecord;
use crate::core::ledger::Ledger;
use crate::core::message::{ContextMessage, MessageId};
use crate::core::substitution::{substitute_placeholders, Names};

/// Number of history pairs sent as context.
pub const HISTORY_WINDOW: usize = 20;

const ROLEPLAY_INSTRUCTIONS: &str = "You are {{char}}, talking with {{user}} in an ongoing \
roleplay. Stay in character at all times and answer only as {{char}}. Never speak or act for \
{{user}}. Describe actions between asterisks, keep replies vivid but concise, and keep the \
conversation moving.";

/// System prompt built from the character profile and the user's own
/// description, with placeholders resolved.
pub fn build_system_prompt(record: &CharacterRecord, names: Names<'_>, user_description: &str) -> String {
    let mut prompt = String::from(ROLEPLAY_INSTRUCTIONS);
    prompt.push_str("\n\n");

    prompt.push_str(&format!("Character: {}\n", names.character));
    if !record.character_title.trim().is_empty() {
        prompt.push_str(&format!("Title: {}\n", record.character_title.trim()));
    }
    if !record.character_description.trim().is_empty() {
        prompt.push_str(&format!(
            "Description: {}\n",
            record.character_description.trim()
        ));
    }
    if !record.character_personality.trim().is_empty() {
        prompt.push_str(&format!(
            "Personality: {}\n",
            record.character_personality.trim()
        ));
    }
    if !user_description.trim().is_empty() {
        prompt.push_str(&format!(
            "\nAbout {}: {}\n",
            names.user,
            user_description.trim()
        ));
    }

    substitute_placeholders(&prompt, names)
}

/// Role-tagged context from the last `window` history pairs.
///
/// `pending` names the user message currently being answered; it is sent
/// separately and therefore left out here. Empty sides are skipped.
pub fn build_context(
    ledger: &Ledger,
    pending: Option<MessageId>,
    window: usize,
    names: Names<'_>,
) -> Vec<ContextMessage> {
    let pairs: Vec<_> = ledger
        .history()
        .into_iter()
        .map(|mut pair| {
            if pair.user.is_some() && pair.user == pending {
                pair.user = None;
            }
            pair
        })
        .filter(|pair| pair.user.is_some() || pair.character.is_some())
        .collect();

    let start = pairs.len().saturating_sub(window);
    let mut context = Vec::with_capacity((pairs.len() - start) * 2);
    for pair in &pairs[start..] {
        let text = ledger.resolve(pair);
        if !text.user.is_empty() {
            context.push(ContextMessage::user(substitute_placeholders(&text.user, names)));
        }
        if !text.character.is_empty() {
            context.push(ContextMessage::assistant(substitute_placeholders(
                &text.character,
                names,
            )));
        }
    }
    context
}
