//! Per-character message ledger.
//!
//! The ledger is the only authority for a conversation. The turn-paired
//! history handed to stateless providers is projected from it on demand and
//! references messages by ID, so edits and deletions can never leave the two
//! views disagreeing.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::message::{HistoryPair, HistoryText, Message, MessageId, RemoteTurn};

/// Errors raised by ledger mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The referenced message ID is not present.
    MessageNotFound(MessageId),

    /// The deletion would remove every message.
    WouldEmpty,
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::MessageNotFound(id) => write!(f, "Message {id} not found"),
            LedgerError::WouldEmpty => {
                write!(f, "Cannot delete every message; the conversation needs at least one")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

/// Result of [`Ledger::truncate_after`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Truncation {
    pub removed: Vec<MessageId>,
    /// `(message_id, turn_id)` for removed messages that carry Character AI
    /// correlation data, in ledger order.
    pub remote_turns: Vec<(MessageId, String)>,
}

impl Truncation {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// A message as reported by a stateful provider's canonical history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub author_name: String,
    pub is_user: bool,
    pub text: String,
    pub remote: RemoteTurn,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ledger {
    entries: BTreeMap<MessageId, Message>,
    /// Highest ID ever assigned; survives deletion of the newest message.
    high_water: Option<MessageId>,
}

impl Ledger {
    /// Creates a ledger holding only the character's greeting as message 1.
    pub fn seeded(character_name: &str, first_message: &str) -> Self {
        let mut ledger = Ledger::default();
        ledger.append(Message::new(character_name, false, first_message));
        ledger
    }

    pub(crate) fn from_parts(
        entries: BTreeMap<MessageId, Message>,
        high_water: Option<MessageId>,
    ) -> Self {
        let max_key = entries.keys().next_back().copied();
        let high_water = match (high_water, max_key) {
            (Some(stored), Some(max)) => Some(stored.max(max)),
            (stored, max) => stored.or(max),
        };
        Self {
            entries,
            high_water,
        }
    }

    pub(crate) fn entries(&self) -> &BTreeMap<MessageId, Message> {
        &self.entries
    }

    pub fn high_water(&self) -> Option<MessageId> {
        self.high_water
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Messages in chronological (ID) order.
    pub fn iter(&self) -> impl Iterator<Item = (MessageId, &Message)> {
        self.entries.iter().map(|(id, message)| (*id, message))
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.entries.keys().copied().collect()
    }

    pub fn last(&self) -> Option<(MessageId, &Message)> {
        self.entries
            .iter()
            .next_back()
            .map(|(id, message)| (*id, message))
    }

    /// Most recent message written by the user, if any.
    pub fn last_user(&self) -> Option<(MessageId, &Message)> {
        self.entries
            .iter()
            .rev()
            .find(|(_, message)| message.is_user)
            .map(|(id, message)| (*id, message))
    }

    fn next_id(&self) -> MessageId {
        self.high_water
            .map(MessageId::next)
            .unwrap_or(MessageId::FIRST)
    }

    pub fn append(&mut self, message: Message) -> MessageId {
        let id = self.next_id();
        self.entries.insert(id, message);
        self.high_water = Some(id);
        id
    }

    /// Replaces the text of `id`, returning the previous text.
    pub fn edit(&mut self, id: MessageId, new_text: &str) -> Result<String, LedgerError> {
        let message = self
            .entries
            .get_mut(&id)
            .ok_or(LedgerError::MessageNotFound(id))?;
        Ok(std::mem::replace(&mut message.text, new_text.to_string()))
    }

    /// Checks that [`delete`](Self::delete) would succeed: every ID exists
    /// and at least one message survives.
    pub fn check_delete(&self, ids: &[MessageId]) -> Result<(), LedgerError> {
        if let Some(missing) = ids.iter().find(|id| !self.entries.contains_key(id)) {
            return Err(LedgerError::MessageNotFound(*missing));
        }
        let distinct: std::collections::BTreeSet<MessageId> = ids.iter().copied().collect();
        if !self.entries.is_empty() && distinct.len() >= self.entries.len() {
            return Err(LedgerError::WouldEmpty);
        }
        Ok(())
    }

    /// Removes every listed message. Nothing is removed unless all IDs exist
    /// and the ledger keeps at least one message.
    pub fn delete(&mut self, ids: &[MessageId]) -> Result<Vec<(MessageId, Message)>, LedgerError> {
        self.check_delete(ids)?;

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.entries.remove(id) {
                removed.push((*id, message));
            }
        }
        removed.sort_by_key(|(id, _)| *id);
        Ok(removed)
    }

    /// Messages that [`truncate_after`](Self::truncate_after) would remove.
    pub fn after(&self, id: MessageId) -> Result<Vec<(MessageId, &Message)>, LedgerError> {
        if !self.entries.contains_key(&id) {
            return Err(LedgerError::MessageNotFound(id));
        }
        Ok(self
            .entries
            .range(id.next()..)
            .map(|(id, message)| (*id, message))
            .collect())
    }

    /// Removes every message whose ID is greater than `id`.
    pub fn truncate_after(&mut self, id: MessageId) -> Result<Truncation, LedgerError> {
        if !self.entries.contains_key(&id) {
            return Err(LedgerError::MessageNotFound(id));
        }

        let tail = self.entries.split_off(&id.next());
        let mut truncation = Truncation::default();
        for (removed_id, message) in tail {
            truncation.removed.push(removed_id);
            if let Some(turn_id) = message.turn_id {
                truncation.remote_turns.push((removed_id, turn_id));
            }
        }
        Ok(truncation)
    }

    /// Pairs each user message with the next character message.
    ///
    /// A user message followed by another user message (or by nothing) gets
    /// an empty character side; a character message with no pending user
    /// message gets an empty user side.
    pub fn history(&self) -> Vec<HistoryPair> {
        let mut pairs = Vec::new();
        let mut pending_user: Option<MessageId> = None;

        for (id, message) in &self.entries {
            if message.is_user {
                if let Some(previous) = pending_user.replace(*id) {
                    pairs.push(HistoryPair {
                        user: Some(previous),
                        character: None,
                    });
                }
            } else {
                pairs.push(HistoryPair {
                    user: pending_user.take(),
                    character: Some(*id),
                });
            }
        }

        if let Some(user) = pending_user {
            pairs.push(HistoryPair {
                user: Some(user),
                character: None,
            });
        }

        pairs
    }

    fn text_of(&self, id: Option<MessageId>) -> String {
        id.and_then(|id| self.entries.get(&id))
            .map(|message| message.text.clone())
            .unwrap_or_default()
    }

    pub fn resolve(&self, pair: &HistoryPair) -> HistoryText {
        HistoryText::new(self.text_of(pair.user), self.text_of(pair.character))
    }

    /// The `chat_history` view with text resolved at read time.
    pub fn history_text(&self) -> Vec<HistoryText> {
        self.history()
            .iter()
            .map(|pair| self.resolve(pair))
            .collect()
    }

    /// Rebuilds the ledger from a stateful provider's canonical history.
    ///
    /// Messages whose `turn_id` is already known keep their ID as long as
    /// that keeps IDs increasing; everything else gets a fresh ID above the
    /// high-water mark. Local messages that the remote no longer reports are
    /// dropped.
    pub fn reconcile_remote(&mut self, remote: Vec<RemoteMessage>) {
        let known: std::collections::HashMap<String, MessageId> = self
            .entries
            .iter()
            .filter_map(|(id, message)| message.turn_id.clone().map(|turn| (turn, *id)))
            .collect();

        let mut high_water = self.high_water;
        let mut previous: Option<MessageId> = None;
        let mut rebuilt = BTreeMap::new();

        for message in remote {
            let reuse = known
                .get(&message.remote.turn_id)
                .copied()
                .filter(|id| previous.is_none_or(|prev| *id > prev));
            let id = match reuse {
                Some(id) => id,
                None => {
                    let fresh = high_water.map(MessageId::next).unwrap_or(MessageId::FIRST);
                    high_water = Some(fresh);
                    fresh
                }
            };
            previous = Some(id);
            rebuilt.insert(
                id,
                Message::new(message.author_name, message.is_user, message.text)
                    .with_remote(message.remote),
            );
        }

        let max_key = rebuilt.keys().next_back().copied();
        self.high_water = match (high_water, max_key) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.entries = rebuilt;
    }
}
