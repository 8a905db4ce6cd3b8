//! Conversation Context Adapter
//!
//! Pure conversion from the collaborator-supplied turn snapshot to the
//! message sequence the classifier and the loop consume. Malformed turns
//! are skipped, never fatal.

use crate::models::{ChatMessage, Turn, TurnRole};

pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Adapt the most recent `window` turns into ordered chat messages.
/// Turns with empty text are dropped.
pub fn adapt_history(turns: &[Turn], window: usize) -> Vec<ChatMessage> {
    let start = turns.len().saturating_sub(window);

    turns[start..]
        .iter()
        .filter(|turn| !turn.text.trim().is_empty())
        .map(|turn| match turn.role {
            TurnRole::User => ChatMessage::user(turn.text.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.text.clone()),
        })
        .collect()
}
