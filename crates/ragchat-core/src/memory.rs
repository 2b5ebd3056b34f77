//! Conversation memory: turns a chat's stored messages into the history
//! passed to the generation model.

use crate::models::{ChatTurn, Message};

/// Bounded window over a chat's prior turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationMemory {
    max_turns: usize,
}

impl ConversationMemory {
    /// Keep at most `max_turns` of the most recent turns. `0` keeps none.
    pub fn new(max_turns: usize) -> Self {
        Self { max_turns }
    }

    /// Build history from messages in creation order, oldest first.
    pub fn history(&self, messages: &[Message]) -> Vec<ChatTurn> {
        let skip = messages.len().saturating_sub(self.max_turns);
        messages[skip..]
            .iter()
            .map(|m| ChatTurn::new(m.role(), m.content.clone()))
            .collect()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Render history as a plain transcript, one `role: text` line per turn.
pub fn transcript(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("c", "one"),
            Message::assistant("c", "two"),
            Message::user("c", "three"),
            Message::assistant("c", "four"),
        ]
    }

    #[test]
    fn test_history_keeps_order_and_roles() {
        let history = ConversationMemory::default().history(&conversation());
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], ChatTurn::new(Role::User, "one"));
        assert_eq!(history[3], ChatTurn::new(Role::Assistant, "four"));
    }

    #[test]
    fn test_history_window_keeps_most_recent() {
        let history = ConversationMemory::new(2).history(&conversation());
        let texts: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(texts, vec!["three", "four"]);
        assert!(ConversationMemory::new(0).history(&conversation()).is_empty());
    }

    #[test]
    fn test_transcript() {
        let history = ConversationMemory::default().history(&conversation()[..2]);
        assert_eq!(transcript(&history), "user: one\nassistant: two");
    }
}
