//! In-memory conversation histories, one per persona.
//!
//! Pure state container: the streaming pipeline mutates it, the UI only
//! reads from it.

use crate::registry::PersonaId;
use std::collections::HashMap;

/// Fixed prefix for in-conversation error text. Kept human-readable; the
/// machine-checkable part is [`MessageStatus::Error`].
pub const ERROR_PREFIX: &str = "Sorry, I ran into an error: ";

/// Sidebar text for a conversation with no messages.
pub const EMPTY_PREVIEW: &str = "No messages yet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Normal,
    Error,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            status: MessageStatus::Normal,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            status: MessageStatus::Normal,
        }
    }
}

/// Last-message summary for the sidebar.
#[derive(Debug, Clone)]
pub struct Preview {
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug)]
pub struct ConversationStore {
    conversations: HashMap<PersonaId, Vec<Message>>,
}

impl ConversationStore {
    /// Each conversation starts with its persona's greeting.
    pub fn new() -> Self {
        let mut conversations = HashMap::new();
        for id in PersonaId::ALL {
            conversations.insert(id, vec![Message::assistant(id.persona().greeting)]);
        }
        Self { conversations }
    }

    pub fn messages(&self, id: PersonaId) -> &[Message] {
        self.conversations.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn append(&mut self, id: PersonaId, msg: Message) {
        self.conversations.entry(id).or_default().push(msg);
    }

    /// Overwrite the trailing assistant message. Does nothing if the
    /// conversation is empty or ends with a user message, so a stray
    /// stream event can never clobber user text.
    pub fn replace_last(&mut self, id: PersonaId, content: String, status: MessageStatus) {
        let Some(last) = self.conversations.get_mut(&id).and_then(|m| m.last_mut()) else {
            return;
        };
        if last.role == Role::Assistant {
            last.content = content;
            last.status = status;
        }
    }

    /// Truncate back to the single seed greeting. Idempotent.
    pub fn reset(&mut self, id: PersonaId) {
        self.conversations
            .insert(id, vec![Message::assistant(id.persona().greeting)]);
    }

    pub fn preview(&self, id: PersonaId) -> Preview {
        match self.messages(id).last() {
            Some(last) => Preview {
                text: last.content.clone(),
                is_error: last.status == MessageStatus::Error,
            },
            None => Preview {
                text: EMPTY_PREVIEW.to_string(),
                is_error: false,
            },
        }
    }
}
