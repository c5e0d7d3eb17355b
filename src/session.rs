//! Lazily-created backend sessions, one per persona.
//!
//! A session is the multi-turn state that the original SDK chat handle
//! would carry: the persona's fixed system instruction plus the committed
//! exchange history, replayed to the backend on every send.

use crate::registry::PersonaId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    system_instruction: String,
    history: Vec<Turn>,
}

impl ChatSession {
    fn new(system_instruction: &str) -> Self {
        Self {
            system_instruction: system_instruction.to_string(),
            history: Vec::new(),
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Committed history plus the pending user input, oldest first.
    pub fn turns_with(&self, input: &str) -> Vec<Turn> {
        let mut turns = self.history.clone();
        turns.push(Turn {
            role: TurnRole::User,
            text: input.to_string(),
        });
        turns
    }

    /// Commit a completed exchange. Failed sends are never recorded, so a
    /// retry replays the same history.
    pub fn record_exchange(&mut self, input: String, reply: String) {
        self.history.push(Turn {
            role: TurnRole::User,
            text: input,
        });
        self.history.push(Turn {
            role: TurnRole::Model,
            text: reply,
        });
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<PersonaId, ChatSession>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached session, creating it with the persona's system
    /// instruction on first use.
    pub fn get(&mut self, id: PersonaId) -> &mut ChatSession {
        self.sessions
            .entry(id)
            .or_insert_with(|| ChatSession::new(id.persona().system_instruction))
    }

    /// Drop the cached session; the next `get` re-creates it fresh.
    /// No-op if there is none.
    pub fn reset(&mut self, id: PersonaId) {
        self.sessions.remove(&id);
    }

    pub fn is_cached(&self, id: PersonaId) -> bool {
        self.sessions.contains_key(&id)
    }
}
