//! Static registry of the three chat personas.
//!
//! Every persona talks to the same backend model; only the system
//! instruction (and the cosmetics around it) differ.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonaId {
    Gemini,
    ChatGpt,
    DeepSeek,
}

impl PersonaId {
    pub const ALL: [PersonaId; 3] = [PersonaId::Gemini, PersonaId::ChatGpt, PersonaId::DeepSeek];

    pub fn as_str(self) -> &'static str {
        match self {
            PersonaId::Gemini => "gemini",
            PersonaId::ChatGpt => "chatgpt",
            PersonaId::DeepSeek => "deepseek",
        }
    }

    /// Parse the lowercase id form used in CLI flags and config.
    pub fn parse(s: &str) -> Option<PersonaId> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(PersonaId::Gemini),
            "chatgpt" => Some(PersonaId::ChatGpt),
            "deepseek" => Some(PersonaId::DeepSeek),
            _ => None,
        }
    }

    pub fn persona(self) -> &'static Persona {
        match self {
            PersonaId::Gemini => &PERSONAS[0],
            PersonaId::ChatGpt => &PERSONAS[1],
            PersonaId::DeepSeek => &PERSONAS[2],
        }
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Persona {
    pub id: PersonaId,
    pub display_name: &'static str,
    pub system_instruction: &'static str,
    pub greeting: &'static str,
}

pub const PERSONAS: [Persona; 3] = [
    Persona {
        id: PersonaId::Gemini,
        display_name: "Gemini Chat",
        system_instruction: "You are a friendly and helpful AI assistant named Gemini. Your responses should be formatted in markdown.",
        greeting: "Hello! I'm Gemini. How can I help you today?",
    },
    Persona {
        id: PersonaId::ChatGpt,
        display_name: "ChatGPT",
        system_instruction: "You are ChatGPT, a helpful assistant from OpenAI. Emulate its style and capabilities. Your responses should be formatted in markdown.",
        greeting: "Hello! I'm ChatGPT. How can I assist you?",
    },
    Persona {
        id: PersonaId::DeepSeek,
        display_name: "DeepSeek Chat",
        system_instruction: "You are DeepSeek, an AI assistant focused on providing deep and insightful answers. Your responses should be formatted in markdown.",
        greeting: "Hi, I'm DeepSeek. What can I do for you?",
    },
];
