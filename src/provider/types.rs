use crate::session::Turn;
use futures_core::stream::BoxStream;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,

    /// Fixed per-persona instruction, sent with every request.
    pub system_instruction: String,

    /// Conversation turns, oldest first, ending with the new user input.
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone)]
pub struct ChatChunk {
    pub text: String,
}

/// Backend interface: one streaming chat method.
///
/// The returned stream is a finite, non-replayable fragment sequence; it
/// ends either by exhaustion (success) or with an `Err` item (failure).
pub trait Provider {
    fn name(&self) -> &'static str;

    /// Start streaming a response.
    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>>>
                + Send,
        >,
    >;
}
