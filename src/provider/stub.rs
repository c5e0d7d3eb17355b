use super::{ChatChunk, ChatRequest, Provider};
use crate::session::TurnRole;
use futures_core::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Offline backend: drips a canned reply word by word. Lets the UI run
/// without a credential.
#[derive(Debug, Default, Clone)]
pub struct StubProvider;

impl StubProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>>>
                + Send,
        >,
    > {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<anyhow::Result<ChatChunk>>(32);

            let input = req
                .turns
                .iter()
                .rev()
                .find(|t| t.role == TurnRole::User)
                .map(|t| t.text.clone())
                .unwrap_or_default();
            let reply = format!("(stub, model {}) You said: {input}", req.model);

            tokio::spawn(async move {
                for word in reply.split_inclusive(' ') {
                    tokio::time::sleep(std::time::Duration::from_millis(40)).await;
                    if tx.send(Ok(ChatChunk { text: word.to_string() })).await.is_err() {
                        break;
                    }
                }
            });

            let stream = ReceiverStream::new(rx);
            Ok(Box::pin(stream) as BoxStream<'static, anyhow::Result<ChatChunk>>)
        })
    }
}
