//! Streaming pipeline: routes a user input to the backend and folds the
//! incremental reply into the right conversation.

use crate::config::Config;
use crate::provider::{self, ChatRequest, Provider};
use crate::registry::PersonaId;
use crate::session::SessionManager;
use crate::store::{ConversationStore, Message, MessageStatus, ERROR_PREFIX};
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// One event from an in-flight send. `send_id` ties the event to the send
/// that produced it, so events from an abandoned send (reset mid-stream)
/// are discarded instead of corrupting a fresh conversation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk {
        persona: PersonaId,
        send_id: u64,
        text: String,
    },
    Done {
        persona: PersonaId,
        send_id: u64,
    },
    Failed {
        persona: PersonaId,
        send_id: u64,
        reason: String,
    },
}

#[derive(Debug)]
struct PendingSend {
    send_id: u64,
    input: String,
    buffer: String,
}

pub struct ChatApp {
    store: ConversationStore,
    sessions: SessionManager,
    provider: Option<Arc<dyn Provider + Send + Sync>>,
    init_error: Option<String>,
    banner: Option<String>,
    model: String,
    active: PersonaId,
    in_flight: HashMap<PersonaId, PendingSend>,
    next_send_id: u64,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChatApp {
    /// Build the app around a provider construction result. A failed
    /// construction (missing credential) is not fatal: the UI runs with
    /// an initialization error and every send is refused.
    pub fn new(
        provider: anyhow::Result<Arc<dyn Provider + Send + Sync>>,
        model: String,
        active: PersonaId,
        events_tx: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let (provider, init_error) = match provider {
            Ok(p) => (Some(p), None),
            Err(e) => (None, Some(format!("Initialization failed: {e:#}"))),
        };
        Self {
            store: ConversationStore::new(),
            sessions: SessionManager::new(),
            provider,
            banner: init_error.clone(),
            init_error,
            model,
            active,
            in_flight: HashMap::new(),
            next_send_id: 0,
            events_tx,
        }
    }

    pub fn active(&self) -> PersonaId {
        self.active
    }

    /// Switching never touches any conversation's content.
    pub fn set_active(&mut self, id: PersonaId) {
        self.active = id;
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_loading(&self, id: PersonaId) -> bool {
        self.in_flight.contains_key(&id)
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Start a send for `persona`. Empty input and a send already in
    /// flight for the same persona are silently ignored; other personas
    /// stream independently.
    pub fn send(&mut self, persona: PersonaId, text: &str) {
        let text = text.trim();
        if text.is_empty() || self.in_flight.contains_key(&persona) {
            return;
        }
        let Some(provider) = self.provider.clone() else {
            self.banner = self.init_error.clone();
            return;
        };

        // New attempt clears the previous banner error.
        self.banner = None;

        self.store.append(persona, Message::user(text));
        self.store.append(persona, Message::assistant(""));

        let session = self.sessions.get(persona);
        let req = ChatRequest {
            model: self.model.clone(),
            system_instruction: session.system_instruction().to_string(),
            turns: session.turns_with(text),
        };

        let send_id = self.next_send_id;
        self.next_send_id += 1;
        self.in_flight.insert(
            persona,
            PendingSend {
                send_id,
                input: text.to_string(),
                buffer: String::new(),
            },
        );

        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut stream = match provider.stream_chat(req).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed {
                        persona,
                        send_id,
                        reason: format!("{e:#}"),
                    });
                    return;
                }
            };

            use tokio_stream::StreamExt;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        let ev = StreamEvent::Chunk {
                            persona,
                            send_id,
                            text: chunk.text,
                        };
                        if tx.send(ev).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Failed {
                            persona,
                            send_id,
                            reason: format!("{e:#}"),
                        });
                        return;
                    }
                }
            }
            let _ = tx.send(StreamEvent::Done { persona, send_id });
        });
    }

    /// Apply one stream event to the store. Fragments are applied in
    /// arrival order; each one overwrites the placeholder with the whole
    /// buffer so far.
    pub fn handle_event(&mut self, ev: StreamEvent) {
        match ev {
            StreamEvent::Chunk { persona, send_id, text } => {
                let Some(pending) = self.in_flight.get_mut(&persona) else {
                    return;
                };
                if pending.send_id != send_id {
                    return;
                }
                pending.buffer.push_str(&text);
                let buffer = pending.buffer.clone();
                self.store.replace_last(persona, buffer, MessageStatus::Normal);
            }
            StreamEvent::Done { persona, send_id } => {
                if !self.matches_in_flight(persona, send_id) {
                    return;
                }
                if let Some(pending) = self.in_flight.remove(&persona) {
                    self.sessions
                        .get(persona)
                        .record_exchange(pending.input, pending.buffer);
                }
            }
            StreamEvent::Failed { persona, send_id, reason } => {
                if !self.matches_in_flight(persona, send_id) {
                    return;
                }
                self.in_flight.remove(&persona);
                tracing::warn!(%persona, %reason, "send failed");
                self.store.replace_last(
                    persona,
                    format!("{ERROR_PREFIX}{reason}"),
                    MessageStatus::Error,
                );
                self.banner = Some(reason);
            }
        }
    }

    fn matches_in_flight(&self, persona: PersonaId, send_id: u64) -> bool {
        self.in_flight
            .get(&persona)
            .is_some_and(|p| p.send_id == send_id)
    }

    /// Back to the seed greeting: drops the cached session too, so the
    /// next send re-creates it with the same system instruction.
    pub fn reset(&mut self, persona: PersonaId) {
        self.in_flight.remove(&persona);
        self.sessions.reset(persona);
        self.store.reset(persona);
        self.banner = None;
    }

    #[cfg(test)]
    pub(crate) fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

pub fn build_provider(
    http: &reqwest::Client,
    cfg: Option<&Config>,
    provider_name: &str,
) -> anyhow::Result<Arc<dyn Provider + Send + Sync>> {
    match provider_name {
        "google" => {
            let api_key = std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .or_else(|| cfg.and_then(|c| c.api_key.clone()))
                .context("GEMINI_API_KEY is not set (set the environment variable or api_key in config.toml)")?;
            let p = provider::google::GoogleProvider::new(http.clone(), api_key)?;
            Ok(Arc::new(p))
        }
        "stub" => Ok(Arc::new(provider::stub::StubProvider::new())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatChunk, ChatRequest};
    use crate::store::Role;
    use futures_core::stream::BoxStream;
    use tokio_stream::wrappers::ReceiverStream;

    /// Test backend that replays a fixed script: fragments first, then
    /// optionally a terminal failure.
    struct ScriptedProvider {
        fragments: Vec<&'static str>,
        fail_with: Option<&'static str>,
    }

    impl ScriptedProvider {
        fn ok(fragments: Vec<&'static str>) -> Self {
            Self { fragments, fail_with: None }
        }

        fn failing(fragments: Vec<&'static str>, reason: &'static str) -> Self {
            Self { fragments, fail_with: Some(reason) }
        }
    }

    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn stream_chat(
            &self,
            _req: ChatRequest,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>>,
                    > + Send,
            >,
        > {
            let fragments = self.fragments.clone();
            let fail_with = self.fail_with;
            Box::pin(async move {
                let (tx, rx) = tokio::sync::mpsc::channel(8);
                tokio::spawn(async move {
                    for f in fragments {
                        if tx.send(Ok(ChatChunk { text: f.to_string() })).await.is_err() {
                            return;
                        }
                    }
                    if let Some(reason) = fail_with {
                        let _ = tx.send(Err(anyhow::anyhow!("{reason}"))).await;
                    }
                });
                Ok(Box::pin(ReceiverStream::new(rx))
                    as BoxStream<'static, anyhow::Result<ChatChunk>>)
            })
        }
    }

    fn new_app(
        provider: anyhow::Result<Arc<dyn Provider + Send + Sync>>,
    ) -> (ChatApp, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = ChatApp::new(provider, "test-model".into(), PersonaId::Gemini, tx);
        (app, rx)
    }

    /// Drive events until the persona's send settles.
    async fn pump(app: &mut ChatApp, rx: &mut mpsc::UnboundedReceiver<StreamEvent>, id: PersonaId) {
        while app.is_loading(id) {
            let ev = rx.recv().await.expect("event channel closed");
            app.handle_event(ev);
        }
    }

    #[test]
    fn starts_with_greeting_only() {
        let (app, _rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec![]))));
        assert_eq!(app.active(), PersonaId::Gemini);
        let msgs = app.store().messages(PersonaId::Gemini);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].content, PersonaId::Gemini.persona().greeting);
    }

    #[tokio::test]
    async fn send_appends_two_and_concatenates_in_order() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["He", "llo"]))));

        app.send(PersonaId::Gemini, "hi there");
        let msgs = app.store().messages(PersonaId::Gemini);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[1].content, "hi there");
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(msgs[2].content, "");
        assert!(app.is_loading(PersonaId::Gemini));

        pump(&mut app, &mut rx, PersonaId::Gemini).await;

        let msgs = app.store().messages(PersonaId::Gemini);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].content, "Hello");
        assert_eq!(msgs[2].status, MessageStatus::Normal);
        assert!(!app.is_loading(PersonaId::Gemini));
        assert!(app.banner().is_none());
    }

    #[tokio::test]
    async fn successful_exchange_is_committed_to_session() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["ok"]))));
        app.send(PersonaId::ChatGpt, "question");
        pump(&mut app, &mut rx, PersonaId::ChatGpt).await;

        assert!(app.sessions().is_cached(PersonaId::ChatGpt));
        let (mut app2, _rx2) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec![]))));
        // Fresh app has no cached session until first send.
        assert!(!app2.sessions().is_cached(PersonaId::ChatGpt));
        app2.send(PersonaId::ChatGpt, "q");
        assert!(app2.sessions().is_cached(PersonaId::ChatGpt));
    }

    #[tokio::test]
    async fn failure_overwrites_placeholder_and_sets_banner() {
        let provider = ScriptedProvider::failing(vec!["par"], "quota exceeded");
        let (mut app, mut rx) = new_app(Ok(Arc::new(provider)));

        app.send(PersonaId::Gemini, "hi");
        pump(&mut app, &mut rx, PersonaId::Gemini).await;

        let last = app.store().messages(PersonaId::Gemini).last().unwrap();
        assert_eq!(last.content, format!("{ERROR_PREFIX}quota exceeded"));
        assert_eq!(last.status, MessageStatus::Error);
        assert_eq!(app.banner(), Some("quota exceeded"));
        assert!(!app.is_loading(PersonaId::Gemini));

        // Failed exchange is not recorded; a later send starts clean.
        assert!(app
            .sessions()
            .is_cached(PersonaId::Gemini));

        // Next attempt clears the banner.
        app.send(PersonaId::Gemini, "retry");
        assert!(app.banner().is_none());
        pump(&mut app, &mut rx, PersonaId::Gemini).await;
    }

    #[tokio::test]
    async fn empty_input_and_duplicate_sends_are_ignored() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["a"]))));

        app.send(PersonaId::Gemini, "   ");
        assert_eq!(app.store().messages(PersonaId::Gemini).len(), 1);
        assert!(!app.is_loading(PersonaId::Gemini));

        app.send(PersonaId::Gemini, "first");
        app.send(PersonaId::Gemini, "second");
        // Only the first send went through.
        assert_eq!(app.store().messages(PersonaId::Gemini).len(), 3);
        pump(&mut app, &mut rx, PersonaId::Gemini).await;
    }

    #[tokio::test]
    async fn personas_stream_independently() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["reply"]))));

        app.send(PersonaId::Gemini, "to gemini");
        assert!(app.is_loading(PersonaId::Gemini));
        assert!(!app.is_loading(PersonaId::ChatGpt));

        // A second persona can send while the first is streaming.
        app.send(PersonaId::ChatGpt, "to chatgpt");
        assert!(app.is_loading(PersonaId::ChatGpt));
        assert_eq!(app.store().messages(PersonaId::DeepSeek).len(), 1);

        pump(&mut app, &mut rx, PersonaId::Gemini).await;
        pump(&mut app, &mut rx, PersonaId::ChatGpt).await;

        assert_eq!(app.store().messages(PersonaId::Gemini).len(), 3);
        assert_eq!(app.store().messages(PersonaId::ChatGpt).len(), 3);
        assert_eq!(app.store().messages(PersonaId::DeepSeek).len(), 1);
    }

    #[tokio::test]
    async fn switching_active_mutates_nothing() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["x"]))));
        app.send(PersonaId::Gemini, "msg");
        pump(&mut app, &mut rx, PersonaId::Gemini).await;

        let before: Vec<String> = PersonaId::ALL
            .iter()
            .flat_map(|&id| app.store().messages(id).iter().map(|m| m.content.clone()))
            .collect();

        app.set_active(PersonaId::DeepSeek);
        assert_eq!(app.active(), PersonaId::DeepSeek);

        let after: Vec<String> = PersonaId::ALL
            .iter()
            .flat_map(|&id| app.store().messages(id).iter().map(|m| m.content.clone()))
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reset_restores_seed_and_drops_session() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["reply"]))));
        app.send(PersonaId::Gemini, "msg");
        pump(&mut app, &mut rx, PersonaId::Gemini).await;
        assert!(app.sessions().is_cached(PersonaId::Gemini));

        app.reset(PersonaId::Gemini);
        let msgs = app.store().messages(PersonaId::Gemini);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, PersonaId::Gemini.persona().greeting);
        assert!(!app.sessions().is_cached(PersonaId::Gemini));

        app.reset(PersonaId::Gemini);
        assert_eq!(app.store().messages(PersonaId::Gemini).len(), 1);
    }

    #[tokio::test]
    async fn events_from_abandoned_send_are_discarded() {
        let (mut app, mut rx) = new_app(Ok(Arc::new(ScriptedProvider::ok(vec!["stale"]))));
        app.send(PersonaId::Gemini, "msg");
        app.reset(PersonaId::Gemini);

        // Drain whatever the abandoned task produced.
        while let Ok(ev) = rx.try_recv() {
            app.handle_event(ev);
        }
        tokio::task::yield_now().await;
        while let Ok(ev) = rx.try_recv() {
            app.handle_event(ev);
        }

        let msgs = app.store().messages(PersonaId::Gemini);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, PersonaId::Gemini.persona().greeting);
    }

    #[tokio::test]
    async fn missing_credential_disables_sends() {
        let (mut app, _rx) = new_app(Err(anyhow::anyhow!("GEMINI_API_KEY is not set")));
        assert!(app.init_error().unwrap().contains("Initialization failed"));

        app.send(PersonaId::Gemini, "hi");
        assert_eq!(app.store().messages(PersonaId::Gemini).len(), 1);
        assert!(!app.is_loading(PersonaId::Gemini));
        assert_eq!(app.banner(), app.init_error());
    }

    #[test]
    fn build_provider_rejects_unknown_backend() {
        let http = reqwest::Client::new();
        assert!(build_provider(&http, None, "openai").is_err());
        assert!(build_provider(&http, None, "stub").is_ok());
    }
}
