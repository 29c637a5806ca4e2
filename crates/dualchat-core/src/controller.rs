//! Fans one user turn out to every targeted model and folds the concurrent
//! streams back into a single message list.
//!
//! Every mutation is keyed by [`MessageId`]. Streams interleave freely, so a
//! reply is never located by position or by "last message from model X".
//!
//! State lives behind one mutex that is only held for a single fold. Each
//! task checks its own [`CancellationToken`] under that lock before touching state,
//! which keeps a cancelled operation from writing into a newer one.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ChatRequest, ChatTransport};
use crate::config::{clamp_system_prompt, DEFAULT_SYSTEM_PROMPT, MESSAGE_MAX_LENGTH};
use crate::error::TransportError;
use crate::model::{ModelId, ViewMode};
use crate::state::{ChatRole, Message, MessageId};
use crate::stream::StreamEvent;

const MODEL_ERROR_FALLBACK: &str = "Generation failed";

/// The current conversation and which models are still streaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub loading: HashSet<ModelId>,
}

impl ChatState {
    pub fn is_idle(&self) -> bool {
        self.loading.is_empty()
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Folds one stream event into message `id`. Returns false if the
    /// message no longer exists (e.g. the conversation was replaced).
    pub fn apply(&mut self, id: MessageId, event: StreamEvent) -> bool {
        let Some(message) = self.message_mut(id) else {
            return false;
        };

        match event {
            StreamEvent::Delta(text) | StreamEvent::Literal(text) => {
                message.content.push_str(&text);
            }
            StreamEvent::Done { latency, usage } => {
                if message.latency.is_none() {
                    message.latency = latency;
                }
                if message.usage.is_none() {
                    message.usage = usage;
                }
            }
            StreamEvent::Error(text) => {
                message.content = text.unwrap_or_else(|| MODEL_ERROR_FALLBACK.to_string());
                message.error = true;
            }
        }
        true
    }

    /// Records a transport failure. Partial output is kept as is.
    pub fn fail(&mut self, id: MessageId, err: &TransportError) -> bool {
        let Some(message) = self.message_mut(id) else {
            return false;
        };

        if message.content.is_empty() {
            message.content = format!("Error: {}", err);
        }
        message.error = true;
        true
    }
}

/// A send or a retry. `generation` tells operations apart after their
/// tokens have been cloned into tasks.
#[derive(Clone)]
struct Operation {
    generation: u64,
    token: CancellationToken,
}

struct Shared {
    chat: ChatState,
    view_mode: ViewMode,
    system_prompt: String,
    generation: u64,
    send_op: Option<Operation>,
    retry_ops: Vec<Operation>,
}

impl Shared {
    fn begin_operation(&mut self) -> Operation {
        self.generation += 1;
        Operation {
            generation: self.generation,
            token: CancellationToken::new(),
        }
    }
}

struct Inner {
    transport: Arc<dyn ChatTransport>,
    shared: Mutex<Shared>,
    revision: watch::Sender<u64>,
}

/// Owns the current conversation and drives the model streams.
///
/// Cheap to clone; clones share state. Operations that start streams must be
/// called from inside a tokio runtime.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                shared: Mutex::new(Shared {
                    chat: ChatState::default(),
                    view_mode: ViewMode::default(),
                    system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                    generation: 0,
                    send_op: None,
                    retry_ops: Vec::new(),
                }),
                revision,
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn ChatTransport> {
        Arc::clone(&self.inner.transport)
    }

    /// Bumped after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.lock().chat.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().chat.messages.clone()
    }

    pub fn loading_models(&self) -> HashSet<ModelId> {
        self.lock().chat.loading.clone()
    }

    pub fn is_loading(&self) -> bool {
        !self.lock().chat.is_idle()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.lock().view_mode
    }

    pub fn set_view_mode(&self, view_mode: ViewMode) {
        self.update(|shared| shared.view_mode = view_mode);
    }

    pub fn system_prompt(&self) -> String {
        self.lock().system_prompt.clone()
    }

    pub fn set_system_prompt(&self, prompt: &str) {
        let prompt = clamp_system_prompt(prompt);
        self.update(|shared| shared.system_prompt = prompt);
    }

    /// Replaces the whole conversation (new chat, loaded session).
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.update(|shared| shared.chat.messages = messages);
    }

    /// Sends `text` to every model targeted by the current view mode.
    ///
    /// Returns `None` without touching state when the text is blank or too
    /// long, or while a previous turn is still streaming. The handle
    /// resolves once every targeted model has settled.
    pub fn send_message(&self, text: &str) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() || text.chars().count() > MESSAGE_MAX_LENGTH {
            return None;
        }

        let dispatch = self.try_update(|shared| {
            if !shared.chat.is_idle() {
                return None;
            }
            let op = shared.begin_operation();
            if let Some(previous) = shared.send_op.replace(op.clone()) {
                previous.token.cancel();
            }

            let targets = shared.view_mode.targets();
            let timestamp = Message::timestamp_now();
            shared.chat.messages.push(Message::user(text, &timestamp));

            let mut slots = Vec::with_capacity(targets.len());
            for model in targets {
                let placeholder = Message::placeholder(model, &timestamp);
                slots.push((model, placeholder.id));
                shared.chat.messages.push(placeholder);
                shared.chat.loading.insert(model);
            }
            Some((op, slots, shared.system_prompt.clone()))
        });
        let (op, slots, system_prompt) = dispatch?;

        info!(models = slots.len(), "dispatching prompt");

        let controller = self.clone();
        let text = text.to_string();
        Some(tokio::spawn(async move {
            let runs = slots.iter().map(|&(model, message_id)| {
                let request = ChatRequest::new(&text, model).with_system_prompt(&system_prompt);
                controller.run_stream(model, message_id, request, op.token.clone())
            });
            join_all(runs).await;

            let mut shared = controller.lock();
            if shared
                .send_op
                .as_ref()
                .is_some_and(|current| current.generation == op.generation)
            {
                shared.send_op = None;
            }
            debug!("turn settled");
        }))
    }

    /// Stops the current turn and any retries. Partial text stays.
    ///
    /// The loading set is cleared immediately, without waiting for the
    /// streams to notice.
    pub fn cancel_request(&self) {
        let changed = {
            let mut shared = self.lock();
            let mut changed = !shared.chat.loading.is_empty();
            if let Some(op) = shared.send_op.take() {
                changed |= !op.token.is_cancelled();
                op.token.cancel();
            }
            for op in shared.retry_ops.drain(..) {
                op.token.cancel();
            }
            shared.chat.loading.clear();
            changed
        };

        if changed {
            info!("request cancelled");
            self.notify();
        }
    }

    /// Re-runs the stream for assistant message `id` in place, using the
    /// nearest preceding user message as the prompt.
    ///
    /// No-op if the message is unknown, has no model, has no preceding user
    /// message, or its model is already streaming.
    pub fn retry_message(&self, id: MessageId) -> Option<JoinHandle<()>> {
        let retry = self.try_update(|shared| {
            let index = shared.chat.messages.iter().position(|m| m.id == id)?;
            let model = shared.chat.messages[index].model?;
            if shared.chat.loading.contains(&model) {
                return None;
            }
            let prompt = shared.chat.messages[..index]
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)?
                .content
                .clone();

            let message = &mut shared.chat.messages[index];
            message.content.clear();
            message.error = false;
            message.latency = None;
            message.usage = None;

            shared.chat.loading.insert(model);
            let op = shared.begin_operation();
            shared.retry_ops.push(op.clone());
            Some((op, model, prompt, shared.system_prompt.clone()))
        });
        let (op, model, prompt, system_prompt) = retry?;

        info!(model = %model, message_id = %id, "retrying reply");

        let controller = self.clone();
        Some(tokio::spawn(async move {
            let request = ChatRequest::new(&prompt, model).with_system_prompt(&system_prompt);
            controller.run_stream(model, id, request, op.token).await;
            controller
                .lock()
                .retry_ops
                .retain(|current| current.generation != op.generation);
        }))
    }

    async fn run_stream(
        &self,
        model: ModelId,
        message_id: MessageId,
        request: ChatRequest,
        token: CancellationToken,
    ) {
        debug!(model = %model, message_id = %message_id, "stream starting");

        let mut on_event = |event: StreamEvent| {
            self.apply_live(&token, |chat| {
                chat.apply(message_id, event);
            });
        };
        let result = self
            .inner
            .transport
            .stream(&request, &mut on_event, &token)
            .await;

        match result {
            Ok(()) => debug!(model = %model, "stream finished"),
            Err(e) if e.is_aborted() => debug!(model = %model, "stream aborted"),
            Err(e) => {
                warn!(model = %model, error = %e, "stream failed");
                self.apply_live(&token, |chat| {
                    chat.fail(message_id, &e);
                });
            }
        }

        self.apply_live(&token, |chat| {
            chat.loading.remove(&model);
        });
    }

    /// Applies `f` unless `token` was cancelled; checked under the lock.
    fn apply_live(&self, token: &CancellationToken, f: impl FnOnce(&mut ChatState)) {
        let applied = {
            let mut shared = self.lock();
            if token.is_cancelled() {
                false
            } else {
                f(&mut shared.chat);
                true
            }
        };
        if applied {
            self.notify();
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let result = f(&mut self.lock());
        self.notify();
        result
    }

    /// Like [`update`](Self::update), but only publishes a revision when `f`
    /// returns `Some`. A `None` closure must leave state untouched.
    fn try_update<R>(&self, f: impl FnOnce(&mut Shared) -> Option<R>) -> Option<R> {
        let result = f(&mut self.lock());
        if result.is_some() {
            self.notify();
        }
        result
    }

    fn notify(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Every update is a complete fold, so a poisoned lock still holds
        // consistent state.
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_replies() -> (ChatState, MessageId, MessageId) {
        let mut state = ChatState::default();
        state.messages.push(Message::user("hello", "10:00"));
        let gpt = Message::placeholder(ModelId::Gpt4, "10:00");
        let deepseek = Message::placeholder(ModelId::DeepSeek, "10:00");
        let ids = (gpt.id, deepseek.id);
        state.messages.push(gpt);
        state.messages.push(deepseek);
        (state, ids.0, ids.1)
    }

    #[test]
    fn interleaved_deltas_land_on_their_own_message() {
        let (mut state, gpt, deepseek) = two_replies();
        let arrivals = [
            (deepseek, "Deep"),
            (gpt, "Hel"),
            (gpt, "lo"),
            (deepseek, "Seek"),
            (gpt, "!"),
        ];

        for (id, text) in arrivals {
            assert!(state.apply(id, StreamEvent::Delta(text.to_string())));
        }

        assert_eq!(state.message(gpt).unwrap().content, "Hello!");
        assert_eq!(state.message(deepseek).unwrap().content, "DeepSeek");
        assert_eq!(state.messages[0].content, "hello");
    }

    #[test]
    fn literal_frames_are_appended() {
        let (mut state, gpt, _) = two_replies();
        state.apply(gpt, StreamEvent::Delta("a".into()));
        state.apply(gpt, StreamEvent::Literal("{oops".into()));
        assert_eq!(state.message(gpt).unwrap().content, "a{oops");
    }

    #[test]
    fn done_sets_latency_and_usage_once() {
        let (mut state, gpt, _) = two_replies();
        let mut usage = serde_json::Map::new();
        usage.insert("total_tokens".into(), 7.into());

        state.apply(gpt, StreamEvent::Done { latency: Some(1.2), usage: Some(usage.clone()) });
        state.apply(gpt, StreamEvent::Done { latency: Some(9.9), usage: None });

        let message = state.message(gpt).unwrap();
        assert_eq!(message.latency, Some(1.2));
        assert_eq!(message.usage, Some(usage));
        assert!(!message.error);
    }

    #[test]
    fn model_error_replaces_content() {
        let (mut state, _, deepseek) = two_replies();
        state.apply(deepseek, StreamEvent::Delta("partial".into()));
        state.apply(deepseek, StreamEvent::Error(Some("overloaded".into())));

        let message = state.message(deepseek).unwrap();
        assert_eq!(message.content, "overloaded");
        assert!(message.error);

        state.apply(deepseek, StreamEvent::Error(None));
        assert_eq!(state.message(deepseek).unwrap().content, MODEL_ERROR_FALLBACK);
    }

    #[test]
    fn transport_failure_keeps_partial_output() {
        let (mut state, gpt, deepseek) = two_replies();
        state.apply(gpt, StreamEvent::Delta("half an ans".into()));
        let err = TransportError::Network("connection reset".into());

        state.fail(gpt, &err);
        state.fail(deepseek, &err);

        let gpt = state.message(gpt).unwrap();
        assert_eq!(gpt.content, "half an ans");
        assert!(gpt.error);

        let deepseek = state.message(deepseek).unwrap();
        assert_eq!(deepseek.content, "Error: network error: connection reset");
        assert!(deepseek.error);
    }

    #[test]
    fn events_for_unknown_messages_are_dropped() {
        let (mut state, _, _) = two_replies();
        let before = state.clone();

        assert!(!state.apply(MessageId::new(), StreamEvent::Delta("x".into())));
        assert!(!state.fail(MessageId::new(), &TransportError::Aborted));
        assert_eq!(state, before);
    }
}
