//! Conversation orchestrator — one inbound message in, one persisted
//! exchange and one terminal event out.
//!
//! ```text
//! Idle → Validating → Streaming → Persisting → Completed
//!            ↘             ↘
//!           Failed        Failed
//! ```
//!
//! The whole pipeline for a message runs under a per-conversation lock, so a
//! second message on the same conversation waits until the first is
//! persisted. Different conversations never contend.
//!
//! Every call to [`ChatOrchestrator::handle`] emits zero or more `chunk`
//! events followed by exactly one `complete` or `error` event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::TutorError;
use crate::llm::{GenerationOptions, LlmProvider};
use crate::model::{ConversationTurn, NewTurn, Role};
use crate::store::StoreHandle;

use super::followup::FollowUpSynthesizer;
use super::prompt::{ChatContext, PromptComposer, PromptKind};

// ── Wire types ────────────────────────────────────────────────────────────────

/// One inbound chat message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub user_id: String,
    /// `User` runs generation; `Assistant` is stored as-is.
    pub role: Role,
    pub content: String,
}

impl ChatRequest {
    pub fn user(conversation_id: impl Into<String>, user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Server → client realtime event, serialised as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ChatEvent {
    Chunk {
        chunk: String,
    },
    Complete {
        message: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Error {
        error: String,
    },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatEvent::Chunk { .. })
    }
}

/// Result of a completed message.
#[derive(Debug)]
pub struct ChatOutcome {
    /// The turns appended by this message.
    pub turns: Vec<ConversationTurn>,
    /// Assistant text (the inserted text for non-user roles).
    pub reply: String,
    /// Detached follow-up refresh, if one was started.
    pub follow_ups: Option<JoinHandle<()>>,
}

// ── Per-conversation locks ────────────────────────────────────────────────────

/// Hands out one async mutex per conversation id.
///
/// Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLocks {
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(map.entry(conversation_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct ChatOrchestrator {
    store: StoreHandle,
    provider: LlmProvider,
    composer: Arc<PromptComposer>,
    follow_ups: FollowUpSynthesizer,
    locks: ConversationLocks,
    settings: ChatConfig,
}

impl ChatOrchestrator {
    pub fn new(
        store: StoreHandle,
        provider: LlmProvider,
        composer: Arc<PromptComposer>,
        settings: ChatConfig,
    ) -> Self {
        let follow_ups = FollowUpSynthesizer::new(provider.clone(), Arc::clone(&composer));
        Self {
            store,
            provider,
            composer,
            follow_ups,
            locks: ConversationLocks::default(),
            settings,
        }
    }

    /// Process one message, streaming events to `events`.
    ///
    /// Exactly one terminal event (`complete` or `error`) is sent per call,
    /// best effort if the receiver has gone away. Failure or cancellation
    /// persists nothing.
    pub async fn handle(
        &self,
        req: ChatRequest,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, TutorError> {
        let conversation_id = req.conversation_id.clone();
        let role = req.role;

        match self.run(req, events, cancel).await {
            Ok((turns, reply)) => {
                debug!(conversation_id = %conversation_id, state = "completed", turns = turns.len());
                let event = ChatEvent::Complete { message: reply.clone(), conversation_id: conversation_id.clone() };
                if events.send(event).await.is_err() {
                    debug!(conversation_id = %conversation_id, "client gone before completion event");
                }

                let follow_ups = (self.settings.follow_up_count > 0).then(|| {
                    let generated_at_turn = turns.last().map(|t| t.sequence as usize + 1).unwrap_or_default();
                    self.follow_ups.spawn_refresh(
                        self.store.clone(),
                        conversation_id.clone(),
                        generated_at_turn,
                        self.settings.follow_up_count,
                    )
                });

                info!(conversation_id = %conversation_id, %role, reply_len = reply.len(), "chat turn completed");
                Ok(ChatOutcome { turns, reply, follow_ups })
            }
            Err(e) => {
                match &e {
                    TutorError::Cancelled => info!(conversation_id = %conversation_id, "chat turn cancelled"),
                    TutorError::Validation(_) | TutorError::QuotaExceeded { .. } | TutorError::NotFound { .. } => {
                        debug!(conversation_id = %conversation_id, state = "failed", error = %e)
                    }
                    _ => warn!(conversation_id = %conversation_id, state = "failed", error = %e, "chat turn failed"),
                }
                let _ = events.send(ChatEvent::Error { error: e.to_string() }).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        req: ChatRequest,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ConversationTurn>, String), TutorError> {
        let conversation_id = req.conversation_id.as_str();
        debug!(conversation_id, state = "validating");

        let content = req.content.trim();
        if content.is_empty() {
            return Err(TutorError::Validation("message is empty".into()));
        }

        let _guard = self.locks.acquire(conversation_id).await;

        let count = self.store.turn_count(conversation_id).await?;
        if count >= self.settings.max_turns {
            return Err(TutorError::QuotaExceeded { max: self.settings.max_turns });
        }

        let (batch, reply) = match req.role {
            Role::User => {
                debug!(conversation_id, state = "streaming", prior_turns = count);
                let reply = self.generate(&req.user_id, conversation_id, content, events, cancel).await?;
                (vec![NewTurn::user(content), NewTurn::assistant(reply.as_str())], reply)
            }
            Role::Assistant => (vec![NewTurn::assistant(content)], content.to_string()),
        };

        debug!(conversation_id, state = "persisting", turns = batch.len());
        let turns = self
            .store
            .append_turns(conversation_id, batch, self.settings.max_turns)
            .await?;
        Ok((turns, reply))
    }

    /// Compose, stream and forward fragments; returns the concatenated reply.
    async fn generate(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<String, TutorError> {
        let (curriculum, unit_index) = self.store.unit_context(conversation_id).await?;
        let profile = self.store.profile(user_id).await?;
        let history = self
            .store
            .last_turns(conversation_id, self.composer.history_window())
            .await?;

        let messages = self
            .composer
            .compose(PromptKind::Chat(ChatContext {
                curriculum: &curriculum,
                unit_index,
                profile: profile.as_ref(),
                history: &history,
                message,
            }))
            .into_messages();

        let options = GenerationOptions::text(800);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TutorError::Cancelled),
            s = self.provider.stream(&messages, &options) => s.map_err(|e| TutorError::Generation(e.to_string()))?,
        };

        let mut reply = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TutorError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    reply.push_str(&fragment);
                    if events.send(ChatEvent::Chunk { chunk: fragment }).await.is_err() {
                        return Err(TutorError::Cancelled);
                    }
                }
                Some(Err(e)) => return Err(TutorError::Generation(e.to_string())),
            }
        }

        if reply.trim().is_empty() {
            return Err(TutorError::Generation("provider returned an empty reply".into()));
        }
        Ok(reply)
    }

    /// Store one turn without generation or follow-ups.
    pub async fn append(&self, conversation_id: &str, role: Role, content: &str) -> Result<ConversationTurn, TutorError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TutorError::Validation("message is empty".into()));
        }
        let _guard = self.locks.acquire(conversation_id).await;
        let mut turns = self
            .store
            .append_turns(conversation_id, vec![NewTurn { role, content: content.to_string() }], self.settings.max_turns)
            .await?;
        turns
            .pop()
            .ok_or_else(|| TutorError::Store("append returned no turn".into()))
    }
}
