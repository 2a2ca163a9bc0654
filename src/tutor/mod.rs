//! Tutoring core — the single entry point used by the channels.
//!
//! ```text
//! Tutor
//!  ├── ChatOrchestrator       chat turns, per-conversation locking, streaming
//!  │    └── FollowUpSynthesizer   detached, after every completed turn
//!  ├── CurriculumSynthesizer  structure → elaboration → fallback
//!  └── PromptComposer         shared by all of the above
//! ```

pub mod chat;
pub mod curriculum;
pub mod followup;
pub mod prompt;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ChatConfig, Config};
use crate::error::TutorError;
use crate::llm::LlmProvider;
use crate::model::{
    Complexity, ConversationTurn, Curriculum, CurriculumUnit, FollowUpSet, LearnerProfile, Length, Role,
};
use crate::store::StoreHandle;

use chat::{ChatEvent, ChatOrchestrator, ChatOutcome, ChatRequest};
use curriculum::CurriculumSynthesizer;
use prompt::PromptComposer;

/// Result of completing a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitCompletion {
    pub unit: CurriculumUnit,
    pub curriculum_complete: bool,
}

pub struct Tutor {
    store: StoreHandle,
    provider_name: &'static str,
    chat: ChatOrchestrator,
    curricula: CurriculumSynthesizer,
}

impl Tutor {
    pub fn new(store: StoreHandle, provider: LlmProvider, config: &Config) -> Self {
        let composer = PromptComposer::new(config.prompts_dir.as_deref())
            .with_windows(config.chat.history_window, config.chat.follow_up_history);
        Self::from_parts(
            store,
            provider,
            composer,
            config.chat.clone(),
            config.curriculum.elaboration_concurrency,
        )
    }

    pub fn from_parts(
        store: StoreHandle,
        provider: LlmProvider,
        composer: PromptComposer,
        chat: ChatConfig,
        elaboration_concurrency: usize,
    ) -> Self {
        let composer = Arc::new(composer);
        Self {
            provider_name: provider.name(),
            curricula: CurriculumSynthesizer::new(provider.clone(), Arc::clone(&composer), elaboration_concurrency),
            chat: ChatOrchestrator::new(store.clone(), provider, composer, chat),
            store,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    pub fn store_type(&self) -> String {
        self.store.store_type()
    }

    // ── Conversations ─────────────────────────────────────────────────

    /// Run one chat message; see [`ChatOrchestrator::handle`].
    pub async fn generate(
        &self,
        req: ChatRequest,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, TutorError> {
        self.chat.handle(req, events, cancel).await
    }

    pub async fn get_turns(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>, TutorError> {
        self.store.turns(conversation_id).await
    }

    /// Store a turn directly. Never triggers generation.
    pub async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ConversationTurn, TutorError> {
        self.chat.append(conversation_id, role, content).await
    }

    pub async fn follow_ups(&self, conversation_id: &str) -> Result<Option<FollowUpSet>, TutorError> {
        self.store.follow_ups(conversation_id).await
    }

    // ── Curricula ─────────────────────────────────────────────────────

    /// Synthesize and store a curriculum. Defaults: medium, beginner.
    pub async fn create_curriculum(
        &self,
        user_id: &str,
        topic: &str,
        length: Option<Length>,
        complexity: Option<Complexity>,
    ) -> Result<Curriculum, TutorError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(TutorError::Validation("topic is empty".into()));
        }
        if user_id.trim().is_empty() {
            return Err(TutorError::Validation("user id is empty".into()));
        }
        let length = length.unwrap_or_default();
        let complexity = complexity.unwrap_or_default();

        let draft = self.curricula.synthesize(topic, length, complexity).await;
        let curriculum = Curriculum::from_draft(user_id, length, complexity, draft);
        self.store.insert_curriculum(curriculum.clone()).await?;
        info!(curriculum_id = %curriculum.id, user_id, units = curriculum.units.len(), "curriculum created");
        Ok(curriculum)
    }

    pub async fn complete_unit(&self, unit_id: &str) -> Result<UnitCompletion, TutorError> {
        let (unit, curriculum_complete) = self.store.complete_unit(unit_id).await?;
        info!(unit_id, curriculum_complete, "unit completed");
        Ok(UnitCompletion { unit, curriculum_complete })
    }

    pub async fn get_curriculum(&self, curriculum_id: &str) -> Result<Curriculum, TutorError> {
        self.store.curriculum(curriculum_id).await
    }

    pub async fn list_curricula(&self, user_id: &str) -> Result<Vec<Curriculum>, TutorError> {
        self.store.curricula_for_user(user_id).await
    }

    pub async fn delete_curriculum(&self, curriculum_id: &str) -> Result<(), TutorError> {
        self.store.delete_curriculum(curriculum_id).await?;
        info!(curriculum_id, "curriculum deleted");
        Ok(())
    }

    // ── Learners ──────────────────────────────────────────────────────

    pub async fn save_profile(&self, user_id: &str, profile: LearnerProfile) -> Result<(), TutorError> {
        if user_id.trim().is_empty() {
            return Err(TutorError::Validation("user id is empty".into()));
        }
        self.store.save_profile(user_id, profile).await
    }
}

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````), if any.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}
