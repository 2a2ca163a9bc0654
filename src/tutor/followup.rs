//! Follow-up question synthesis.
//!
//! After every completed chat turn a detached task asks the provider for
//! `count` suggested next questions and replaces the conversation's
//! follow-up set. Synthesis never fails: unusable output is replaced by a
//! static list cycled to `count`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::llm::{GenerationOptions, LlmProvider};
use crate::model::{ConversationTurn, FollowUpSet};
use crate::store::StoreHandle;

use super::prompt::{PromptComposer, PromptKind};
use super::strip_code_fence;

const FALLBACK_QUESTIONS: &[&str] = &[
    "Can you explain that with a concrete example?",
    "What is the most common mistake people make with this?",
    "How does this connect to the rest of the unit?",
    "Could you give me a short exercise to practise this?",
    "What should I learn next after this?",
];

#[derive(Deserialize)]
struct QuestionsPayload {
    questions: Vec<String>,
}

/// The static list, truncated or cycled to exactly `count` entries.
pub fn fallback_questions(count: usize) -> Vec<String> {
    FALLBACK_QUESTIONS
        .iter()
        .cycle()
        .take(count)
        .map(|q| q.to_string())
        .collect()
}

/// Parse `{ "questions": [...] }`, keeping the first `count` non-blank entries.
fn parse_questions(text: &str, count: usize) -> Result<Vec<String>, String> {
    let payload: QuestionsPayload =
        serde_json::from_str(strip_code_fence(text)).map_err(|e| format!("invalid JSON: {e}"))?;
    let questions: Vec<String> = payload
        .questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(count)
        .collect();
    if questions.len() < count {
        return Err(format!("expected {count} questions, got {}", questions.len()));
    }
    Ok(questions)
}

#[derive(Debug, Clone)]
pub struct FollowUpSynthesizer {
    provider: LlmProvider,
    composer: Arc<PromptComposer>,
}

impl FollowUpSynthesizer {
    pub fn new(provider: LlmProvider, composer: Arc<PromptComposer>) -> Self {
        Self { provider, composer }
    }

    /// Exactly `count` questions derived from `history`.
    pub async fn synthesize(&self, history: &[ConversationTurn], count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }
        let messages = self
            .composer
            .compose(PromptKind::FollowUps { history, count })
            .into_messages();

        let outcome = match self.provider.complete(&messages, &GenerationOptions::json(400)).await {
            Ok(reply) => parse_questions(&reply.text, count),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(questions) => questions,
            Err(reason) => {
                warn!(%reason, count, "follow-up synthesis failed — using fallback questions");
                fallback_questions(count)
            }
        }
    }

    /// Regenerate the follow-up set of `conversation_id` on a detached task.
    ///
    /// `generated_at_turn` is the turn count the caller just produced; the
    /// store discards the result if a newer set has landed meanwhile.
    pub fn spawn_refresh(
        &self,
        store: StoreHandle,
        conversation_id: String,
        generated_at_turn: usize,
        count: usize,
    ) -> JoinHandle<()> {
        let synth = self.clone();
        tokio::spawn(async move {
            let window = synth.composer.follow_up_window();
            let history = match store.last_turns(&conversation_id, window).await {
                Ok(turns) => turns,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "follow-ups: cannot read history");
                    return;
                }
            };

            let questions = synth.synthesize(&history, count).await;
            let set = FollowUpSet { questions, generated_at_turn, created_at: Utc::now() };
            match store.replace_follow_ups(&conversation_id, set).await {
                Ok(stored) => debug!(conversation_id = %conversation_id, generated_at_turn, stored, "follow-ups refreshed"),
                Err(e) => warn!(conversation_id = %conversation_id, error = %e, "follow-ups: cannot store set"),
            }
        })
    }
}
