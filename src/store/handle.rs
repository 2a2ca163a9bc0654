//! [`StoreHandle`] — async-safe handle over a [`ContextStore`].
//!
//! All store calls run on `tokio::task::spawn_blocking` so callers can hold
//! this in async code without stalling the runtime.

use std::sync::Arc;

use crate::error::TutorError;
use crate::model::{ConversationTurn, Curriculum, CurriculumUnit, FollowUpSet, LearnerProfile, NewTurn};

use super::ContextStore;

/// Cheaply cloneable (`Arc`-backed) handle to the shared store.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn ContextStore>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    pub fn store_type(&self) -> String {
        self.store.store_type().to_string()
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, TutorError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ContextStore) -> Result<T, TutorError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| TutorError::Store(format!("{op} join: {e}")))?
    }

    // ── Curricula ─────────────────────────────────────────────────────

    pub async fn insert_curriculum(&self, curriculum: Curriculum) -> Result<(), TutorError> {
        self.run("insert_curriculum", move |s| s.insert_curriculum(&curriculum)).await
    }

    pub async fn curriculum(&self, curriculum_id: &str) -> Result<Curriculum, TutorError> {
        let id = curriculum_id.to_string();
        self.run("curriculum", move |s| s.curriculum(&id)).await
    }

    pub async fn curricula_for_user(&self, user_id: &str) -> Result<Vec<Curriculum>, TutorError> {
        let id = user_id.to_string();
        self.run("curricula_for_user", move |s| s.curricula_for_user(&id)).await
    }

    pub async fn delete_curriculum(&self, curriculum_id: &str) -> Result<(), TutorError> {
        let id = curriculum_id.to_string();
        self.run("delete_curriculum", move |s| s.delete_curriculum(&id)).await
    }

    pub async fn complete_unit(&self, unit_id: &str) -> Result<(CurriculumUnit, bool), TutorError> {
        let id = unit_id.to_string();
        self.run("complete_unit", move |s| s.complete_unit(&id)).await
    }

    pub async fn unit_context(&self, conversation_id: &str) -> Result<(Curriculum, usize), TutorError> {
        let id = conversation_id.to_string();
        self.run("unit_context", move |s| s.unit_context(&id)).await
    }

    // ── Conversations ─────────────────────────────────────────────────

    pub async fn turns(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>, TutorError> {
        let id = conversation_id.to_string();
        self.run("turns", move |s| s.turns(&id)).await
    }

    pub async fn last_turns(&self, conversation_id: &str, n: usize) -> Result<Vec<ConversationTurn>, TutorError> {
        let id = conversation_id.to_string();
        self.run("last_turns", move |s| s.last_turns(&id, n)).await
    }

    pub async fn turn_count(&self, conversation_id: &str) -> Result<usize, TutorError> {
        let id = conversation_id.to_string();
        self.run("turn_count", move |s| s.turn_count(&id)).await
    }

    pub async fn append_turns(
        &self,
        conversation_id: &str,
        turns: Vec<NewTurn>,
        max_turns: usize,
    ) -> Result<Vec<ConversationTurn>, TutorError> {
        let id = conversation_id.to_string();
        self.run("append_turns", move |s| s.append_turns(&id, &turns, max_turns)).await
    }

    pub async fn follow_ups(&self, conversation_id: &str) -> Result<Option<FollowUpSet>, TutorError> {
        let id = conversation_id.to_string();
        self.run("follow_ups", move |s| s.follow_ups(&id)).await
    }

    pub async fn replace_follow_ups(&self, conversation_id: &str, set: FollowUpSet) -> Result<bool, TutorError> {
        let id = conversation_id.to_string();
        self.run("replace_follow_ups", move |s| s.replace_follow_ups(&id, set)).await
    }

    // ── Learners ──────────────────────────────────────────────────────

    pub async fn profile(&self, user_id: &str) -> Result<Option<LearnerProfile>, TutorError> {
        let id = user_id.to_string();
        self.run("profile", move |s| s.profile(&id)).await
    }

    pub async fn save_profile(&self, user_id: &str, profile: LearnerProfile) -> Result<(), TutorError> {
        let id = user_id.to_string();
        self.run("save_profile", move |s| s.save_profile(&id, &profile)).await
    }
}
