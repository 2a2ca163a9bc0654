//! Context store — durable storage for curricula, conversation turns,
//! follow-up sets and learner profiles.
//!
//! [`ContextStore`] is the pluggable backend seam: a blocking, `Send + Sync`
//! trait. Async callers go through [`StoreHandle`], which dispatches every
//! call onto `spawn_blocking`. [`local::LocalStore`] is the in-process
//! implementation shipped with the service.

pub mod handle;
pub mod local;

pub use handle::StoreHandle;

use crate::error::TutorError;
use crate::model::{ConversationTurn, Curriculum, CurriculumUnit, FollowUpSet, LearnerProfile, NewTurn};

/// Pluggable context store.
///
/// Every conversation belongs to a curriculum unit and is created together
/// with its curriculum by [`insert_curriculum`](Self::insert_curriculum);
/// conversation operations on an unknown id fail with `NotFound`.
pub trait ContextStore: Send + Sync {
    /// Unique type name for this store (e.g. `"local"`).
    fn store_type(&self) -> &str;

    // ── Curricula ─────────────────────────────────────────────────────

    /// Persist a curriculum and open an empty conversation for every unit.
    fn insert_curriculum(&self, curriculum: &Curriculum) -> Result<(), TutorError>;

    fn curriculum(&self, curriculum_id: &str) -> Result<Curriculum, TutorError>;

    /// A learner's curricula, newest first.
    fn curricula_for_user(&self, user_id: &str) -> Result<Vec<Curriculum>, TutorError>;

    /// Remove a curriculum together with its units, conversations and
    /// follow-up sets.
    fn delete_curriculum(&self, curriculum_id: &str) -> Result<(), TutorError>;

    /// Mark a unit complete. Returns the unit and whether every unit of its
    /// curriculum is now complete. Completing twice is a no-op.
    fn complete_unit(&self, unit_id: &str) -> Result<(CurriculumUnit, bool), TutorError>;

    /// The curriculum owning `conversation_id` and the index of the
    /// conversation's unit within `curriculum.units`.
    fn unit_context(&self, conversation_id: &str) -> Result<(Curriculum, usize), TutorError>;

    // ── Conversations ─────────────────────────────────────────────────

    /// All turns, ordered by sequence.
    fn turns(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>, TutorError>;

    /// The most recent `n` turns, oldest first.
    fn last_turns(&self, conversation_id: &str, n: usize) -> Result<Vec<ConversationTurn>, TutorError>;

    fn turn_count(&self, conversation_id: &str) -> Result<usize, TutorError>;

    /// Append `turns` as one batch, continuing the sequence.
    ///
    /// Fails with `QuotaExceeded` without writing anything when the
    /// conversation already holds `max_turns` turns. The check and the write
    /// happen atomically.
    fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
        max_turns: usize,
    ) -> Result<Vec<ConversationTurn>, TutorError>;

    fn follow_ups(&self, conversation_id: &str) -> Result<Option<FollowUpSet>, TutorError>;

    /// Replace the follow-up set wholesale. A set generated for an older turn
    /// count than the stored one is discarded; returns whether it was stored.
    fn replace_follow_ups(&self, conversation_id: &str, set: FollowUpSet) -> Result<bool, TutorError>;

    // ── Learners ──────────────────────────────────────────────────────

    fn profile(&self, user_id: &str) -> Result<Option<LearnerProfile>, TutorError>;

    fn save_profile(&self, user_id: &str, profile: &LearnerProfile) -> Result<(), TutorError>;
}
