//! Domain records shared by the store, the tutoring core and the channels.
//!
//! Everything here is plain data: validation happens at the store boundary
//! and in [`crate::tutor`], never in these types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Conversation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// One persisted message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Position in the conversation, 0-based and gapless. Assigned by the store.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// A turn waiting to be appended; the store assigns `sequence` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
}

impl NewTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Suggested next questions for a conversation. Replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpSet {
    pub questions: Vec<String>,
    /// Turn count of the conversation when this set was requested.
    pub generated_at_turn: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub curriculum_id: String,
    pub unit_id: String,
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
    #[serde(default)]
    pub follow_ups: Option<FollowUpSet>,
}

// ── Learner ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    #[serde(default)]
    pub display_name: String,
    /// Self-reported background ("second-year CS student", "hobbyist"…).
    #[serde(default)]
    pub background: String,
}

// ── Curriculum parameters ─────────────────────────────────────────────────────

/// Coarse size of a requested curriculum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Length {
    Short,
    #[default]
    Medium,
    Long,
}

impl Length {
    /// Number of units a curriculum of this length always has.
    pub fn unit_count(self) -> usize {
        match self {
            Length::Short => 3,
            Length::Medium => 5,
            Length::Long => 7,
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Short => f.write_str("short"),
            Length::Medium => f.write_str("medium"),
            Length::Long => f.write_str("long"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Beginner => f.write_str("beginner"),
            Complexity::Intermediate => f.write_str("intermediate"),
            Complexity::Advanced => f.write_str("advanced"),
        }
    }
}

// ── Curriculum ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumUnit {
    pub id: String,
    pub title: String,
    /// Short learner-facing summary with objectives.
    pub overview: String,
    /// Full instructional text.
    pub body: String,
    pub order: u32,
    pub complete: bool,
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub originating_prompt: String,
    pub length: Length,
    pub complexity: Complexity,
    pub created_at: DateTime<Utc>,
    pub units: Vec<CurriculumUnit>,
}

impl Curriculum {
    /// Materialise a synthesized draft: assign ids and one conversation per unit.
    pub fn from_draft(
        user_id: &str,
        length: Length,
        complexity: Complexity,
        draft: CurriculumDraft,
    ) -> Self {
        let units = draft
            .units
            .into_iter()
            .map(|u| CurriculumUnit {
                id: Uuid::new_v4().to_string(),
                title: u.title,
                overview: u.overview,
                body: u.body,
                order: u.order,
                complete: false,
                conversation_id: Uuid::new_v4().to_string(),
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: draft.title,
            description: draft.description,
            originating_prompt: draft.originating_prompt,
            length,
            complexity,
            created_at: Utc::now(),
            units,
        }
    }

    /// Fraction of completed units, `0.0..=1.0`. Computed, never stored.
    pub fn progress(&self) -> f64 {
        if self.units.is_empty() {
            return 0.0;
        }
        let done = self.units.iter().filter(|u| u.complete).count();
        done as f64 / self.units.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        !self.units.is_empty() && self.units.iter().all(|u| u.complete)
    }
}

/// Output of curriculum synthesis, before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct CurriculumDraft {
    pub title: String,
    pub description: String,
    pub originating_prompt: String,
    pub units: Vec<UnitDraft>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitDraft {
    pub title: String,
    pub overview: String,
    pub body: String,
    pub order: u32,
}
