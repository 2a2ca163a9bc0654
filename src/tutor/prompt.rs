//! Layered prompt composition for every generation call.
//!
//! Prompts are assembled from plain-text template fragments. The built-in
//! fragments are compiled in from `config/prompts/`; a configured override
//! directory may replace any of them by file name. Missing override files
//! fall back silently to the built-in text.
//!
//! ## Layers per prompt kind
//!
//! ```text
//! chat                  tutor_persona.md + chat_context.md
//! curriculum structure  curriculum_structure.md
//! unit elaboration      unit_elaboration.md
//! follow-ups            follow_ups.md
//! ```
//!
//! Variable substitution uses `{{key}}` syntax and runs once over the joined
//! layers. Substituted values are never re-scanned, so learner text that
//! happens to contain `{{...}}` comes through verbatim.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::llm::ChatMessage;
use crate::model::{Complexity, ConversationTurn, Curriculum, LearnerProfile, Length, Role};

const SEPARATOR: &str = "\n\n";

/// Stored turns replayed into a chat prompt.
pub const CHAT_HISTORY_WINDOW: usize = 20;
/// Stored turns handed to follow-up synthesis.
pub const FOLLOW_UP_HISTORY_WINDOW: usize = 10;

const BUILTIN: &[(&str, &str)] = &[
    ("tutor_persona.md", include_str!("../../config/prompts/tutor_persona.md")),
    ("chat_context.md", include_str!("../../config/prompts/chat_context.md")),
    ("curriculum_structure.md", include_str!("../../config/prompts/curriculum_structure.md")),
    ("unit_elaboration.md", include_str!("../../config/prompts/unit_elaboration.md")),
    ("follow_ups.md", include_str!("../../config/prompts/follow_ups.md")),
];

// ── Output ────────────────────────────────────────────────────────────────────

/// A composed prompt: system instructions plus ordered conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub instructions: String,
    pub history: Vec<ChatMessage>,
}

impl Prompt {
    /// Flatten into the message list sent to a provider.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(self.instructions));
        messages.extend(self.history);
        messages
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// Everything a chat turn's prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct ChatContext<'a> {
    pub curriculum: &'a Curriculum,
    /// Index of the conversation's unit in `curriculum.units`.
    pub unit_index: usize,
    pub profile: Option<&'a LearnerProfile>,
    /// Stored turns, oldest first. Only the most recent window is used.
    pub history: &'a [ConversationTurn],
    /// The inbound learner message.
    pub message: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub enum PromptKind<'a> {
    Chat(ChatContext<'a>),
    CurriculumStructure { topic: &'a str, length: Length, complexity: Complexity },
    UnitElaboration { unit_name: &'a str, topic: &'a str, complexity: Complexity },
    FollowUps { history: &'a [ConversationTurn], count: usize },
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Fluent builder that joins template layers and applies `{{var}}` substitution.
pub struct PromptBuilder<'t> {
    templates: &'t HashMap<String, String>,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl<'t> PromptBuilder<'t> {
    fn new(templates: &'t HashMap<String, String>) -> Self {
        Self { templates, parts: Vec::new(), vars: HashMap::new() }
    }

    /// Append the template named `name`. Unknown names are skipped.
    pub fn layer(mut self, name: &str) -> Self {
        match self.templates.get(name) {
            Some(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    self.parts.push(trimmed.to_string());
                }
            }
            None => debug!("prompt: layer '{name}' not found — skipped"),
        }
        self
    }

    /// Register a single variable.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all layers with blank lines and substitute variables.
    pub fn build(self) -> String {
        render(&self.parts.join(SEPARATOR), &self.vars)
    }
}

/// Single-pass `{{key}}` substitution. Unknown keys are left as written.
fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Composer ──────────────────────────────────────────────────────────────────

/// Builds [`Prompt`]s for every generation kind. Pure once constructed.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    templates: HashMap<String, String>,
    history_window: usize,
    follow_up_window: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PromptComposer {
    /// Built-in templates, replaced file-by-file from `override_dir` when given.
    pub fn new(override_dir: Option<&Path>) -> Self {
        let mut templates: HashMap<String, String> =
            BUILTIN.iter().map(|(name, text)| (name.to_string(), text.to_string())).collect();

        if let Some(dir) = override_dir {
            for (name, _) in BUILTIN {
                let path = dir.join(name);
                match fs::read_to_string(&path) {
                    Ok(text) => {
                        debug!(path = %path.display(), "prompt override loaded");
                        templates.insert(name.to_string(), text);
                    }
                    Err(_) => debug!("prompt: override '{}' not found — using built-in", path.display()),
                }
            }
        }

        Self {
            templates,
            history_window: CHAT_HISTORY_WINDOW,
            follow_up_window: FOLLOW_UP_HISTORY_WINDOW,
        }
    }

    pub fn with_windows(mut self, history_window: usize, follow_up_window: usize) -> Self {
        self.history_window = history_window;
        self.follow_up_window = follow_up_window;
        self
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn follow_up_window(&self) -> usize {
        self.follow_up_window
    }

    fn builder(&self) -> PromptBuilder<'_> {
        PromptBuilder::new(&self.templates)
    }

    pub fn compose(&self, kind: PromptKind<'_>) -> Prompt {
        match kind {
            PromptKind::Chat(ctx) => self.chat(ctx),
            PromptKind::CurriculumStructure { topic, length, complexity } => {
                let count = length.unit_count();
                let instructions = self
                    .builder()
                    .layer("curriculum_structure.md")
                    .var("topic", topic)
                    .var("unit_count", count.to_string())
                    .var("last_order", count.saturating_sub(1).to_string())
                    .var("complexity", complexity.to_string())
                    .build();
                Prompt {
                    instructions,
                    history: vec![ChatMessage::user(format!(
                        "Design a {length} {complexity} course on: {topic}"
                    ))],
                }
            }
            PromptKind::UnitElaboration { unit_name, topic, complexity } => {
                let instructions = self
                    .builder()
                    .layer("unit_elaboration.md")
                    .var("unit_name", unit_name)
                    .var("topic", topic)
                    .var("complexity", complexity.to_string())
                    .build();
                Prompt {
                    instructions,
                    history: vec![ChatMessage::user(format!("Write the lesson for \"{unit_name}\"."))],
                }
            }
            PromptKind::FollowUps { history, count } => {
                let instructions = self
                    .builder()
                    .layer("follow_ups.md")
                    .var("count", count.to_string())
                    .build();
                let mut messages = to_messages(tail(history, self.follow_up_window));
                messages.push(ChatMessage::user(format!("Suggest {count} follow-up questions.")));
                Prompt { instructions, history: messages }
            }
        }
    }

    fn chat(&self, ctx: ChatContext<'_>) -> Prompt {
        let c = ctx.curriculum;
        let unit = c.units.get(ctx.unit_index);
        let (learner_name, learner_background) = match ctx.profile {
            Some(p) => (
                non_empty_or(&p.display_name, "the learner"),
                non_empty_or(&p.background, "not provided"),
            ),
            None => ("the learner".to_string(), "not provided".to_string()),
        };

        let units = c
            .units
            .iter()
            .map(|u| format!("{}. {}: {}", u.order, u.title, u.overview))
            .collect::<Vec<_>>()
            .join("\n");

        let instructions = self
            .builder()
            .layer("tutor_persona.md")
            .layer("chat_context.md")
            .var("curriculum_title", c.title.as_str())
            .var("curriculum_description", c.description.as_str())
            .var("units", units)
            .var("unit_title", unit.map(|u| u.title.as_str()).unwrap_or_default())
            .var("unit_overview", unit.map(|u| u.overview.as_str()).unwrap_or_default())
            .var("unit_body", unit.map(|u| u.body.as_str()).unwrap_or_default())
            .var("learner_name", learner_name)
            .var("learner_background", learner_background)
            .build();

        let mut history = to_messages(tail(ctx.history, self.history_window));
        history.push(ChatMessage::user(ctx.message));
        Prompt { instructions, history }
    }
}

fn tail(turns: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    &turns[turns.len().saturating_sub(n)..]
}

fn to_messages(turns: &[ConversationTurn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|t| match t.role {
            Role::User => ChatMessage::user(t.content.as_str()),
            Role::Assistant => ChatMessage::assistant(t.content.as_str()),
        })
        .collect()
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback.to_string() } else { trimmed.to_string() }
}
