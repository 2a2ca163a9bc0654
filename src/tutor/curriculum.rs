//! Two-phase curriculum synthesis.
//!
//! 1. **Structure**: one structured call returns the course outline.
//!    Unusable output skips straight to a templated fallback course.
//! 2. **Elaboration**: one free-text call per unit, in `order`. A failed
//!    unit gets a templated body; the rest of the course is unaffected.
//!
//! Whatever happens, the draft has exactly `length.unit_count()` units with
//! orders `0..N-1`.

use std::sync::Arc;

use futures_util::{StreamExt, stream};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::llm::{GenerationOptions, LlmProvider};
use crate::model::{Complexity, CurriculumDraft, Length, UnitDraft};

use super::prompt::{PromptComposer, PromptKind};
use super::strip_code_fence;

const FALLBACK_UNIT_NAMES: &[&str] = &[
    "Foundations of {topic}",
    "Core Concepts in {topic}",
    "Working with {topic}",
    "Common Patterns in {topic}",
    "Applying {topic}",
    "Advanced Topics in {topic}",
    "Putting {topic} into Practice",
];

// ── Structure output ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawStructure {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    units: Vec<RawUnit>,
}

#[derive(Debug, Deserialize)]
struct RawUnit {
    #[serde(default)]
    name: Option<String>,
    /// Used when `name` is missing or blank.
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    /// Integer, float or numeric string; anything else counts as undeclared.
    #[serde(default)]
    order: Option<serde_json::Value>,
}

impl RawUnit {
    fn declared_order(&self) -> Option<f64> {
        let order = match self.order.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        order.filter(|o| o.is_finite())
    }
}

/// Outline after validation and normalization, before elaboration.
#[derive(Debug, Clone, PartialEq)]
struct Outline {
    title: String,
    description: String,
    /// `(name, overview)` in final order.
    units: Vec<(String, String)>,
}

fn parse_structure(text: &str) -> Result<RawStructure, String> {
    let raw: RawStructure =
        serde_json::from_str(strip_code_fence(text)).map_err(|e| format!("invalid JSON: {e}"))?;
    if raw.title.trim().is_empty() {
        return Err("missing title".into());
    }
    if raw.description.trim().is_empty() {
        return Err("missing description".into());
    }
    Ok(raw)
}

/// Sort by declared order, fit to `target` units and fill blanks.
fn normalize(raw: RawStructure, topic: &str, complexity: Complexity, target: usize) -> Outline {
    let mut units = raw.units;
    // Stable: units without an order keep their position after ordered ones.
    units.sort_by(|a, b| {
        let key = |u: &RawUnit| u.declared_order().unwrap_or(f64::INFINITY);
        key(a).total_cmp(&key(b))
    });
    units.truncate(target);

    let mut fitted: Vec<(String, String)> = units
        .into_iter()
        .enumerate()
        .map(|(i, u)| {
            let name = non_blank(u.name)
                .or_else(|| non_blank(u.title))
                .unwrap_or_else(|| fallback_unit_name(topic, i));
            let overview = non_blank(u.overview).unwrap_or_else(|| fallback_overview(&name, topic, complexity));
            (name, overview)
        })
        .collect();

    for i in fitted.len()..target {
        let name = fallback_unit_name(topic, i);
        let overview = fallback_overview(&name, topic, complexity);
        fitted.push((name, overview));
    }

    Outline {
        title: raw.title.trim().to_string(),
        description: raw.description.trim().to_string(),
        units: fitted,
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    let trimmed = s?.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

// ── Templates ─────────────────────────────────────────────────────────────────

fn fallback_unit_name(topic: &str, index: usize) -> String {
    let template = FALLBACK_UNIT_NAMES[index % FALLBACK_UNIT_NAMES.len()];
    let name = template.replace("{topic}", topic);
    if index < FALLBACK_UNIT_NAMES.len() { name } else { format!("{name} ({})", index + 1) }
}

fn fallback_overview(name: &str, topic: &str, complexity: Complexity) -> String {
    format!(
        "In this unit you will study {name} and build the {complexity}-level understanding \
         of {topic} that the following units rely on."
    )
}

/// Templated lesson text used when elaboration fails.
pub fn fallback_body(name: &str, topic: &str, complexity: Complexity) -> String {
    format!(
        "This unit, {name}, is part of a course on {topic} pitched at the {complexity} level. \
         It introduces the central ideas of the unit and shows where they fit within {topic} \
         as a whole.\n\n\
         Work through the key terms first, then try to explain each one in your own words. \
         Use the tutor chat for this unit to ask questions, request worked examples, or check \
         your understanding of {name} before moving on."
    )
}

fn fallback_outline(topic: &str, length: Length, complexity: Complexity) -> Outline {
    let units = (0..length.unit_count())
        .map(|i| {
            let name = fallback_unit_name(topic, i);
            let overview = fallback_overview(&name, topic, complexity);
            (name, overview)
        })
        .collect();
    Outline {
        title: format!("Introduction to {topic}"),
        description: format!("A {length} {complexity} course covering the essentials of {topic}."),
        units,
    }
}

// ── Synthesizer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CurriculumSynthesizer {
    provider: LlmProvider,
    composer: Arc<PromptComposer>,
    /// Maximum elaboration calls in flight.
    concurrency: usize,
}

impl CurriculumSynthesizer {
    pub fn new(provider: LlmProvider, composer: Arc<PromptComposer>, concurrency: usize) -> Self {
        Self { provider, composer, concurrency: concurrency.max(1) }
    }

    /// Build a full draft for `topic`. Never fails.
    pub async fn synthesize(&self, topic: &str, length: Length, complexity: Complexity) -> CurriculumDraft {
        let target = length.unit_count();

        let (outline, elaborate) = match self.structure(topic, length, complexity).await {
            Ok(raw) => (normalize(raw, topic, complexity, target), true),
            Err(reason) => {
                warn!(topic, %reason, "curriculum structure failed — using fallback curriculum");
                (fallback_outline(topic, length, complexity), false)
            }
        };

        let bodies: Vec<String> = if elaborate {
            let names: Vec<String> = outline.units.iter().map(|(name, _)| name.clone()).collect();
            stream::iter(names.into_iter().enumerate().map(|(order, name)| async move {
                self.elaborate(order, &name, topic, complexity).await
            }))
            .buffered(self.concurrency)
            .collect()
            .await
        } else {
            outline
                .units
                .iter()
                .map(|(name, _)| fallback_body(name, topic, complexity))
                .collect()
        };

        let units = outline
            .units
            .into_iter()
            .zip(bodies)
            .enumerate()
            .map(|(order, ((title, overview), body))| UnitDraft { title, overview, body, order: order as u32 })
            .collect();

        info!(topic, %length, %complexity, units = target, elaborated = elaborate, "curriculum synthesized");

        CurriculumDraft {
            title: outline.title,
            description: outline.description,
            originating_prompt: topic.to_string(),
            units,
        }
    }

    async fn structure(&self, topic: &str, length: Length, complexity: Complexity) -> Result<RawStructure, String> {
        let messages = self
            .composer
            .compose(PromptKind::CurriculumStructure { topic, length, complexity })
            .into_messages();
        let reply = self
            .provider
            .complete(&messages, &GenerationOptions::json(2000))
            .await
            .map_err(|e| e.to_string())?;
        parse_structure(&reply.text)
    }

    async fn elaborate(&self, order: usize, name: &str, topic: &str, complexity: Complexity) -> String {
        let messages = self
            .composer
            .compose(PromptKind::UnitElaboration { unit_name: name, topic, complexity })
            .into_messages();

        match self.provider.complete(&messages, &GenerationOptions::text(1200)).await {
            Ok(reply) if !reply.text.trim().is_empty() => {
                debug!(unit_order = order, "unit elaborated");
                reply.text.trim().to_string()
            }
            Ok(_) => {
                warn!(unit_order = order, unit = name, "unit elaboration returned no text — using template");
                fallback_body(name, topic, complexity)
            }
            Err(e) => {
                warn!(unit_order = order, unit = name, error = %e, "unit elaboration failed — using template");
                fallback_body(name, topic, complexity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::scripted::{Script, ScriptedProvider};

    fn synth(p: &ScriptedProvider, concurrency: usize) -> CurriculumSynthesizer {
        CurriculumSynthesizer::new(LlmProvider::Scripted(p.clone()), Arc::new(PromptComposer::default()), concurrency)
    }

    fn outline_json(names: &[(&str, i64)]) -> String {
        let units: Vec<serde_json::Value> = names
            .iter()
            .map(|(n, o)| serde_json::json!({ "name": n, "overview": format!("about {n}"), "order": o }))
            .collect();
        serde_json::json!({ "title": "Graphs", "description": "A course", "units": units }).to_string()
    }

    fn assert_contiguous(draft: &CurriculumDraft, n: usize) {
        assert_eq!(draft.units.len(), n);
        for (i, u) in draft.units.iter().enumerate() {
            assert_eq!(u.order, i as u32);
            assert!(!u.title.is_empty());
            assert!(!u.overview.is_empty());
            assert!(!u.body.is_empty());
        }
    }

    #[test]
    fn normalize_sorts_by_declared_order_and_pads() {
        let raw: RawStructure = serde_json::from_str(&outline_json(&[("B", 1), ("A", 0)])).unwrap();
        let outline = normalize(raw, "Graphs", Complexity::Beginner, 3);
        assert_eq!(outline.units[0].0, "A");
        assert_eq!(outline.units[1].0, "B");
        assert_eq!(outline.units[2].0, "Working with Graphs");
    }

    #[test]
    fn normalize_truncates_extra_units() {
        let raw: RawStructure =
            serde_json::from_str(&outline_json(&[("A", 0), ("B", 1), ("C", 2), ("D", 3)])).unwrap();
        assert_eq!(normalize(raw, "t", Complexity::Beginner, 3).units.len(), 3);
    }

    #[test]
    fn structure_requires_title_description_and_units() {
        assert!(parse_structure(r#"{"title": "", "description": "d", "units": []}"#).is_err());
        assert!(parse_structure(r#"{"title": "t", "description": "d"}"#).is_err());
        assert!(parse_structure(r#"{"title": "t", "description": "d", "units": "many"}"#).is_err());
        assert!(parse_structure("```json\n{\"title\": \"t\", \"description\": \"d\", \"units\": []}\n```").is_ok());
    }

    #[test]
    fn unit_with_name_and_title_keeps_the_outline() {
        let raw = parse_structure(
            r#"{"title": "Graphs", "description": "d", "units": [
                {"name": "Vertices", "title": "Vertices", "overview": "o", "order": 0},
                {"title": "Edges", "overview": "o", "order": 1},
                {"name": "  ", "title": "Paths", "order": 2}
            ]}"#,
        )
        .unwrap();
        let outline = normalize(raw, "Graphs", Complexity::Beginner, 3);
        let names: Vec<&str> = outline.units.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Vertices", "Edges", "Paths"]);
    }

    #[test]
    fn lenient_orders_are_sorted_numerically() {
        let raw = parse_structure(
            r#"{"title": "Graphs", "description": "d", "units": [
                {"name": "C", "order": "2"},
                {"name": "None", "order": null},
                {"name": "Junk", "order": {"n": 1}},
                {"name": "A", "order": 0.0},
                {"name": "B", "order": 1.5}
            ]}"#,
        )
        .unwrap();
        let outline = normalize(raw, "Graphs", Complexity::Beginner, 5);
        let names: Vec<&str> = outline.units.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C", "None", "Junk"]);
    }

    #[tokio::test]
    async fn mixed_outline_shapes_still_elaborate() {
        let p = ScriptedProvider::new();
        p.push_complete(Script::reply(
            r#"{"title": "Graphs", "description": "d", "units": [
                {"name": "Vertices", "title": "Vertices", "overview": "o", "order": 0.0},
                {"name": "Edges", "overview": "o", "order": 1.0},
                {"name": "Paths", "overview": "o", "order": 2.0}
            ]}"#,
        ));
        for body in ["body 0", "body 1", "body 2"] {
            p.push_complete(Script::reply(body));
        }

        let draft = synth(&p, 1).synthesize("Graphs", Length::Short, Complexity::Beginner).await;
        assert_eq!(draft.title, "Graphs");
        assert_eq!(draft.units[0].title, "Vertices");
        assert_eq!(draft.units[0].body, "body 0");
        assert_eq!(p.requests().len(), 4);
    }

    #[test]
    fn fallback_names_stay_unique_past_template_list() {
        assert_ne!(fallback_unit_name("X", 0), fallback_unit_name("X", 7));
    }

    #[tokio::test]
    async fn happy_path_uses_outline_and_elaborations() {
        let p = ScriptedProvider::new();
        p.push_complete(Script::reply(outline_json(&[("Vertices", 0), ("Edges", 1), ("Paths", 2)])));
        for body in ["body 0", "body 1", "body 2"] {
            p.push_complete(Script::reply(body));
        }

        let draft = synth(&p, 1).synthesize("Graphs", Length::Short, Complexity::Beginner).await;
        assert_contiguous(&draft, 3);
        assert_eq!(draft.title, "Graphs");
        assert_eq!(draft.units[1].title, "Edges");
        assert_eq!(draft.units[2].body, "body 2");
        assert_eq!(draft.originating_prompt, "Graphs");
        assert_eq!(p.requests().len(), 4);
    }

    #[tokio::test]
    async fn structure_failure_skips_elaboration() {
        let p = ScriptedProvider::new();
        p.push_complete(Script::reply("I'd love to help with that!"));

        let draft = synth(&p, 1).synthesize("Graph Theory", Length::Long, Complexity::Advanced).await;
        assert_contiguous(&draft, 7);
        assert_eq!(p.requests().len(), 1);
        assert!(draft.title.contains("Graph Theory"));
    }

    #[tokio::test]
    async fn single_unit_failure_gets_template_body() {
        let p = ScriptedProvider::new();
        p.push_complete(Script::reply(outline_json(&[("A", 0), ("B", 1), ("C", 2), ("D", 3), ("E", 4)])));
        p.push_complete(Script::reply("body A"));
        p.push_complete(Script::fail("timeout"));
        p.push_complete(Script::reply("body C"));
        p.push_complete(Script::reply("   "));
        p.push_complete(Script::reply("body E"));

        let draft = synth(&p, 1).synthesize("Letters", Length::Medium, Complexity::Intermediate).await;
        assert_contiguous(&draft, 5);
        assert_eq!(draft.units[0].body, "body A");
        assert!(draft.units[1].body.contains("Letters"));
        assert!(draft.units[1].body.contains("intermediate"));
        assert_eq!(draft.units[2].body, "body C");
        assert!(draft.units[3].body.contains("D"));
        assert_eq!(draft.units[4].body, "body E");
    }

    #[tokio::test]
    async fn bounded_parallel_elaboration_keeps_order() {
        let p = ScriptedProvider::new();
        p.push_complete(Script::reply(outline_json(&[("A", 0), ("B", 1), ("C", 2)])));
        for body in ["first", "second", "third"] {
            p.push_complete(Script::reply(body));
        }
        let draft = synth(&p, 3).synthesize("t", Length::Short, Complexity::Beginner).await;
        assert_contiguous(&draft, 3);
        let mut bodies: Vec<&str> = draft.units.iter().map(|u| u.body.as_str()).collect();
        bodies.sort();
        assert_eq!(bodies, vec!["first", "second", "third"]);
    }
}
