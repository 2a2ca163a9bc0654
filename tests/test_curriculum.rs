//! Curriculum synthesis through the `Tutor` facade.

use std::sync::Arc;

use mentora::config::ChatConfig;
use mentora::llm::LlmProvider;
use mentora::llm::providers::dummy::DummyProvider;
use mentora::llm::providers::scripted::{Script, ScriptedProvider};
use mentora::model::{Complexity, Curriculum, Length};
use mentora::store::StoreHandle;
use mentora::store::local::LocalStore;
use mentora::tutor::Tutor;
use mentora::tutor::prompt::PromptComposer;

fn tutor(provider: LlmProvider) -> Tutor {
    Tutor::from_parts(
        StoreHandle::new(Arc::new(LocalStore::new())),
        provider,
        PromptComposer::default(),
        ChatConfig::default(),
        1,
    )
}

fn outline(n: usize) -> String {
    let units: Vec<serde_json::Value> = (0..n)
        .map(|i| serde_json::json!({ "name": format!("Unit {i}"), "overview": format!("Overview {i}"), "order": i }))
        .collect();
    serde_json::json!({ "title": "Graph Theory", "description": "Vertices and edges.", "units": units }).to_string()
}

fn assert_well_formed(c: &Curriculum, n: usize) {
    assert_eq!(c.units.len(), n);
    for (i, u) in c.units.iter().enumerate() {
        assert_eq!(u.order, i as u32);
        assert!(!u.complete);
        assert!(!u.title.trim().is_empty());
        assert!(!u.overview.trim().is_empty());
        assert!(!u.body.trim().is_empty());
    }
}

#[tokio::test]
async fn unit_counts_follow_length_tiers() {
    for (length, n) in [(Length::Short, 3), (Length::Medium, 5), (Length::Long, 7)] {
        let provider = ScriptedProvider::new();
        provider.push_complete(Script::reply(outline(n)));
        for i in 0..n {
            provider.push_complete(Script::reply(format!("Lesson text {i}.")));
        }

        let c = tutor(LlmProvider::Scripted(provider.clone()))
            .create_curriculum("u1", "Graph Theory", Some(length), Some(Complexity::Intermediate))
            .await
            .unwrap();
        assert_well_formed(&c, n);
        assert_eq!(c.title, "Graph Theory");
        assert_eq!(c.units[0].overview, "Overview 0");
        assert_eq!(provider.requests().len(), n + 1);
    }
}

#[tokio::test]
async fn graph_theory_fallback_when_generation_fails() {
    let provider = ScriptedProvider::new();
    provider.push_complete(Script::fail("model unavailable"));

    let c = tutor(LlmProvider::Scripted(provider))
        .create_curriculum("u1", "Graph Theory", Some(Length::Short), Some(Complexity::Beginner))
        .await
        .unwrap();

    assert_well_formed(&c, 3);
    for u in &c.units {
        assert!(u.overview.contains("Graph Theory"));
        assert!(u.body.contains("Graph Theory"));
    }
    assert!(c.title.contains("Graph Theory"));
    assert_eq!(c.progress(), 0.0);
}

#[tokio::test]
async fn malformed_outline_uses_fallback() {
    let c = tutor(LlmProvider::Dummy(DummyProvider))
        .create_curriculum("u1", "Linear Algebra", Some(Length::Long), None)
        .await
        .unwrap();
    assert_well_formed(&c, 7);
    assert!(c.units[6].body.contains("Linear Algebra"));
}

#[tokio::test]
async fn single_unit_failure_keeps_the_rest() {
    let provider = ScriptedProvider::new();
    provider.push_complete(Script::reply(outline(5)));
    provider.push_complete(Script::reply("Lesson 0."));
    provider.push_complete(Script::reply("Lesson 1."));
    provider.push_complete(Script::fail("rate limited"));
    provider.push_complete(Script::reply("Lesson 3."));
    provider.push_complete(Script::reply("Lesson 4."));

    let c = tutor(LlmProvider::Scripted(provider))
        .create_curriculum("u1", "Graph Theory", Some(Length::Medium), Some(Complexity::Advanced))
        .await
        .unwrap();

    assert_well_formed(&c, 5);
    assert_eq!(c.units[0].body, "Lesson 0.");
    assert!(c.units[2].body.contains("Unit 2"));
    assert!(c.units[2].body.contains("advanced"));
    assert_eq!(c.units[4].body, "Lesson 4.");
}

#[tokio::test]
async fn short_outline_is_padded_to_target() {
    let provider = ScriptedProvider::new();
    provider.push_complete(Script::reply(outline(2)));

    // Elaboration calls run out of script and fall back per unit.
    let c = tutor(LlmProvider::Scripted(provider))
        .create_curriculum("u1", "Graph Theory", Some(Length::Medium), None)
        .await
        .unwrap();
    assert_well_formed(&c, 5);
    assert_eq!(c.units[1].title, "Unit 1");
}
