//! End-to-end chat turns through the `Tutor` facade with a scripted provider.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mentora::config::{ChatConfig, Config};
use mentora::error::TutorError;
use mentora::llm::LlmProvider;
use mentora::llm::providers;
use mentora::llm::providers::scripted::{Script, ScriptedProvider};
use mentora::model::{Length, Role};
use mentora::store::StoreHandle;
use mentora::store::local::LocalStore;
use mentora::tutor::Tutor;
use mentora::tutor::chat::{ChatEvent, ChatRequest};
use mentora::tutor::followup::fallback_questions;
use mentora::tutor::prompt::PromptComposer;

async fn setup(provider: &ScriptedProvider, follow_up_count: usize) -> (Arc<Tutor>, String) {
    let tutor = Tutor::from_parts(
        StoreHandle::new(Arc::new(LocalStore::new())),
        LlmProvider::Scripted(provider.clone()),
        PromptComposer::default(),
        ChatConfig { follow_up_count, ..ChatConfig::default() },
        1,
    );
    // No complete() script queued: the curriculum comes from the fallback path.
    let curriculum = tutor
        .create_curriculum("learner-1", "Graph Theory", Some(Length::Short), None)
        .await
        .unwrap();
    (Arc::new(tutor), curriculum.units[0].conversation_id.clone())
}

async fn generate(
    tutor: &Tutor,
    conversation_id: &str,
    message: &str,
) -> (Result<mentora::tutor::chat::ChatOutcome, TutorError>, Vec<ChatEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let result = tutor
        .generate(ChatRequest::user(conversation_id, "learner-1", message), &tx, &CancellationToken::new())
        .await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    (result, events)
}

async fn seed_turns(tutor: &Tutor, conversation_id: &str, n: usize) {
    for i in 0..n {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        tutor.append_turn(conversation_id, role, &format!("seed {i}")).await.unwrap();
    }
}

#[tokio::test]
async fn completion_equals_concatenated_chunks() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 0).await;
    provider.push_stream(Script::fragments(["A graph ", "is a set of ", "vertices and edges."]));

    let (result, events) = generate(&tutor, &conv, "What is a graph?").await;
    result.unwrap();

    let chunks: String = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Chunk { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    let terminals: Vec<&ChatEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    assert!(matches!(terminals[0], ChatEvent::Complete { message, .. } if *message == chunks));
    assert!(events.last().unwrap().is_terminal());

    let turns = tutor.get_turns(&conv).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "What is a graph?");
    assert_eq!(turns[1].content, chunks);
}

#[tokio::test]
async fn mid_stream_failure_emits_one_error_and_persists_nothing() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 0).await;
    provider.push_stream(Script::FailAfter(vec!["Partial ".into(), "answer".into()], "connection reset".into()));

    let (result, events) = generate(&tutor, &conv, "Explain trees").await;
    assert!(matches!(result, Err(TutorError::Generation(_))));

    let terminals: Vec<&ChatEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    assert!(matches!(terminals[0], ChatEvent::Error { .. }));
    assert!(tutor.get_turns(&conv).await.unwrap().is_empty());
}

#[tokio::test]
async fn ninety_nine_turns_allow_one_last_exchange() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 0).await;
    seed_turns(&tutor, &conv, 99).await;

    provider.push_stream(Script::reply("Last answer."));
    let (result, _) = generate(&tutor, &conv, "One more question").await;
    let outcome = result.unwrap();
    assert_eq!(outcome.turns.last().unwrap().sequence, 100);
    assert_eq!(tutor.get_turns(&conv).await.unwrap().len(), 101);

    provider.push_stream(Script::reply("never sent"));
    let (result, events) = generate(&tutor, &conv, "And another").await;
    assert!(matches!(result, Err(TutorError::QuotaExceeded { max: 100 })));
    assert!(matches!(events.as_slice(), [ChatEvent::Error { .. }]));
    assert_eq!(tutor.get_turns(&conv).await.unwrap().len(), 101);

    let err = tutor.append_turn(&conv, Role::User, "sneaky").await.unwrap_err();
    assert!(matches!(err, TutorError::QuotaExceeded { .. }));
}

#[tokio::test]
async fn concurrent_generates_never_collide() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 0).await;
    for _ in 0..4 {
        provider.push_stream(Script::fragments(["same ", "reply"]));
    }

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let tutor = Arc::clone(&tutor);
            let conv = conv.clone();
            tokio::spawn(async move { generate(&tutor, &conv, &format!("question {i}")).await.0 })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let turns = tutor.get_turns(&conv).await.unwrap();
    assert_eq!(turns.len(), 8);
    for (i, pair) in turns.chunks(2).enumerate() {
        assert_eq!(pair[0].sequence, 2 * i as u64);
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn concurrent_generates_at_the_cap_overshoot_by_one_exchange_at_most() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 0).await;
    seed_turns(&tutor, &conv, 99).await;
    provider.push_stream(Script::reply("first"));
    provider.push_stream(Script::reply("second"));

    let a = {
        let (tutor, conv) = (Arc::clone(&tutor), conv.clone());
        tokio::spawn(async move { generate(&tutor, &conv, "a").await.0 })
    };
    let b = {
        let (tutor, conv) = (Arc::clone(&tutor), conv.clone());
        tokio::spawn(async move { generate(&tutor, &conv, "b").await.0 })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(TutorError::QuotaExceeded { .. }))));
    assert_eq!(tutor.get_turns(&conv).await.unwrap().len(), 101);
}

#[tokio::test]
async fn follow_ups_fall_back_to_exactly_count_questions() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 3).await;
    provider.push_stream(Script::reply("Paths connect vertices."));
    provider.push_complete(Script::reply("not json at all"));

    let (result, _) = generate(&tutor, &conv, "What is a path?").await;
    result.unwrap().follow_ups.expect("follow-ups enabled").await.unwrap();

    let set = tutor.follow_ups(&conv).await.unwrap().unwrap();
    assert_eq!(set.questions, fallback_questions(3));
    assert_eq!(set.generated_at_turn, 2);
}

#[tokio::test]
async fn later_turn_supersedes_follow_ups() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 2).await;

    provider.push_stream(Script::reply("first answer"));
    provider.push_complete(Script::reply(r#"{"questions": ["old 1?", "old 2?"]}"#));
    let (first, _) = generate(&tutor, &conv, "first").await;
    first.unwrap().follow_ups.unwrap().await.unwrap();

    provider.push_stream(Script::reply("second answer"));
    provider.push_complete(Script::reply(r#"{"questions": ["new 1?", "new 2?", "extra?"]}"#));
    let (second, _) = generate(&tutor, &conv, "second").await;
    second.unwrap().follow_ups.unwrap().await.unwrap();

    let set = tutor.follow_ups(&conv).await.unwrap().unwrap();
    assert_eq!(set.questions, vec!["new 1?", "new 2?"]);
    assert_eq!(set.generated_at_turn, 4);
}

#[tokio::test]
async fn dummy_provider_echoes_through_configured_tutor() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::test_default(dir.path());
    let provider = providers::build(&config.llm, None).unwrap();
    let tutor = Tutor::new(StoreHandle::new(Arc::new(LocalStore::new())), provider, &config);

    let curriculum = tutor.create_curriculum("learner-1", "Topology", None, None).await.unwrap();
    assert_eq!(curriculum.units.len(), 5);
    let conv = curriculum.units[0].conversation_id.clone();

    let (result, events) = generate(&tutor, &conv, "open sets").await;
    let outcome = result.unwrap();
    assert_eq!(outcome.reply, "[echo] open sets");
    assert!(matches!(events.last(), Some(ChatEvent::Complete { .. })));

    // Default config asks for three follow-ups; the echo is not JSON.
    outcome.follow_ups.unwrap().await.unwrap();
    assert_eq!(tutor.follow_ups(&conv).await.unwrap().unwrap().questions.len(), 3);
}

#[tokio::test]
async fn provider_calls_leave_temperature_to_configuration() {
    let provider = ScriptedProvider::new();
    let (tutor, conv) = setup(&provider, 2).await;
    provider.push_stream(Script::reply("An edge joins two vertices."));
    provider.push_complete(Script::reply(r#"{"questions": ["a?", "b?"]}"#));

    let (result, _) = generate(&tutor, &conv, "What is an edge?").await;
    result.unwrap().follow_ups.unwrap().await.unwrap();

    let requests = provider.requests();
    // Curriculum structure, chat stream and follow-ups.
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.options.temperature.is_none()));
}
