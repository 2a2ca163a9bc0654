//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities; clone them freely.
//! Two call shapes are exposed:
//!
//! - [`LlmProvider::complete`]: one round-trip, full text back.
//! - [`LlmProvider::stream`]: a [`TextStream`] of fragments that ends when
//!   the backend signals completion. Dropping the stream aborts the request.

pub mod providers;

use std::pin::Pin;

use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider stream failed: {0}")]
    Stream(String),
}

// ── Request / response types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a provider request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Per-call sampling knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationOptions {
    /// `None` uses the provider's configured temperature.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the backend for a strict JSON object response.
    pub structured: bool,
}

impl GenerationOptions {
    /// Free text at the provider's configured temperature.
    pub fn text(max_tokens: u32) -> Self {
        Self { temperature: None, max_tokens: Some(max_tokens), structured: false }
    }

    /// A strict JSON object at the provider's configured temperature.
    pub fn json(max_tokens: u32) -> Self {
        Self { structured: true, ..Self::text(max_tokens) }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
}

/// Incremental text fragments. Ends with `None` on success; an `Err` item is
/// terminal.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new match arms.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// Configuration name of the active backend.
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai-compatible",
            LlmProvider::Scripted(_) => "scripted",
        }
    }

    /// Send `messages` and return the full reply.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(messages, options).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(messages, options).await,
            LlmProvider::Scripted(p) => p.complete(messages, options).await,
        }
    }

    /// Send `messages` and return the reply as a fragment stream.
    ///
    /// An `Err` here means the request never started; errors after the first
    /// fragment arrive as stream items.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.stream(messages, options).await,
            LlmProvider::OpenAiCompatible(p) => p.stream(messages, options).await,
            LlmProvider::Scripted(p) => p.stream(messages, options).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_options_are_structured() {
        let o = GenerationOptions::json(500);
        assert!(o.structured);
        assert_eq!(o.max_tokens, Some(500));
        assert_eq!(o.temperature, None);
        assert!(!GenerationOptions::text(500).structured);
    }

    #[test]
    fn message_role_serializes_lowercase() {
        let m = ChatMessage::system("be brief");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "system");
        assert_eq!(v["content"], "be brief");
    }

    #[tokio::test]
    async fn provider_name_matches_variant() {
        let p = LlmProvider::Dummy(providers::dummy::DummyProvider);
        assert_eq!(p.name(), "dummy");
        let reply = p.complete(&[ChatMessage::user("hi")], &GenerationOptions::default()).await;
        assert!(reply.is_ok());
    }
}
