//! Dummy LLM provider — echoes the last user message back prefixed with `[echo]`.
//! Used for running the full chat round-trip without a real API key.
//!
//! Structured requests get the echo too, which is not JSON, so follow-up and
//! curriculum synthesis take their fallback paths under this provider.

use futures_util::stream;

use crate::llm::{ChatMessage, GenerationOptions, LlmResponse, MessageRole, ProviderError, TextStream};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &GenerationOptions,
    ) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse { text: echo(messages) })
    }

    /// Streams the echo word by word, keeping the separating whitespace.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        _options: &GenerationOptions,
    ) -> Result<TextStream, ProviderError> {
        let text = echo(messages);
        let fragments: Vec<Result<String, ProviderError>> =
            text.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();
        Ok(Box::pin(stream::iter(fragments)))
    }
}

fn echo(messages: &[ChatMessage]) -> String {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    format!("[echo] {last_user}")
}
