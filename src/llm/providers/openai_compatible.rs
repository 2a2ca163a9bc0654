//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Covers `complete` (one JSON response) and `stream` (`"stream": true`,
//! server-sent events of `chat.completion.chunk` objects terminated by
//! `data: [DONE]`). All OpenAI wire types are private to this module;
//! callers never see them.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::{StreamExt, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::{ChatMessage, GenerationOptions, LlmResponse, ProviderError, TextStream};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…),
/// and hosted alternatives. Constructed once at startup, then cheaply cloned
/// because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `timeout_seconds` bounds connection setup and each read; a long stream
    /// that keeps delivering fragments is not cut off.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeout_seconds))
            .read_timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<LlmResponse, ProviderError> {
        let payload = self.request_body(messages, options, false);
        let response = self.send(&payload).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        match &parsed.usage {
            Some(u) => debug!(
                choices = parsed.choices.len(),
                input_tokens = u.prompt_tokens,
                output_tokens = u.completion_tokens,
                "received LLM response"
            ),
            None => debug!(choices = parsed.choices.len(), "received LLM response"),
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))?;

        Ok(LlmResponse { text })
    }

    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, ProviderError> {
        let payload = self.request_body(messages, options, true);
        let response = self.send(&payload).await?;
        let events = Box::pin(response.bytes_stream().eventsource());

        // State is `None` once the stream has ended or failed.
        let fragments = stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            loop {
                match events.next().await {
                    None => {
                        let e = ProviderError::Stream("stream closed before [DONE]".into());
                        return Some((Err(e), None));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "SSE transport error");
                        return Some((Err(ProviderError::Stream(e.to_string())), None));
                    }
                    Some(Ok(event)) => {
                        trace!(data = %event.data, "SSE event");
                        if event.data == "[DONE]" {
                            return None;
                        }
                        match parse_chunk(&event.data) {
                            Ok(Some(text)) => return Some((Ok(text), Some(events))),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), None)),
                        }
                    }
                }
            }
        });

        Ok(Box::pin(fragments))
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &GenerationOptions,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(options.temperature.unwrap_or(self.temperature))
        };

        ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens: options.max_tokens,
            response_format: options.structured.then_some(ResponseFormat { kind: "json_object" }),
            stream,
        }
    }

    async fn send(&self, payload: &ChatCompletionRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            structured = payload.response_format.is_some(),
            stream = payload.stream,
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        check_status(response).await
    }
}

/// Extract the text delta from one `chat.completion.chunk` payload.
///
/// `Ok(None)` for keep-alive or role-only chunks that carry no text.
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("SSE parsing error: {e}, data: {data}")))?;

    if let Some(err) = chunk.error {
        return Err(ProviderError::Stream(format!("SSE API error: {}", err.message)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "http://127.0.0.1:1/v1/chat/completions".into(),
            model.into(),
            0.2,
            1,
            None,
        )
        .unwrap()
    }

    #[test]
    fn structured_request_sets_json_response_format() {
        let p = provider("gpt-4o-mini");
        let msgs = [ChatMessage::user("hi")];
        let options = GenerationOptions { temperature: Some(0.5), ..GenerationOptions::json(300) };
        let body = serde_json::to_value(p.request_body(&msgs, &options, false)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["temperature"], 0.5);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn stream_request_sets_flag_and_falls_back_to_configured_temperature() {
        let p = provider("gpt-4o-mini");
        let msgs = [ChatMessage::user("hi")];
        let body = serde_json::to_value(p.request_body(&msgs, &GenerationOptions::default(), true)).unwrap();
        assert_eq!(body["stream"], true);
        assert!(body.get("response_format").is_none());
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn configured_temperature_reaches_request_body() {
        let p = OpenAiCompatibleProvider::new(
            "http://127.0.0.1:1/v1/chat/completions".into(),
            "gpt-4o-mini".into(),
            0.1,
            1,
            None,
        )
        .unwrap();
        let msgs = [ChatMessage::user("hi")];
        for options in [GenerationOptions::text(800), GenerationOptions::json(400)] {
            let body = serde_json::to_value(p.request_body(&msgs, &options, false)).unwrap();
            assert!((body["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        }
    }

    #[test]
    fn gpt5_models_omit_temperature() {
        let p = provider("gpt-5-mini");
        let msgs = [ChatMessage::user("hi")];
        let body = serde_json::to_value(p.request_body(&msgs, &GenerationOptions::text(10), false)).unwrap();
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parse_chunk_extracts_delta_content() {
        let data = r#"{"object":"chat.completion.chunk","choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_chunk(data).unwrap().as_deref(), Some("Hel"));
    }

    #[test]
    fn parse_chunk_skips_role_only_delta() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_chunk(data).unwrap(), None);
        assert_eq!(parse_chunk(r#"{"choices":[]}"#).unwrap(), None);
    }

    #[test]
    fn parse_chunk_surfaces_api_error() {
        let data = r#"{"error":{"message":"rate limited"}}"#;
        let err = parse_chunk(data).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn parse_chunk_rejects_garbage() {
        assert!(parse_chunk("not json").is_err());
    }
}
