//! Scripted LLM provider — replays queued replies in order.
//!
//! Two independent queues: one consumed by `complete`, one by `stream`. Chat
//! turns stream while follow-up and curriculum synthesis complete, so a test
//! can script each path without the detached follow-up task stealing a reply
//! meant for the next chat turn. An exhausted queue fails the call.
//!
//! Every request is recorded and can be inspected with [`ScriptedProvider::requests`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{StreamExt, stream};

use crate::llm::{ChatMessage, GenerationOptions, LlmResponse, ProviderError, TextStream};

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum Script {
    /// Full reply; streamed as a single fragment.
    Reply(String),
    /// Reply delivered as these fragments (concatenated for `complete`).
    Fragments(Vec<String>),
    /// Emits the fragments, then fails mid-stream (`complete` fails outright).
    FailAfter(Vec<String>, String),
    /// Request fails before any output.
    Fail(String),
}

impl Script {
    pub fn reply(text: impl Into<String>) -> Self {
        Script::Reply(text.into())
    }

    pub fn fragments<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Fragments(parts.into_iter().map(Into::into).collect())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Script::Fail(message.into())
    }
}

/// A recorded provider call.
#[derive(Debug, Clone)]
pub struct ScriptedRequest {
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    pub streamed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    complete: VecDeque<Script>,
    stream: VecDeque<Script>,
    requests: Vec<ScriptedRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    inner: Arc<Mutex<Inner>>,
    fragment_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before each streamed fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Queue an outcome for the next `complete` call.
    pub fn push_complete(&self, script: Script) -> &Self {
        self.lock().complete.push_back(script);
        self
    }

    /// Queue an outcome for the next `stream` call.
    pub fn push_stream(&self, script: Script) -> &Self {
        self.lock().stream.push_back(script);
        self
    }

    pub fn requests(&self) -> Vec<ScriptedRequest> {
        self.lock().requests.clone()
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<LlmResponse, ProviderError> {
        match self.next(messages, options, false)? {
            Script::Reply(text) => Ok(LlmResponse { text }),
            Script::Fragments(parts) => Ok(LlmResponse { text: parts.concat() }),
            Script::FailAfter(_, message) | Script::Fail(message) => Err(ProviderError::Request(message)),
        }
    }

    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, ProviderError> {
        let items: Vec<Result<String, ProviderError>> = match self.next(messages, options, true)? {
            Script::Reply(text) => vec![Ok(text)],
            Script::Fragments(parts) => parts.into_iter().map(Ok).collect(),
            Script::FailAfter(parts, message) => parts
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(ProviderError::Stream(message))))
                .collect(),
            Script::Fail(message) => return Err(ProviderError::Request(message)),
        };

        match self.fragment_delay {
            Some(delay) => Ok(Box::pin(stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))),
            None => Ok(Box::pin(stream::iter(items))),
        }
    }

    fn next(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        streamed: bool,
    ) -> Result<Script, ProviderError> {
        let mut inner = self.lock();
        inner.requests.push(ScriptedRequest {
            messages: messages.to_vec(),
            options: *options,
            streamed,
        });
        let queue = if streamed { &mut inner.stream } else { &mut inner.complete };
        queue
            .pop_front()
            .ok_or_else(|| ProviderError::Request("script exhausted".into()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge every later call.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
