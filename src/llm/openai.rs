//! OpenAI chat completions, and the OpenAI-compatible HTTP wire shared by
//! every provider.

use super::{
    api_error, client_error, ChatMessage, ChatRequest, ChatTransport, FragmentStream, LlmError,
    INVALID_API_KEY, RATE_LIMITED,
};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const MODEL: &str = "gpt-4.1-mini";
const TEMPERATURE: f64 = 0.3;

pub const CONNECTION_FAILED: &str =
    "⚠️ Cannot reach the OpenAI server. Please check your network connection.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

pub fn build_request(config: &OpenAiConfig, messages: Vec<ChatMessage>) -> ChatRequest {
    ChatRequest {
        url: completions_url(&config.base_url),
        api_key: config.api_key.clone(),
        model: MODEL.to_string(),
        messages,
        temperature: TEMPERATURE,
        max_tokens: None,
    }
}

pub fn describe_error(err: &LlmError) -> String {
    match err {
        LlmError::Connect(_) => CONNECTION_FAILED.to_string(),
        LlmError::Api { status: 401, .. } => INVALID_API_KEY.to_string(),
        LlmError::Api { status: 429, .. } => RATE_LIMITED.to_string(),
        LlmError::Api { status, message } => api_error(*status, message),
        LlmError::Client(message) => client_error(message),
    }
}

pub(crate) fn completions_url(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    if base_url.ends_with("/chat/completions") {
        base_url.to_string()
    } else {
        format!("{}/chat/completions", base_url)
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiErrorBody>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorBody,
}

#[derive(Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

/// Streams completions over HTTP with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// A transport whose requests give up after `timeout`; a timeout is
    /// reported as a connection failure.
    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self, LlmError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::new(builder.build()?))
    }
}

impl ChatTransport for HttpTransport {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<FragmentStream, LlmError>> {
        async move {
            let body = OpenAiRequest {
                model: &request.model,
                messages: &request.messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                stream: true,
            };

            let resp = self
                .client
                .post(&request.url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", request.api_key))
                .json(&body)
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                return Err(LlmError::Api {
                    status,
                    message: error_message(&text),
                });
            }

            Ok(sse_fragments(resp.bytes_stream()))
        }
        .boxed()
    }
}

/// Pull a human-readable message out of an error response body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<OpenAiErrorResponse>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits a byte stream into `data:` lines. Bytes are buffered until a full
/// line arrives so multi-byte characters split across chunks survive.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

/// Content delta carried by one `data:` payload. Unparseable payloads are skipped.
fn parse_data(data: &str) -> Option<Result<String, LlmError>> {
    let parsed = serde_json::from_str::<OpenAiStreamResponse>(data).ok()?;
    if let Some(error) = parsed.error {
        return Some(Err(LlmError::Client(error.message)));
    }
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map(Ok)
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn accept(&mut self, event: SseEvent) {
        if self.finished {
            return;
        }
        match event {
            SseEvent::Done => self.finished = true,
            SseEvent::Data(data) => {
                if let Some(item) = parse_data(&data) {
                    self.pending.push_back(item);
                }
            }
        }
    }
}

fn sse_fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<LlmError> + Send,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for event in state.decoder.push(chunk.as_ref()) {
                        state.accept(event);
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    if let Some(event) = state.decoder.finish() {
                        state.accept(event);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
