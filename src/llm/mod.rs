pub mod friendli;
pub mod openai;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed instruction wrapped around the document text on every request.
const SYSTEM_PROMPT_TEMPLATE: &str = "You are an assistant specialized in PDF documents. \
Answer the user's questions using only the text extracted from the PDF below, \
replying in the same language the user writes in. \
Do not speculate about anything that is not in the document.\n\n\
=== PDF CONTENT ===\n{pdf_text}\n=== END OF PDF ===";

pub(crate) const INVALID_API_KEY: &str = "⚠️ The API key is invalid.";
pub(crate) const RATE_LIMITED: &str =
    "⚠️ The API request limit has been exceeded. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A fully resolved completion request, ready for a transport.
#[derive(Clone)]
pub struct ChatRequest {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// The server could not be reached at all (connect failure or timeout).
    #[error("connection error: {0}")]
    Connect(String),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Client(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            LlmError::Connect(err.to_string())
        } else {
            LlmError::Client(err.to_string())
        }
    }
}

/// Upstream content deltas, possibly empty, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Issues one streaming completion request.
pub trait ChatTransport: Send + Sync {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<FragmentStream, LlmError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Exaone,
}

impl ProviderKind {
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Exaone => "exaone",
        }
    }

    /// Turn a backend failure into the text shown as the assistant's answer.
    pub fn describe_error(self, err: &LlmError) -> String {
        match self {
            ProviderKind::OpenAi => openai::describe_error(err),
            ProviderKind::Exaone => friendli::describe_error(err),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "exaone" | "friendli" => Ok(ProviderKind::Exaone),
            other => Err(format!("unknown provider: {other} (expected openai or exaone)")),
        }
    }
}

/// Backend selection together with its credentials.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(openai::OpenAiConfig),
    Exaone(friendli::ExaoneConfig),
}

impl Provider {
    pub fn openai(api_key: String) -> Self {
        Provider::OpenAi(openai::OpenAiConfig {
            api_key,
            base_url: openai::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn exaone(api_key: String, model_id: String) -> Self {
        Provider::Exaone(friendli::ExaoneConfig {
            api_key,
            model_id,
            base_url: friendli::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::OpenAi(_) => ProviderKind::OpenAi,
            Provider::Exaone(_) => ProviderKind::Exaone,
        }
    }

    /// Names the credentials still missing, if any.
    pub fn missing_credentials(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi(config) if config.api_key.trim().is_empty() => {
                Some("OpenAI API key")
            }
            Provider::Exaone(config)
                if config.api_key.trim().is_empty() || config.model_id.trim().is_empty() =>
            {
                Some("EXAONE API key and model ID")
            }
            _ => None,
        }
    }

    /// `[system instruction] ++ history`, with the provider's sampling settings.
    pub fn build_request(&self, document_text: &str, history: &[ChatMessage]) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::new(
            Role::System,
            render_instruction(document_text),
        ));
        messages.extend(history.iter().cloned());

        match self {
            Provider::OpenAi(config) => openai::build_request(config, messages),
            Provider::Exaone(config) => friendli::build_request(config, messages),
        }
    }

    /// Stream the answer to `history` as a lazy sequence of non-empty fragments.
    ///
    /// Never fails: a backend error becomes a single warning fragment and ends
    /// the stream. Dropping the stream early drops the upstream response.
    pub fn chat_stream<'a>(
        &self,
        transport: &'a dyn ChatTransport,
        document_text: &str,
        history: &[ChatMessage],
    ) -> BoxStream<'a, String> {
        let kind = self.kind();
        let request = self.build_request(document_text, history);
        tracing::debug!(
            provider = kind.name(),
            model = %request.model,
            turns = history.len(),
            "sending chat request"
        );

        stream::unfold(
            ChatState::Sent { transport, request },
            move |state| async move {
                let mut state = state;
                loop {
                    state = match state {
                        ChatState::Sent { transport, request } => {
                            match transport.open(&request).await {
                                Ok(upstream) => ChatState::Streaming(upstream),
                                Err(err) => return Some((fail(kind, &err), ChatState::Done)),
                            }
                        }
                        ChatState::Streaming(mut upstream) => match upstream.next().await {
                            Some(Ok(fragment)) if fragment.is_empty() => {
                                ChatState::Streaming(upstream)
                            }
                            Some(Ok(fragment)) => {
                                return Some((fragment, ChatState::Streaming(upstream)))
                            }
                            Some(Err(err)) => return Some((fail(kind, &err), ChatState::Done)),
                            None => return None,
                        },
                        ChatState::Done => return None,
                    };
                }
            },
        )
        .boxed()
    }
}

enum ChatState<'a> {
    Sent {
        transport: &'a dyn ChatTransport,
        request: ChatRequest,
    },
    Streaming(FragmentStream),
    Done,
}

fn fail(kind: ProviderKind, err: &LlmError) -> String {
    tracing::warn!(provider = kind.name(), error = %err, "chat request failed");
    kind.describe_error(err)
}

pub fn render_instruction(document_text: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{pdf_text}", document_text)
}

pub(crate) fn api_error(status: u16, message: &str) -> String {
    format!("⚠️ API error ({status}): {message}")
}

pub(crate) fn client_error(message: &str) -> String {
    format!("⚠️ API error: {message}")
}
