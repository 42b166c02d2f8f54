//! EXAONE served from a Friendli AI dedicated endpoint.

use super::openai::completions_url;
use super::{
    api_error, client_error, ChatMessage, ChatRequest, LlmError, INVALID_API_KEY, RATE_LIMITED,
};

pub const DEFAULT_BASE_URL: &str = "https://api.friendli.ai/dedicated/v1";
const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 512;

pub const CONNECTION_FAILED: &str =
    "⚠️ Cannot reach the EXAONE server. Please check your network connection.";
pub const ENDPOINT_INACTIVE: &str =
    "⚠️ The EXAONE endpoint is inactive. Wake the endpoint from the Friendli AI console.";
pub const MODEL_NOT_FOUND: &str = "⚠️ The model ID does not exist.";

#[derive(Debug, Clone)]
pub struct ExaoneConfig {
    pub api_key: String,
    pub model_id: String,
    pub base_url: String,
}

pub fn build_request(config: &ExaoneConfig, messages: Vec<ChatMessage>) -> ChatRequest {
    ChatRequest {
        url: completions_url(&config.base_url),
        api_key: config.api_key.clone(),
        model: config.model_id.trim().to_string(),
        messages,
        temperature: TEMPERATURE,
        max_tokens: Some(MAX_TOKENS),
    }
}

/// A sleeping dedicated endpoint answers with a 500, and an unknown
/// deployment id with a 404.
pub fn describe_error(err: &LlmError) -> String {
    match err {
        LlmError::Connect(_) => CONNECTION_FAILED.to_string(),
        LlmError::Api { status: 500, .. } => ENDPOINT_INACTIVE.to_string(),
        LlmError::Api { status: 401, .. } => INVALID_API_KEY.to_string(),
        LlmError::Api { status: 404, .. } => MODEL_NOT_FOUND.to_string(),
        LlmError::Api { status: 429, .. } => RATE_LIMITED.to_string(),
        LlmError::Api { status, message } => api_error(*status, message),
        LlmError::Client(message) => client_error(message),
    }
}
