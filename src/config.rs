use crate::llm::friendli::{self, ExaoneConfig};
use crate::llm::openai::{self, OpenAiConfig};
use crate::llm::{Provider, ProviderKind};
use std::time::Duration;

pub const OPENAI_API_KEY_VAR: &str = "OPEN_AI_API";
pub const OPENAI_BASE_URL_VAR: &str = "OPENAI_BASE_URL";
pub const EXAONE_API_KEY_VAR: &str = "EXAONE_API";
pub const EXAONE_MODEL_ID_VAR: &str = "EXAONE_MODEL_ID";
pub const EXAONE_BASE_URL_VAR: &str = "EXAONE_BASE_URL";

/// Credentials and endpoints for both backends.
#[derive(Clone, Default)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub exaone_api_key: Option<String>,
    pub exaone_model_id: Option<String>,
    pub exaone_base_url: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Settings {
    /// Read settings from the process environment. Blank values count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            openai_api_key: get(OPENAI_API_KEY_VAR),
            openai_base_url: get(OPENAI_BASE_URL_VAR),
            exaone_api_key: get(EXAONE_API_KEY_VAR),
            exaone_model_id: get(EXAONE_MODEL_ID_VAR),
            exaone_base_url: get(EXAONE_BASE_URL_VAR),
            request_timeout: None,
        }
    }

    /// Build the backend configuration for `kind`. Missing credentials are
    /// left blank and caught by the pre-send guard.
    pub fn backend(&self, kind: ProviderKind) -> Provider {
        match kind {
            ProviderKind::OpenAi => Provider::OpenAi(OpenAiConfig {
                api_key: self.openai_api_key.clone().unwrap_or_default(),
                base_url: self
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
            }),
            ProviderKind::Exaone => Provider::Exaone(ExaoneConfig {
                api_key: self.exaone_api_key.clone().unwrap_or_default(),
                model_id: self.exaone_model_id.clone().unwrap_or_default(),
                base_url: self
                    .exaone_base_url
                    .clone()
                    .unwrap_or_else(|| friendli::DEFAULT_BASE_URL.to_string()),
            }),
        }
    }

    /// Settings for display, with API keys masked.
    pub fn masked(&self) -> Vec<(&'static str, String)> {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "(not set)".into());
        let secret = |value: &Option<String>| {
            value
                .as_deref()
                .map(mask_secret)
                .unwrap_or_else(|| "(not set)".into())
        };
        vec![
            ("openai_api_key", secret(&self.openai_api_key)),
            ("openai_base_url", show(&self.openai_base_url)),
            ("exaone_api_key", secret(&self.exaone_api_key)),
            ("exaone_model_id", show(&self.exaone_model_id)),
            ("exaone_base_url", show(&self.exaone_base_url)),
        ]
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Settings");
        for (key, value) in self.masked() {
            out.field(key, &value);
        }
        out.field("request_timeout", &self.request_timeout).finish()
    }
}

/// Keep the first and last four characters of long secrets.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}
