pub mod config;
pub mod doc_processor;
pub mod llm;
pub mod session;

pub use config::Settings;
pub use doc_processor::ExtractionError;
pub use llm::openai::HttpTransport;
pub use llm::{ChatMessage, ChatTransport, LlmError, Provider, ProviderKind, Role};
pub use session::{DocumentContext, Session, SessionError};
