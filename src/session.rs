use crate::doc_processor::{self, ExtractionError};
use crate::llm::{ChatMessage, ChatTransport, Provider, Role};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The single active document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    pub name: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("upload a PDF document before asking questions")]
    NoDocument,
    #[error("please enter the {0}")]
    MissingCredentials(&'static str),
    #[error("system instructions are rendered per request and cannot be stored as a turn")]
    SystemTurn,
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Conversation state for one document: the document plus the user/assistant turns.
#[derive(Debug, Default)]
pub struct Session {
    document: Option<DocumentContext>,
    history: Vec<ChatMessage>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> Option<&DocumentContext> {
        self.document.as_ref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn append_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), SessionError> {
        if role == Role::System {
            return Err(SessionError::SystemTurn);
        }
        self.history.push(ChatMessage::new(role, content));
        Ok(())
    }

    /// Clear the conversation, keeping the document.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn replace_document(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.document = Some(DocumentContext {
            name: name.into(),
            text: text.into(),
        });
        self.reset();
    }

    /// Extract `bytes` and make it the active document. On failure the
    /// previous document and history are left as they were. A PDF without
    /// text still replaces the document; `check_ready` then refuses to chat.
    pub fn load_document(
        &mut self,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<&DocumentContext, SessionError> {
        let text = doc_processor::extract(bytes)?;
        Ok(self.install(name.into(), text))
    }

    /// Like [`Session::load_document`], reading the PDF from disk. The file
    /// name becomes the document name.
    pub fn load_file(&mut self, path: &Path) -> Result<&DocumentContext, SessionError> {
        let text = doc_processor::extract_file(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.install(name, text))
    }

    fn install(&mut self, name: String, text: String) -> &DocumentContext {
        tracing::info!(document = %name, chars = text.chars().count(), "loaded document");
        self.history.clear();
        self.document.insert(DocumentContext { name, text })
    }

    /// Guard run before every request: a document must be loaded and the
    /// selected backend must have its credentials.
    pub fn check_ready(&self, provider: &Provider) -> Result<&DocumentContext, SessionError> {
        ready_document(&self.document, provider)
    }

    /// Ask `prompt` about the active document.
    ///
    /// Fragments are handed to `on_fragment` as they arrive; the full answer is
    /// recorded as an assistant turn and returned. Backend failures arrive as
    /// the answer text, so the only errors are the pre-send guard's.
    pub async fn respond(
        &mut self,
        transport: &dyn ChatTransport,
        provider: &Provider,
        prompt: &str,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<String, SessionError> {
        let document = ready_document(&self.document, provider)?;
        self.history.push(ChatMessage::user(prompt));

        let mut full_content = String::new();
        let mut stream = provider.chat_stream(transport, &document.text, &self.history);
        while let Some(fragment) = stream.next().await {
            on_fragment(&fragment);
            full_content.push_str(&fragment);
        }
        drop(stream);

        if full_content.is_empty() {
            tracing::warn!(provider = provider.kind().name(), "backend returned an empty response");
        }
        self.history.push(ChatMessage::assistant(full_content.clone()));
        Ok(full_content)
    }
}

fn ready_document<'d>(
    document: &'d Option<DocumentContext>,
    provider: &Provider,
) -> Result<&'d DocumentContext, SessionError> {
    let document = match document {
        Some(document) if !document.text.trim().is_empty() => document,
        _ => return Err(SessionError::NoDocument),
    };
    if let Some(missing) = provider.missing_credentials() {
        return Err(SessionError::MissingCredentials(missing));
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_processor::tests::build_pdf;
    use crate::llm::tests::{EchoSystemTransport, StubTransport};
    use crate::llm::LlmError;

    fn loaded() -> Session {
        let mut session = Session::new();
        session.replace_document("cats.pdf", "Cats are mammals.");
        session
    }

    fn openai() -> Provider {
        Provider::openai("sk-test".into())
    }

    #[test]
    fn test_load_document_starts_empty_history() {
        let mut session = Session::new();
        session.append_turn(Role::User, "stale").unwrap();

        let document = session
            .load_document("cats.pdf", &build_pdf(&["Cats are mammals."]))
            .unwrap();
        assert_eq!(document.name, "cats.pdf");
        assert!(document.text.contains("Cats are mammals."));
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_textless_pdf_replaces_document_but_blocks_chat() {
        let mut session = loaded();
        session.append_turn(Role::User, "question").unwrap();

        let document = session.load_document("scan.pdf", &build_pdf(&[""])).unwrap();
        assert_eq!(document.name, "scan.pdf");
        assert!(document.text.is_empty());
        assert!(session.history().is_empty());
        assert!(matches!(
            session.check_ready(&openai()),
            Err(SessionError::NoDocument)
        ));
    }

    #[test]
    fn test_failed_load_keeps_previous_state() {
        let mut session = loaded();
        session.append_turn(Role::User, "question").unwrap();

        let err = session.load_document("broken.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, SessionError::Extraction(_)));
        assert_eq!(session.document().unwrap().name, "cats.pdf");
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_load_file_round_trip() {
        let path = std::env::temp_dir().join(format!("pdf-chat-{}.pdf", std::process::id()));
        std::fs::write(&path, build_pdf(&["Page one", "Page two"])).unwrap();

        let mut session = loaded();
        session.append_turn(Role::User, "old question").unwrap();
        let result = session.load_file(&path).map(|d| (d.name.clone(), d.text.clone()));
        std::fs::remove_file(&path).ok();

        let (name, text) = result.unwrap();
        assert!(name.starts_with("pdf-chat-"));
        assert!(text.find("Page one").unwrap() < text.find("Page two").unwrap());
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_load_missing_file_keeps_previous_state() {
        let mut session = loaded();
        let err = session
            .load_file(Path::new("/nonexistent/dir/doc.pdf"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Extraction(ExtractionError::Io { .. })));
        assert_eq!(session.document().unwrap().name, "cats.pdf");
    }

    #[test]
    fn test_replace_document_clears_history() {
        for turns in [0, 1, 5] {
            let mut session = loaded();
            for i in 0..turns {
                session.append_turn(Role::User, format!("q{i}")).unwrap();
                session.append_turn(Role::Assistant, format!("a{i}")).unwrap();
            }
            session.replace_document("dogs.pdf", "Dogs bark.");
            assert!(session.history().is_empty());
            assert_eq!(session.document().unwrap().text, "Dogs bark.");
        }
    }

    #[test]
    fn test_reset_keeps_document() {
        let mut session = loaded();
        session.append_turn(Role::User, "hi").unwrap();
        session.reset();
        assert!(session.history().is_empty());
        assert_eq!(session.document().unwrap().name, "cats.pdf");
    }

    #[test]
    fn test_system_turn_rejected() {
        let mut session = loaded();
        let err = session.append_turn(Role::System, "be nice").unwrap_err();
        assert!(matches!(err, SessionError::SystemTurn));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_never_reach_transport() {
        let transport = StubTransport::fragments(&["unused"]);
        let mut session = loaded();

        for provider in [
            Provider::openai(String::new()),
            Provider::exaone("key".into(), String::new()),
            Provider::exaone(String::new(), "dep-1".into()),
        ] {
            let err = session
                .respond(&transport, &provider, "What are cats?", |_| {})
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::MissingCredentials(_)));
        }
        assert_eq!(transport.calls(), 0);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_no_document_never_reaches_transport() {
        let transport = StubTransport::fragments(&["unused"]);
        let mut session = Session::new();
        let err = session
            .respond(&transport, &openai(), "hello?", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoDocument));
        assert_eq!(transport.calls(), 0);

        session.replace_document("blank.pdf", "   ");
        assert!(matches!(
            session.check_ready(&openai()),
            Err(SessionError::NoDocument)
        ));
    }

    #[tokio::test]
    async fn test_respond_records_turns_and_replays_history() {
        let transport = StubTransport::fragments(&["Mam", "", "mals."]);
        let mut session = loaded();

        let mut seen = Vec::new();
        let answer = session
            .respond(&transport, &openai(), "What are cats?", |f| seen.push(f.to_string()))
            .await
            .unwrap();
        assert_eq!(answer, "Mammals.");
        assert_eq!(seen, vec!["Mam", "mals."]);
        assert_eq!(
            session.history(),
            &[
                ChatMessage::user("What are cats?"),
                ChatMessage::assistant("Mammals.")
            ]
        );

        session
            .respond(&transport, &openai(), "Are you sure?", |_| {})
            .await
            .unwrap();
        let requests = transport.requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(second.len(), 4);
        assert_eq!(second[0].role, Role::System);
        assert_eq!(second[1], ChatMessage::user("What are cats?"));
        assert_eq!(second[2], ChatMessage::assistant("Mammals."));
        assert_eq!(second[3], ChatMessage::user("Are you sure?"));
    }

    #[tokio::test]
    async fn test_backend_error_becomes_assistant_turn() {
        let transport = StubTransport::failing(LlmError::Api {
            status: 401,
            message: "bad key".into(),
        });
        let mut session = loaded();
        let answer = session
            .respond(&transport, &openai(), "What are cats?", |_| {})
            .await
            .unwrap();
        assert_eq!(answer, "⚠️ The API key is invalid.");
        assert_eq!(session.history()[1], ChatMessage::assistant(answer));
    }

    #[tokio::test]
    async fn test_empty_response_recorded_as_empty_turn() {
        let transport = StubTransport::fragments(&["", ""]);
        let mut session = loaded();
        let answer = session
            .respond(&transport, &openai(), "Anything?", |_| panic!("no fragments expected"))
            .await
            .unwrap();
        assert_eq!(answer, "");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1], ChatMessage::assistant(""));
    }

    #[tokio::test]
    async fn test_end_to_end_instruction_echo() {
        let mut session = Session::new();
        session.replace_document("cats.pdf", "Cats are mammals.");
        let answer = session
            .respond(&EchoSystemTransport, &openai(), "What are cats?", |_| {})
            .await
            .unwrap();
        assert!(answer.contains("Cats are mammals."));
        assert!(answer.contains("Do not speculate"));
        assert!(session.history().iter().all(|m| m.role != Role::System));
    }
}
