use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pdf_chat_lib::{HttpTransport, ProviderKind, Session, Settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Chat with a PDF document through OpenAI or EXAONE
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the PDF document
    file_path: PathBuf,

    /// Backend to answer with: openai or exaone
    #[arg(long, default_value = "openai")]
    provider: ProviderKind,

    /// OpenAI API key (defaults to $OPEN_AI_API)
    #[arg(long)]
    openai_key: Option<String>,

    /// Friendli API key for EXAONE (defaults to $EXAONE_API)
    #[arg(long)]
    exaone_key: Option<String>,

    /// EXAONE model / endpoint ID (defaults to $EXAONE_MODEL_ID)
    #[arg(long)]
    exaone_model: Option<String>,

    /// Give up on a request after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Quit,
    Clear,
    Status,
    Open(PathBuf),
    Provider(String),
    Ask(String),
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Ask(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "exit" => Input::Quit,
        "clear" => Input::Clear,
        "status" => Input::Status,
        "open" if !arg.is_empty() => Input::Open(PathBuf::from(arg)),
        "provider" if !arg.is_empty() => Input::Provider(arg.to_string()),
        _ => Input::Unknown(line.to_string()),
    }
}

fn open_document(session: &mut Session, path: &Path) -> anyhow::Result<()> {
    let document = session.load_file(path)?;
    println!(
        "📄 {} ({} characters). Ask a question, or /quit.",
        document.name,
        document.text.chars().count()
    );
    Ok(())
}

fn print_status(session: &Session, settings: &Settings, kind: ProviderKind) {
    match session.document() {
        Some(document) => println!("document: {}", document.name),
        None => println!("document: (none)"),
    }
    println!("turns: {}", session.history().len());
    println!("provider: {}", kind);
    for (key, value) in settings.masked() {
        println!("{}: {}", key, value);
    }
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

/// Print one fragment as soon as it arrives.
fn write_fragment(out: &mut impl Write, fragment: &str) -> std::io::Result<()> {
    out.write_all(fragment.as_bytes())?;
    out.flush()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    settings.openai_api_key = cli.openai_key.or(settings.openai_api_key);
    settings.exaone_api_key = cli.exaone_key.or(settings.exaone_api_key);
    settings.exaone_model_id = cli.exaone_model.or(settings.exaone_model_id);
    settings.request_timeout = cli.timeout_secs.map(Duration::from_secs);

    let transport = HttpTransport::with_timeout(settings.request_timeout)?;
    let mut session = Session::new();
    open_document(&mut session, &cli.file_path)?;

    let mut kind = cli.provider;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Clear => {
                session.reset();
                println!("Conversation cleared.");
            }
            Input::Status => print_status(&session, &settings, kind),
            Input::Open(path) => {
                if let Err(e) = open_document(&mut session, &path) {
                    eprintln!("⚠️ {:#}", e);
                }
            }
            Input::Provider(name) => match name.parse::<ProviderKind>() {
                Ok(next) => {
                    kind = next;
                    println!("Using {}.", kind);
                }
                Err(e) => eprintln!("⚠️ {}", e),
            },
            Input::Unknown(command) => eprintln!(
                "unknown command: {} (try /clear, /open <path>, /provider <name>, /status, /quit)",
                command
            ),
            Input::Ask(question) => {
                let provider = settings.backend(kind);
                let mut stdout = std::io::stdout();
                let mut write_error = None;
                let result = session
                    .respond(&transport, &provider, &question, |fragment| {
                        if write_error.is_none() {
                            write_error = write_fragment(&mut stdout, fragment).err();
                        }
                    })
                    .await;
                if let Some(e) = write_error {
                    return Err(e).context("failed to write the answer to stdout");
                }
                match result {
                    Ok(_) => println!(),
                    Err(e) => eprintln!("⚠️ {}", e),
                }
            }
        }
        prompt()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("What are cats?"), Input::Ask("What are cats?".into()));
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/clear"), Input::Clear);
        assert_eq!(
            parse_input("/open  docs/report v2.pdf "),
            Input::Open(PathBuf::from("docs/report v2.pdf"))
        );
        assert_eq!(parse_input("/provider exaone"), Input::Provider("exaone".into()));
        assert_eq!(parse_input("/open"), Input::Unknown("/open".into()));
        assert_eq!(parse_input("/help"), Input::Unknown("/help".into()));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_fragment() {
        let mut out = Vec::new();
        write_fragment(&mut out, "Cats ").unwrap();
        write_fragment(&mut out, "purr.").unwrap();
        assert_eq!(out, b"Cats purr.");

        let err = write_fragment(&mut BrokenPipe, "lost").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_cli_parses_provider() {
        let cli = Cli::try_parse_from(["pdf-chat", "doc.pdf", "--provider", "exaone"]).unwrap();
        assert_eq!(cli.provider, ProviderKind::Exaone);
        assert_eq!(cli.file_path, PathBuf::from("doc.pdf"));

        let cli = Cli::try_parse_from(["pdf-chat", "doc.pdf"]).unwrap();
        assert_eq!(cli.provider, ProviderKind::OpenAi);

        assert!(Cli::try_parse_from(["pdf-chat", "doc.pdf", "--provider", "claude"]).is_err());
    }
}
