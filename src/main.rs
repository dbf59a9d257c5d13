//! # repochat CLI
//!
//! ## Usage
//!
//! ```bash
//! repochat --config ./config/repochat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repochat ask "<question>" --file <path>` | Upload files, ask one question, stream the answer |
//! | `repochat chat --file <path>` | Interactive session (`/upload`, `/reset`, `/quit`) |
//! | `repochat extract <path>` | Show which text artifacts an upload yields |
//! | `repochat serve` | Start the HTTP front-end |
//!
//! ## Examples
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//!
//! # One-shot question about an archive
//! repochat ask "Where is the retry logic?" --file ./service.zip
//!
//! # Offline smoke test with the echo provider
//! repochat chat --file ./main.py   # with [model] provider = "echo"
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use repochat::chat::ChatSession;
use repochat::config;
use repochat::extract;
use repochat::models::ChatMessage;
use repochat::server;

/// repochat: ask an LLM about uploaded source code.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "repochat",
    about = "Upload source archives or files and ask an LLM about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repochat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload files, ask a single question, and stream the answer to stdout.
    Ask {
        /// The question to ask.
        question: String,

        /// Archive (`.zip`) or source file to upload first. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Start an interactive chat on stdin.
    ///
    /// Lines are questions. `/upload <path>...` adds files, `/reset` clears
    /// uploads and conversations, `/quit` exits.
    Chat {
        /// Archive (`.zip`) or source file to upload before the first question. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// List the text artifacts extracted from an upload, without calling the model.
    Extract {
        /// Archive (`.zip`) or source file.
        path: PathBuf,
    },

    /// Start the HTTP front-end.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Ask { question, files } => {
            let session = ChatSession::from_config(&cfg)?;
            let mut history = Vec::new();
            if !files.is_empty() {
                let summary = session.upload_batch(&files).await;
                eprintln!("{}\n", summary);
                history.push(ChatMessage::user(summary));
            }
            history.push(ChatMessage::user(question));
            print_answer(&session, &history).await?;
        }
        Commands::Chat { files } => {
            let session = ChatSession::from_config(&cfg)?;
            run_chat(&session, &files).await?;
        }
        Commands::Extract { path } => {
            run_extract(&path, cfg.upload.max_entry_bytes)?;
        }
        Commands::Serve => {
            let session = ChatSession::from_config(&cfg)?;
            server::run_server(&cfg, session).await?;
        }
    }

    Ok(())
}

/// Streams one answer to stdout, printing only the newly arrived text.
///
/// Returns the final answer.
async fn print_answer(session: &ChatSession, history: &[ChatMessage]) -> Result<String> {
    let mut answers = session.ask(history);
    let mut shown = String::new();
    let mut stdout = std::io::stdout();

    while let Some(snapshot) = answers.next().await {
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                if !shown.is_empty() {
                    println!();
                }
                return Err(e);
            }
        };
        // Each snapshot extends the previous one.
        write!(stdout, "{}", &snapshot[shown.len()..])?;
        stdout.flush()?;
        shown = snapshot;
    }
    println!();
    Ok(shown)
}

async fn run_chat(session: &ChatSession, files: &[PathBuf]) -> Result<()> {
    let mut history: Vec<ChatMessage> = Vec::new();
    if !files.is_empty() {
        let summary = session.upload_batch(files).await;
        println!("{}\n", summary);
        history.push(ChatMessage::user(summary));
    }

    println!(
        "Chatting with {} ({}). /upload <path>, /reset, /quit",
        session.provider().model(),
        session.provider().name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/reset", _) => {
                history.clear();
                println!("{}", session.reset().await);
            }
            ("/upload", "") => println!("usage: /upload <path>..."),
            ("/upload", rest) => {
                let paths: Vec<&str> = rest.split_whitespace().collect();
                let summary = session.upload_batch(&paths).await;
                println!("{}", summary);
                history.push(ChatMessage::user(summary));
            }
            _ => {
                history.push(ChatMessage::user(line));
                match print_answer(session, &history).await {
                    Ok(answer) => history.push(ChatMessage::assistant(answer)),
                    Err(e) => eprintln!("Error: {:#}", e),
                }
            }
        }
    }

    Ok(())
}

fn run_extract(path: &Path, max_entry_bytes: u64) -> Result<()> {
    let batch_id = extract::batch_id_for(path);
    let batch = extract::extract(
        &batch_id,
        path,
        extract::is_archive_path(path),
        max_entry_bytes,
    )?;

    if batch.is_empty() {
        println!("{}: no text files found.", batch_id);
        return Ok(());
    }

    println!("{}: {} text files", batch_id, batch.len());
    for (name, content) in &batch {
        let status = if content.starts_with(extract::ENTRY_ERROR_PREFIX) {
            content.as_str()
        } else {
            "ok"
        };
        println!("  {:<50} {:>8} bytes  {}", name, content.len(), status);
    }
    Ok(())
}
