//! # docqa CLI
//!
//! Ask questions about your documents from the command line.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ingest <paths…>` | Extract, chunk and embed files or directories; replace the persisted index |
//! | `docqa ask "<question>"` | Answer one question from the persisted index |
//! | `docqa chat` | Interactive conversation over the persisted index |
//! | `docqa summarize <files…>` | Summarize files without indexing them |
//! | `docqa feedback <positive\|negative> "<answer>"` | Append to the feedback log |
//! | `docqa speak "<text>" --output <file>` | Write the text as MP3 speech |
//! | `docqa serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! docqa ingest report.pdf figures.xlsx scan.png
//! docqa ask "What was revenue in Q3?"
//! docqa chat --export chat_history.txt
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use walkdir::WalkDir;

use docqa::config;
use docqa::conversation::Session;
use docqa::error::StateError;
use docqa::export;
use docqa::extract::content_type_for_path;
use docqa::logging;
use docqa::models::{Answer, Document, Sentiment};
use docqa::pipeline::Pipeline;
use docqa::server;

/// docqa: question answering over your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Missing files fall back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Ask questions about PDF, Word, Excel and image documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new index from files and directories, replacing the persisted one.
    ///
    /// Content types are inferred from extensions (pdf, docx, xlsx, png,
    /// jpg, jpeg). Files that fail to extract are reported and skipped.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Answer a single question from the persisted index.
    Ask {
        question: String,

        /// Also print the retrieved chunks with their distances.
        #[arg(long)]
        sources: bool,
    },

    /// Interactive conversation over the persisted index.
    ///
    /// Type a question per line. `/export [path]` writes the transcript,
    /// `/clear` forgets the conversation so far, `/quit` (or end of input)
    /// leaves.
    Chat {
        /// Write the transcript to this file on exit.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Summarize files without touching the index.
    Summarize {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Record feedback on an answer.
    Feedback {
        /// `positive` or `negative` (also `up`/`down`).
        sentiment: Sentiment,
        answer: String,
    },

    /// Synthesize speech for a text and write it as MP3.
    Speak {
        text: String,
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Ingest { files } => {
            let pipeline = Pipeline::from_config(cfg)?;
            let docs = read_documents(&files)?;
            let mut session = Session::new("cli");
            let report = pipeline.ingest(&mut session, &docs).await?;
            for skipped in &report.skipped {
                eprintln!("skipped {}: {}", skipped.name, skipped.reason);
            }
            println!(
                "Indexed {} chunks from {} documents (generation {}).",
                report.chunks,
                report.documents - report.skipped.len(),
                report.generation
            );
        }
        Commands::Ask { question, sources } => {
            let pipeline = Pipeline::from_config(cfg)?;
            let mut session = loaded_session(&pipeline).await?;
            let answer = pipeline.ask(&mut session, &question).await?;
            print_answer(&answer, sources);
        }
        Commands::Chat { export } => {
            let pipeline = Pipeline::from_config(cfg)?;
            let session = loaded_session(&pipeline).await?;
            run_chat(&pipeline, session, export.as_deref()).await?;
        }
        Commands::Summarize { files } => {
            let pipeline = Pipeline::from_config(cfg)?;
            let docs = read_documents(&files)?;
            let summary = pipeline.summarize_documents(&docs).await?;
            println!("{}", summary);
        }
        Commands::Feedback { sentiment, answer } => {
            let pipeline = Pipeline::from_config(cfg)?;
            pipeline.record_feedback(sentiment, &answer)?;
            println!("Feedback recorded.");
        }
        Commands::Speak { text, output } => {
            let pipeline = Pipeline::from_config(cfg)?;
            let audio = pipeline.speak(&text).await?;
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, &audio)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            eprintln!("Wrote {} bytes to {}", audio.len(), output.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Read files into documents, inferring content types from extensions.
///
/// Directories are walked recursively; inside them only files with a
/// supported extension are picked up. Files named explicitly are always
/// read; unsupported ones contribute no text.
fn read_documents(paths: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if entry.file_type().is_file() && content_type_for_path(entry.path()).is_some() {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("Not a file or directory: {}", path.display());
        }
    }

    let mut docs = Vec::with_capacity(files.len());
    for path in &files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let content_type = content_type_for_path(path).unwrap_or("application/octet-stream");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        docs.push(Document::new(name, content_type, bytes));
    }
    Ok(docs)
}

async fn loaded_session(pipeline: &Pipeline) -> anyhow::Result<Session> {
    let mut session = Session::new("cli");
    if !pipeline.load(&mut session).await? {
        return Err(StateError::NotReady.into());
    }
    Ok(session)
}

fn print_answer(answer: &Answer, with_sources: bool) {
    println!("{}", answer.text);
    if !answer.found() {
        eprintln!("(no answer found in the indexed documents)");
    }
    if with_sources {
        for source in &answer.sources {
            println!(
                "--- chunk {} (distance {:.4})\n{}",
                source.chunk.index, source.distance, source.chunk.text
            );
        }
    }
}

/// One line of chat input.
#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Skip,
    Quit,
    Clear,
    /// `/export` alone prints to stdout.
    Export(Option<&'a str>),
    Ask(&'a str),
}

impl<'a> ChatCommand<'a> {
    /// Commands match as whole words; anything else is a question.
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match head {
            "" => ChatCommand::Skip,
            "/quit" if rest.is_empty() => ChatCommand::Quit,
            "/clear" if rest.is_empty() => ChatCommand::Clear,
            "/export" => ChatCommand::Export((!rest.is_empty()).then_some(rest)),
            _ => ChatCommand::Ask(line),
        }
    }
}

async fn run_chat(
    pipeline: &Pipeline,
    mut session: Session,
    export_path: Option<&Path>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match ChatCommand::parse(&line) {
            ChatCommand::Skip => continue,
            ChatCommand::Quit => break,
            ChatCommand::Clear => {
                session.clear_history();
                eprintln!("(history cleared)");
            }
            ChatCommand::Export(path) => {
                export::run_export(session.history(), path.map(Path::new))?;
            }
            // A failed turn leaves the history untouched; report and keep going.
            ChatCommand::Ask(question) => match pipeline.ask(&mut session, question).await {
                Ok(answer) => print_answer(&answer, false),
                Err(e) => eprintln!("error [{}]: {}", e.code(), e),
            },
        }
    }

    if let Some(path) = export_path {
        export::run_export(session.history(), Some(path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_commands_match_whole_words() {
        assert_eq!(ChatCommand::parse("   "), ChatCommand::Skip);
        assert_eq!(ChatCommand::parse("/quit"), ChatCommand::Quit);
        assert_eq!(ChatCommand::parse(" /clear "), ChatCommand::Clear);
        assert_eq!(ChatCommand::parse("/export"), ChatCommand::Export(None));
        assert_eq!(
            ChatCommand::parse("/export  chat history.txt"),
            ChatCommand::Export(Some("chat history.txt"))
        );
        assert_eq!(
            ChatCommand::parse("/exporter"),
            ChatCommand::Ask("/exporter")
        );
        assert_eq!(
            ChatCommand::parse("What is the capital of France?"),
            ChatCommand::Ask("What is the capital of France?")
        );
    }
}
