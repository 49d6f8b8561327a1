//! # HR Assistant CLI (`hra`)
//!
//! ## Usage
//!
//! ```bash
//! hra --config ./config/hra.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hra init` | Create the SQLite index and run schema migrations |
//! | `hra ingest [paths...]` | Ingest policy documents (defaults to `[documents] root`) |
//! | `hra ask "<question>"` | Answer one question with citations |
//! | `hra chat` | Interactive conversation |
//! | `hra search "<query>"` | Retrieval only, with scores |
//! | `hra delete <document-id>` | Remove one document from the index |
//! | `hra stats` | Knowledge-base info |
//! | `hra reset` | Remove every document from the index |
//! | `hra serve` | Start the HTTP JSON API |
//!
//! Results go to stdout; logs go to stderr (`RUST_LOG` or `--verbose`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use hr_assistant::assistant::{open_index, Assistant, QueryResponse, QueryStatus};
use hr_assistant::config::{self, Config, DocumentsConfig};
use hr_assistant::connector_fs::scan_documents;
use hr_assistant::embedding::OpenAiEmbeddings;
use hr_assistant::ingest::{ingest_sources, IngestContext, IngestStatus, SourceDocument};
use hr_assistant::server;
use hr_assistant::stats::{print_stats, KnowledgeBaseInfo};
use hr_assistant_core::retrieve::Retriever;
use hr_assistant_core::store::VectorIndex;

/// HR Assistant: answers questions about HR policy documents with
/// citations to the passages it used.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hra.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "hra", version, about = "Retrieval-augmented HR policy assistant")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hra.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database. Safe to run repeatedly.
    Init,

    /// Ingest policy documents.
    ///
    /// With no paths, scans `[documents] root`. Directories are scanned with
    /// the configured globs; files are ingested as given.
    Ingest {
        /// Files or directories to ingest.
        paths: Vec<PathBuf>,

        /// Re-embed documents even if their content is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Answer a single question.
    Ask {
        question: String,
    },

    /// Start an interactive conversation. `/clear` forgets history, `/quit` exits.
    Chat,

    /// Show the passages a question would retrieve, without generating an answer.
    Search {
        query: String,

        /// Number of passages (defaults to `[retrieval] top_k`).
        #[arg(long, short)]
        k: Option<usize>,
    },

    /// Remove a document and all its chunks.
    Delete {
        document_id: String,
    },

    /// Show knowledge-base info.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove every document from the index.
    Reset,

    /// Start the HTTP JSON API on `[server] bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = open_index(&cfg.index.path).await?;
            index.close().await;
            println!("Index initialized at {}", cfg.index.path.display());
        }
        Commands::Ingest { paths, force } => {
            run_ingest(&cfg, &paths, force).await?;
        }
        Commands::Ask { question } => {
            let assistant = Assistant::from_config(&cfg).await?;
            let response = assistant.ask("cli", &question).await?;
            print_response(&response);
        }
        Commands::Chat => {
            run_chat(&cfg).await?;
        }
        Commands::Search { query, k } => {
            run_search(&cfg, &query, k).await?;
        }
        Commands::Delete { document_id } => {
            let index = open_index(&cfg.index.path).await?;
            let removed = index.delete_document(&document_id).await?;
            index.close().await;
            if removed == 0 {
                bail!("No document with id {}", document_id);
            }
            println!("Deleted {} ({} chunks)", document_id, removed);
        }
        Commands::Stats { json } => {
            let index = open_index(&cfg.index.path).await?;
            let info = KnowledgeBaseInfo::gather(&cfg, &index).await?;
            index.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_stats(&info);
            }
        }
        Commands::Reset => {
            let index = open_index(&cfg.index.path).await?;
            let before = index.stats().await?;
            index.clear().await?;
            index.close().await;
            println!(
                "Index reset: removed {} documents ({} chunks)",
                before.documents, before.entries
            );
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_ingest(cfg: &Config, paths: &[PathBuf], force: bool) -> Result<()> {
    let gateway = Arc::new(OpenAiEmbeddings::from_config(&cfg.embedding)?);
    let sources = if paths.is_empty() {
        let documents = cfg.documents.clone();
        tokio::task::spawn_blocking(move || scan_documents(&documents)).await??
    } else {
        collect_sources(&cfg.documents, paths)?
    };
    if sources.is_empty() {
        println!("No documents found.");
        return Ok(());
    }

    let index = Arc::new(open_index(&cfg.index.path).await?);
    let ctx = IngestContext {
        index: index.clone(),
        gateway,
        retry: cfg.retry.policy(),
        chunking: cfg.chunking.options(),
        batch_size: cfg.embedding.batch_size,
        force,
    };
    let report = ingest_sources(&ctx, sources).await;
    index.close().await;

    for outcome in &report.outcomes {
        match &outcome.status {
            IngestStatus::Ingested { chunks } => {
                println!("  ingested   {} ({} chunks)", outcome.source, chunks)
            }
            IngestStatus::Unchanged { chunks } => {
                println!("  unchanged  {} ({} chunks)", outcome.source, chunks)
            }
            IngestStatus::Failed { error } => println!("  FAILED     {}: {}", outcome.source, error),
        }
    }
    println!(
        "Ingested {} documents ({} chunks), {} unchanged, {} failed.",
        report.ingested(),
        report.chunks_written(),
        report.unchanged(),
        report.failed()
    );
    if report.failed() > 0 && report.ingested() + report.unchanged() == 0 {
        bail!("every document failed to ingest");
    }
    Ok(())
}

fn collect_sources(documents: &DocumentsConfig, paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    let mut sources = Vec::new();
    for path in paths {
        if path.is_dir() {
            let scoped = DocumentsConfig {
                root: Some(path.clone()),
                ..documents.clone()
            };
            sources.extend(scan_documents(&scoped)?);
        } else {
            sources.push(read_source(path)?);
        }
    }
    Ok(sources)
}

fn read_source(path: &Path) -> Result<SourceDocument> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(SourceDocument {
        path: path.to_string_lossy().to_string(),
        bytes,
    })
}

async fn run_search(cfg: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let gateway = Arc::new(OpenAiEmbeddings::from_config(&cfg.embedding)?);
    let index: Arc<dyn VectorIndex> = Arc::new(open_index(&cfg.index.path).await?);
    let retriever = Retriever::new(index, gateway, cfg.retry.policy(), cfg.retrieval.top_k);

    let results = retriever.retrieve(query, k).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chars {}-{})",
            i + 1,
            r.score,
            r.citation.document_name,
            r.citation.start,
            r.citation.end
        );
        println!("    {}", preview(&r.chunk.text, 160));
    }
    Ok(())
}

async fn run_chat(cfg: &Config) -> Result<()> {
    let assistant = Assistant::from_config(cfg).await?;
    let session = uuid::Uuid::new_v4().to_string();
    println!("HR Assistant. Ask about company policies. /clear resets the conversation, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                assistant.sessions().clear(&session).await;
                println!("Conversation cleared.");
            }
            question => {
                let response = assistant.ask(&session, question).await?;
                print_response(&response);
            }
        }
    }
    assistant.sessions().end(&session);
    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.answer);
    if response.status == QueryStatus::Answered && !response.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &response.citations {
            println!("  - {} (chars {}-{})", c.document_name, c.start, c.end);
        }
    }
    if let Some(hint) = &response.hint {
        println!();
        println!("Note: {}", hint);
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
