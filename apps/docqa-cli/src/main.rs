use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docqa_core::config::{expand_path, Config, Settings};
use docqa_core::loader::DocumentLoader;
use docqa_core::types::{Answer, Citation, QueryFilter};
use docqa_core::Error;
use docqa_rag::{Ingestor, Pipeline};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docqa")]
#[command(about = "Ask questions about your documents, answered from retrieved passages with citations")]
struct Cli {
    /// Collection to use instead of index.collection
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Restrict retrieval to one document or file.
#[derive(Args, Debug, Default)]
struct Scope {
    /// Only retrieve chunks of this document id
    #[arg(long)]
    document: Option<String>,
    /// Only retrieve chunks of this filename
    #[arg(long)]
    filename: Option<String>,
}

impl Scope {
    fn filter(&self) -> QueryFilter {
        QueryFilter { document_id: self.document.clone(), filename: self.filename.clone() }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk and index .txt/.md files (defaults to data.input_dir)
    Ingest { paths: Vec<PathBuf> },
    /// Answer one question
    Ask {
        question: String,
        /// Number of passages to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Ingest these paths first
        #[arg(long)]
        ingest: Vec<PathBuf>,
        #[command(flatten)]
        scope: Scope,
    },
    /// Read questions from stdin, one per line
    Chat {
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        ingest: Vec<PathBuf>,
        #[command(flatten)]
        scope: Scope,
    },
    /// Show collection statistics
    Stats,
    /// Remove every chunk of one document
    Remove { document_id: String },
    /// Delete every entry in the collection
    Clear,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let config = Config::load().context("Error loading config")?;
    let mut settings = config.settings()?;
    if let Some(collection) = &cli.collection {
        settings.index.collection.clone_from(collection);
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_tracing(&settings.logging.level);

    match &cli.command {
        Command::Ingest { paths } => {
            let ingestor = Ingestor::from_settings(&settings).await?;
            let paths = if paths.is_empty() { vec![expand_path(&settings.data.input_dir)] } else { paths.clone() };
            ingest(&ingestor, &paths).await?;
        }
        Command::Ask { question, top_k, ingest: extra, scope } => {
            let pipeline = Pipeline::from_settings(&settings).await?;
            ingest(pipeline.ingestor(), extra).await?;
            ask(&pipeline, question, *top_k, &scope.filter()).await?;
        }
        Command::Chat { top_k, ingest: extra, scope } => {
            let pipeline = Pipeline::from_settings(&settings).await?;
            ingest(pipeline.ingestor(), extra).await?;
            chat(&pipeline, *top_k, &scope.filter()).await?;
        }
        Command::Stats => {
            let stats = Ingestor::from_settings(&settings).await?.stats().await?;
            println!("Collection: {}", stats.collection);
            println!("Backend:    {}", stats.backend);
            println!("Embedder:   {}", stats.embedder);
            println!("Entries:    {}", stats.entries);
        }
        Command::Remove { document_id } => {
            let removed = Ingestor::from_settings(&settings).await?.remove_document(document_id).await?;
            println!("Removed {removed} chunks of {document_id}");
        }
        Command::Clear => {
            Ingestor::from_settings(&settings).await?.clear().await?;
            println!("Cleared collection {}", settings.index.collection);
        }
    }
    Ok(())
}

async fn ingest(ingestor: &Ingestor, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let loader = DocumentLoader::new();
    let mut documents = Vec::new();
    for path in paths {
        documents.extend(loader.load_path(path).with_context(|| format!("loading {}", path.display()))?);
    }
    let pb = ProgressBar::new(documents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents {msg}")?
            .progress_chars("#>-"),
    );
    let reports = ingestor
        .ingest_all(&documents, |report| {
            pb.inc(1);
            pb.set_message(report.document_id.clone());
        })
        .await;
    pb.finish_and_clear();
    let reports = reports?;
    let chunks: usize = reports.iter().map(|r| r.chunks).sum();
    println!("Indexed {} documents into {chunks} chunks", reports.len());
    Ok(())
}

async fn ask(pipeline: &Pipeline, question: &str, top_k: Option<usize>, filter: &QueryFilter) -> Result<()> {
    match pipeline.ask_filtered(question, top_k, filter).await {
        Ok(answer) => {
            print_answer(&answer);
            Ok(())
        }
        Err(Error::Generation { source, retrieved }) => {
            eprintln!("Generation failed: {source}");
            if !retrieved.is_empty() {
                eprintln!("Retrieved passages:");
                let excerpt_chars = pipeline.composer().excerpt_chars();
                for (i, hit) in retrieved.iter().enumerate() {
                    eprintln!("{}", format_citation(&Citation::from_match(i + 1, hit, excerpt_chars)));
                }
            }
            Err(Error::Generation { source, retrieved }.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn chat(pipeline: &Pipeline, top_k: Option<usize>, filter: &QueryFilter) -> Result<()> {
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if !question.is_empty() {
            if let Err(e) = ask(pipeline, question, top_k, filter).await {
                tracing::error!(error = %e, "question failed");
            }
        }
        print!("\n> ");
        io::stdout().flush()?;
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if answer.citations.is_empty() {
        return;
    }
    println!("\nSources:");
    for citation in &answer.citations {
        println!("{}", format_citation(citation));
    }
}

fn format_citation(c: &Citation) -> String {
    let page = c.page.map(|p| format!(", page {p}")).unwrap_or_default();
    format!(
        "  [Document {}] {}{} (chunk {}/{}) relevance {:.1}%\n      {}",
        c.number,
        c.filename,
        page,
        c.chunk_index + 1,
        c.total_chunks,
        c.relevance * 100.0,
        c.excerpt.replace('\n', " ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ask_with_options() {
        let cli = Cli::try_parse_from(["docqa", "--collection", "manuals", "ask", "How deep?", "--top-k", "2", "--ingest", "a.txt"]).unwrap();
        assert_eq!(cli.collection.as_deref(), Some("manuals"));
        match cli.command {
            Command::Ask { question, top_k, ingest, scope } => {
                assert_eq!(question, "How deep?");
                assert_eq!(top_k, Some(2));
                assert_eq!(ingest, vec![PathBuf::from("a.txt")]);
                assert!(scope.filter().is_empty());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn document_and_filename_flags_build_a_filter() {
        let cli = Cli::try_parse_from(["docqa", "chat", "--document", "manuals/pump.md", "--filename", "pump.md"]).unwrap();
        match cli.command {
            Command::Chat { scope, .. } => {
                assert_eq!(scope.filter(), QueryFilter { document_id: Some("manuals/pump.md".into()), filename: Some("pump.md".into()) });
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn citation_line_shows_page_and_percentage() {
        let c = Citation {
            number: 2,
            document_id: "manual.txt".into(),
            filename: "manual.txt".into(),
            page: Some(3),
            chunk_index: 0,
            total_chunks: 4,
            relevance: 0.875,
            excerpt: "line one\nline two".into(),
        };
        let line = format_citation(&c);
        assert!(line.starts_with("  [Document 2] manual.txt, page 3 (chunk 1/4) relevance 87.5%"));
        assert!(line.ends_with("line one line two"));
    }
}
