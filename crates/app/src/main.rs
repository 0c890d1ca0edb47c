use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lease_rag_core::{
    CompletionService, DocumentInput, DocumentSource, EmbeddingService, FusedHit, HashingEmbedder,
    IndexState, LeaseDocumentLoader, LeaseSession, LoadedDocument, MethodScore, OpenAiChat,
    OpenAiCredentials, OpenAiEmbeddings, QueryResponse, RagConfig, RagError, SessionStats,
    DEFAULT_BASE_URL,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_QUESTION: &str = "How much is the rent?";
const EXIT_WORDS: [&str; 3] = ["quit", "exit", "q"];

#[derive(Parser)]
#[command(name = "lease-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args)]
struct Settings {
    /// JSON file with RagConfig fields; missing fields keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// OpenAI-compatible API key.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Embedding backend used for the semantic index.
    #[arg(long, global = true, value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Chat model override.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Embedding model override.
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[arg(long, global = true)]
    chunk_overlap: Option<usize>,

    /// Candidates taken from each retrieval method.
    #[arg(long, global = true)]
    num_chunks: Option<usize>,

    #[arg(long, global = true)]
    lexical_weight: Option<f64>,

    #[arg(long, global = true)]
    semantic_weight: Option<f64>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    Openai,
    /// Offline character-trigram hashing; no API key needed for indexing.
    Hashing,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a lease and answer one question.
    Ask {
        document: PathBuf,
        /// Question words; defaults to a rent question.
        question: Vec<String>,
        /// Print the response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ingest a lease and answer questions from stdin until quit/exit/q.
    Chat { document: PathBuf },
    /// Show fused retrieval candidates with per-method scores, without synthesis.
    Retrieve {
        document: PathBuf,
        question: Vec<String>,
    },
    /// Ingest a lease once and answer several questions in turn.
    Batch {
        document: PathBuf,
        /// File with one question per line; defaults to the configured sample questions.
        #[arg(long)]
        questions: Option<PathBuf>,
    },
    /// Show chunking statistics for a lease.
    Stats { document: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli.settings)?;
    let timeout = Duration::from_secs(config.request_timeout_secs);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "lease-rag boot"
    );

    match cli.command {
        Command::Ask {
            document,
            question,
            json,
        } => {
            let session = open_session(&cli.settings, config)?;
            let stats = within(timeout, session.ingest(DocumentInput::Path(document))).await?;
            info!(chunks = stats.num_chunks, pages = stats.page_count, "lease ingested");

            let question = join_question(&question);
            match within(timeout, session.ask(&question)).await {
                Ok(response) if json => println!("{}", serde_json::to_string_pretty(&response)?),
                Ok(response) => print_response(&response),
                Err(error) => return report_failure(error),
            }
        }
        Command::Chat { document } => {
            let session = open_session(&cli.settings, config)?;
            let stats = within(timeout, session.ingest(DocumentInput::Path(document))).await?;
            print_stats(&stats);
            chat_loop(&session, timeout).await?;
        }
        Command::Batch {
            document,
            questions,
        } => {
            let questions = match questions {
                Some(path) => read_questions(&path)?,
                None => config.sample_questions.clone(),
            };
            let session = open_session(&cli.settings, config)?;
            let stats = within(timeout, session.ingest(DocumentInput::Path(document))).await?;
            print_stats(&stats);
            run_batch(&session, &questions, timeout).await;
        }
        Command::Retrieve { document, question } => {
            let embedder = build_embedder(&cli.settings, &config)?;
            let index = within(timeout, build_index(&document, &config, embedder)).await?;
            let question = join_question(&question);
            let fused = within(timeout, index.retrieve(&question)).await?;

            println!("question: {}", fused.question);
            if fused.is_empty() {
                println!("no candidates retrieved");
            }
            for (position, hit) in fused.hits.iter().enumerate() {
                print_hit(position + 1, hit);
            }
        }
        Command::Stats { document } => {
            let embedder = build_embedder(&cli.settings, &config)?;
            let index = within(timeout, build_index(&document, &config, embedder)).await?;
            print_stats(&index.stats());
        }
    }

    Ok(())
}

fn build_config(settings: &Settings) -> anyhow::Result<RagConfig> {
    let mut config = match &settings.config {
        Some(path) => RagConfig::from_json_file(path)?,
        None => RagConfig::default(),
    };

    if let Some(model) = &settings.model {
        config.model_name = model.clone();
    }
    if let Some(model) = &settings.embedding_model {
        config.embedding_model = model.clone();
    }
    if let Some(size) = settings.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = settings.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    if let Some(count) = settings.num_chunks {
        config.num_chunks_per_method = count;
    }
    if let Some(weight) = settings.lexical_weight {
        config.lexical_weight = weight;
    }
    if let Some(weight) = settings.semantic_weight {
        config.semantic_weight = weight;
    }

    config.validate()?;
    Ok(config)
}

fn credentials(settings: &Settings) -> Result<OpenAiCredentials, RagError> {
    OpenAiCredentials::new(settings.api_key.clone(), &settings.base_url)
}

fn build_embedder(
    settings: &Settings,
    config: &RagConfig,
) -> Result<Arc<dyn EmbeddingService>, RagError> {
    match settings.embedder {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
        EmbedderKind::Openai => Ok(Arc::new(OpenAiEmbeddings::new(
            credentials(settings)?,
            config.embedding_model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?)),
    }
}

fn open_session(settings: &Settings, config: RagConfig) -> anyhow::Result<LeaseSession> {
    let embedder = build_embedder(settings, &config)?;
    let completion: Arc<dyn CompletionService> = Arc::new(OpenAiChat::new(
        credentials(settings)?,
        config.model_name.clone(),
        config.temperature,
        Duration::from_secs(config.request_timeout_secs),
    )?);

    let loader = Arc::new(LeaseDocumentLoader::from(&config));
    Ok(LeaseSession::new(
        config,
        loader,
        embedder,
        completion,
    )?)
}

/// Chunks and indexes a document without a completion service attached.
async fn build_index(
    path: &Path,
    config: &RagConfig,
    embedder: Arc<dyn EmbeddingService>,
) -> Result<IndexState, RagError> {
    let input = DocumentInput::Path(path.to_path_buf());
    let loader = LeaseDocumentLoader::from(config);
    let document: LoadedDocument =
        tokio::task::spawn_blocking(move || loader.load(&input))
            .await
            .map_err(|error| lease_rag_core::DocumentLoadError::Worker(error.to_string()))??;
    IndexState::build(document, config, embedder).await
}

async fn within<T>(
    limit: Duration,
    operation: impl Future<Output = Result<T, RagError>>,
) -> Result<T, RagError> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| RagError::Timeout(limit))?
}

async fn chat_loop(session: &LeaseSession, timeout: Duration) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nQuestion (quit/exit/q to leave): ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question.to_ascii_lowercase().as_str()) {
            break;
        }

        match within(timeout, session.ask(question)).await {
            Ok(response) => print_response(&response),
            Err(RagError::Synthesis(error)) => {
                warn!(%error, "answer synthesis failed");
                println!("Could not produce an answer: {}", error.reason);
                print_sources(&error.chunks);
            }
            Err(error) => {
                warn!(%error, "question failed");
                println!("Error: {error}");
            }
        }
    }

    Ok(())
}

fn read_questions(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading questions from {}", path.display()))?;
    let questions: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    anyhow::ensure!(!questions.is_empty(), "{} has no questions", path.display());
    Ok(questions)
}

/// Answers each question independently; one failure does not stop the run.
async fn run_batch(session: &LeaseSession, questions: &[String], timeout: Duration) {
    let total = questions.len();
    let mut answered = 0usize;

    for (position, question) in questions.iter().enumerate() {
        println!("\n[{}/{total}] {question}", position + 1);
        match within(timeout, session.ask(question)).await {
            Ok(response) => {
                answered += 1;
                print_response(&response);
            }
            Err(RagError::Synthesis(error)) => {
                warn!(%error, "answer synthesis failed");
                println!("Could not produce an answer: {}", error.reason);
                print_sources(&error.chunks);
            }
            Err(error) => {
                warn!(%error, question = %question, "question failed");
                println!("Error: {error}");
            }
        }
    }

    info!(answered, total, "batch finished");
    println!("\nanswered {answered} of {total} questions");
}

fn report_failure(error: RagError) -> anyhow::Result<()> {
    if let RagError::Synthesis(synthesis) = &error {
        println!("Could not produce an answer: {}", synthesis.reason);
        print_sources(&synthesis.chunks);
    }
    Err(error.into())
}

fn join_question(words: &[String]) -> String {
    let question = words.join(" ");
    if question.trim().is_empty() {
        DEFAULT_QUESTION.to_string()
    } else {
        question
    }
}

fn print_response(response: &QueryResponse) {
    println!("Question: {}", response.question);
    println!("Answer: {}", response.answer);
    if !response.cited_pages.is_empty() {
        let pages: Vec<String> = response.cited_pages.iter().map(u32::to_string).collect();
        println!("Cited pages: {}", pages.join(", "));
    }
    print_sources(&response.sources);
}

fn print_sources(sources: &[lease_rag_core::Chunk]) {
    if sources.is_empty() {
        return;
    }
    println!("Sources:");
    for chunk in sources {
        println!("  [Page {}] {}", chunk.page_label(), preview(&chunk.text, 120));
    }
}

fn print_hit(position: usize, hit: &FusedHit) {
    println!(
        "#{position} fused={:.4} chunk={} page={}",
        hit.fused_score,
        hit.chunk.chunk_index,
        hit.chunk.page_label()
    );
    println!("  lexical:  {}", describe_score(hit.lexical.as_ref()));
    println!("  semantic: {}", describe_score(hit.semantic.as_ref()));
    println!("  text: {}", preview(&hit.chunk.text, 200));
}

fn describe_score(score: Option<&MethodScore>) -> String {
    match score {
        Some(score) => format!(
            "raw={:.4} normalized={:.4} rank={}",
            score.raw, score.normalized, score.rank
        ),
        None => "not retrieved".to_string(),
    }
}

fn print_stats(stats: &SessionStats) {
    println!("source: {}", stats.source_id);
    println!("checksum: {}", stats.checksum);
    println!("pages: {}", stats.page_count);
    println!(
        "chunks: {} (size {}, overlap {})",
        stats.num_chunks, stats.chunk_size, stats.chunk_overlap
    );
    println!(
        "embeddings: {} ({} dimensions)",
        stats.embedding_model, stats.embedding_dimensions
    );
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}
