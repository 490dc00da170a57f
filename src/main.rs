use anyhow::{Context, Result};
use cardrag::config::{Config, DEFAULT_CONFIG_FILE};
use cardrag::embedder::Embedder;
use cardrag::embedder::mock::MockEmbedder;
use cardrag::{ChunkMode, Indexer, Retriever, SharedEmbedder, store};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Characters of chunk text shown per search hit.
const PREVIEW_CHARS: usize = 75;

#[derive(Parser)]
#[command(name = "cardrag", version, about = "Build and query a local RAG index")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and persist the corpus
    Build {
        /// PDF file or directory of .txt/.md files
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Destination index file
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long, value_enum)]
        mode: Option<ChunkMode>,
        /// Character budget for size-bounded chunking
        #[arg(long)]
        max_chars: Option<usize>,
        /// Use the hash-based mock embedder instead of the ONNX model
        #[arg(long)]
        mock: bool,
    },
    /// Rank indexed chunks against a question
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long)]
        mock: bool,
    },
    /// Show the provenance recorded in an index
    Info {
        #[arg(long)]
        index: Option<PathBuf>,
    },
}

fn make_embedder(config: &Config, mock: bool) -> Box<dyn Embedder> {
    if mock {
        Box::new(MockEmbedder::new(config.model.dimensions))
    } else {
        Box::new(SharedEmbedder::from_config(&config.model))
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Command::Build {
            corpus,
            index,
            mode,
            max_chars,
            mock,
        } => {
            if let Some(corpus) = corpus {
                config.corpus_path = corpus.to_string_lossy().into_owned();
            }
            if let Some(index) = index {
                config.index_path = index.to_string_lossy().into_owned();
            }
            if mode.is_some() {
                config.chunking.mode = mode;
            }
            if let Some(max_chars) = max_chars {
                config.chunking.max_chars = max_chars;
            }
            config.validate()?;

            let corpus = config.corpus()?;
            let policy = config.chunk_policy(&corpus);
            let embedder = make_embedder(&config, mock);
            let indexer = Indexer::new(embedder.as_ref(), policy);

            let report = indexer
                .build(&corpus, &config.index_path())
                .context("index build failed")?;
            info!(
                "Indexed {} documents into {} chunks ({}-dim, {})",
                report.documents, report.chunks, report.dimensions, report.model_name
            );
            println!(
                "Built {} with {} chunks from {} documents",
                config.index_path,
                report.chunks,
                report.documents
            );
        }
        Command::Search {
            query,
            top_k,
            index,
            mock,
        } => {
            if let Some(index) = index {
                config.index_path = index.to_string_lossy().into_owned();
            }
            if let Some(top_k) = top_k {
                config.search_top_k = top_k;
            }
            config.validate()?;
            anyhow::ensure!(!query.trim().is_empty(), "no question entered");

            let embedder = make_embedder(&config, mock);
            let retriever = Retriever::open(embedder.as_ref(), config.index_path());
            let hits = retriever
                .search(&query, config.search_top_k)
                .context("search failed")?;

            if hits.is_empty() {
                println!("No matching chunks.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{:>2}. [{:.3}] {} ({})",
                    i + 1,
                    hit.score,
                    hit.citation(),
                    hit.chunk.id
                );
                println!("    {}", preview(&hit.chunk.text));
            }
        }
        Command::Info { index } => {
            let path = index.unwrap_or_else(|| config.index_path());
            let meta = store::read_meta(&path)?;
            println!("index:      {}", path.display());
            println!("model:      {} ({} dimensions)", meta.model_name, meta.dimensions);
            println!("source:     {}", meta.source);
            println!("chunking:   {}", meta.chunk_policy);
            println!("built at:   {}", meta.built_at);
            if meta.model_name != config.model.name {
                println!(
                    "warning:    configured model is {}; rebuild before searching",
                    config.model.name
                );
            }
        }
    }

    Ok(())
}
