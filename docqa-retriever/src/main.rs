use clap::{Parser, Subcommand};
use docqa_embed::EmbeddingMode;
use docqa_retriever::{DocumentProcessor, EmbeddedBatch, RetrieverConfig, VectorStoreManager};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// A CLI tool to build and inspect the document vector index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the index (overrides VECTORSTORE_PATH)
    #[arg(short, long, global = true)]
    persist_dir: Option<PathBuf>,

    /// Collection name (overrides COLLECTION_NAME)
    #[arg(short, long, global = true)]
    collection: Option<String>,

    /// Output format: summary or json
    #[arg(short, long, global = true, default_value = "summary")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load, split and embed files or directories into the collection
    Ingest {
        /// Files or directories to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Chunk size in characters (overrides CHUNK_SIZE)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Chunk overlap in characters (overrides CHUNK_OVERLAP)
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },
    /// Find the chunks most similar to a query
    Search {
        query: String,
        /// Number of results (overrides RETRIEVAL_K)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Show collection statistics
    Stats,
    /// Show the first few stored chunks
    Peek {
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Delete the collection and reset the index directory
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct SearchResult<'a> {
    rank: usize,
    score: f32,
    content: &'a str,
    metadata: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct IngestSummary {
    collection: String,
    chunks: usize,
    skipped: Vec<String>,
    embedding_provider: String,
    embedding_mode: EmbeddingMode,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RetrieverConfig::from_env()?;
    if let Some(dir) = args.persist_dir {
        config.persist_directory = dir;
    }
    if let Some(collection) = args.collection {
        config.collection_name = collection;
    }

    let mut store = VectorStoreManager::from_config(&config)?;
    if store.embedding_mode() == EmbeddingMode::HashAffinity {
        eprintln!(
            "Note: using local hash embeddings; similarity reflects exact-text affinity, not meaning."
        );
    }

    match args.command {
        Commands::Ingest {
            paths,
            chunk_size,
            chunk_overlap,
        } => {
            let processor = DocumentProcessor::new(
                chunk_size.unwrap_or(config.chunk_size),
                chunk_overlap.unwrap_or(config.chunk_overlap),
            )?;

            let load = processor.load_paths(&paths).await?;
            let chunks = processor.split(&load.documents);

            if !chunks.is_empty() {
                let batch = EmbeddedBatch::embed(store.embedder().as_ref(), &chunks).await?;
                store.store_batch(batch, &config.collection_name).await?;
            }

            let summary = IngestSummary {
                collection: config.collection_name.clone(),
                chunks: chunks.len(),
                skipped: load.skipped.iter().map(ToString::to_string).collect(),
                embedding_provider: store.embedding_provider_name().to_string(),
                embedding_mode: store.embedding_mode(),
            };
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Summary => {
                    if summary.chunks == 0 {
                        println!("No documents found to ingest");
                    } else {
                        println!(
                            "Ingested {} chunks into '{}' using {} embeddings",
                            summary.chunks, summary.collection, summary.embedding_provider
                        );
                    }
                    for skip in &summary.skipped {
                        println!("  Skipped {skip}");
                    }
                }
            }
        }
        Commands::Search { query, k } => {
            if store.load_collection(&config.collection_name).await?.is_none() {
                print_no_index(&config);
                return Ok(());
            }
            let k = k.unwrap_or(config.retrieval_k);
            let results = store.similarity_search_with_score(&query, k).await?;

            match args.format {
                OutputFormat::Json => {
                    let output: Vec<SearchResult> = results
                        .iter()
                        .enumerate()
                        .map(|(i, (doc, score))| SearchResult {
                            rank: i + 1,
                            score: *score,
                            content: &doc.content,
                            metadata: &doc.metadata,
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} similar chunks:", results.len());
                    for (i, (doc, score)) in results.iter().enumerate() {
                        println!(
                            "  {}. Score: {:.3} | Source: {}",
                            i + 1,
                            score,
                            doc.source().unwrap_or("unknown")
                        );
                        println!(
                            "     {}",
                            doc.content.chars().take(100).collect::<String>().replace('\n', " ")
                        );
                    }
                }
            }
        }
        Commands::Stats => {
            if store.load_collection(&config.collection_name).await?.is_none() {
                print_no_index(&config);
                return Ok(());
            }
            let Some(info) = store.collection_info().await? else {
                print_no_index(&config);
                return Ok(());
            };

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
                OutputFormat::Summary => {
                    println!("Collection: {}", info.name);
                    println!("Location: {}", config.persist_directory.display());
                    println!("Records: {}", info.record_count);
                    println!("Dimension: {}", info.dimension);
                    println!("Embedding provider: {}", info.embedding_provider);
                    println!("Current embedding mode: {}", store.embedding_mode());
                    println!("Created: {}", info.created_at.to_rfc3339());
                }
            }
        }
        Commands::Peek { limit } => {
            if store.load_collection(&config.collection_name).await?.is_none() {
                print_no_index(&config);
                return Ok(());
            }
            let documents = store.peek(limit).await?;

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&documents)?),
                OutputFormat::Summary => {
                    for (i, doc) in documents.iter().enumerate() {
                        println!("{}. Source: {}", i + 1, doc.source().unwrap_or("unknown"));
                        println!("{}", doc.content);
                        println!("---");
                    }
                }
            }
        }
        Commands::Delete => {
            let report = store.delete_collection(&config.collection_name).await;

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary => {
                    for message in &report.messages {
                        println!("  {message}");
                    }
                    for error in &report.errors {
                        println!("  ERROR: {error}");
                    }
                    println!(
                        "{}",
                        if report.success {
                            "Collection deleted"
                        } else {
                            "Collection deletion failed"
                        }
                    );
                }
            }
            if !report.success {
                anyhow::bail!("deletion left {} in an unusable state", config.persist_directory.display());
            }
        }
    }

    store.close().await;
    Ok(())
}

fn print_no_index(config: &RetrieverConfig) {
    println!(
        "No collection '{}' found in {}. Ingest documents first.",
        config.collection_name,
        config.persist_directory.display()
    );
}
