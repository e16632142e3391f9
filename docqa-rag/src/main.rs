use clap::{Parser, Subcommand};
use docqa_rag::{
    EnvLlmFactory, LlmFactory, LlmOverrides, LlmProvider, QaOptions, RagError, RagService,
    test_connection,
};
use docqa_retriever::RetrieverConfig;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Ask questions about the ingested document collection.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the index (overrides VECTORSTORE_PATH)
    #[arg(short, long, global = true)]
    persist_dir: Option<PathBuf>,

    /// Collection name (overrides COLLECTION_NAME)
    #[arg(short, long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a question from the collection
    Ask {
        question: String,
        /// LLM provider: openai or aliyun (overrides DEFAULT_PROVIDER)
        #[arg(long)]
        provider: Option<LlmProvider>,
        /// Model name (overrides MODEL_NAME)
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Number of chunks to retrieve (overrides RETRIEVAL_K)
        #[arg(short)]
        k: Option<usize>,
        /// Print the retrieved chunks after the answer
        #[arg(long)]
        show_sources: bool,
    },
    /// Send a short probe to the configured LLM
    CheckLlm {
        #[arg(long)]
        provider: Option<LlmProvider>,
    },
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

    match args.command {
        Commands::Ask {
            question,
            provider,
            model,
            temperature,
            max_tokens,
            k,
            show_sources,
        } => {
            let mut config = RetrieverConfig::from_env()?;
            if let Some(dir) = args.persist_dir {
                config.persist_directory = dir;
            }
            if let Some(collection) = args.collection {
                config.collection_name = collection;
            }
            let options = QaOptions {
                llm: LlmOverrides {
                    provider,
                    model,
                    temperature,
                    max_tokens,
                    ..LlmOverrides::default()
                },
                k: k.unwrap_or(config.retrieval_k),
            };

            let service = RagService::from_config(config)?;
            match service.answer_question(&question, &options).await {
                Ok(answer) => {
                    println!("{}", answer.answer);
                    if show_sources {
                        println!();
                        println!("Sources ({}):", answer.source_documents.len());
                        for (i, doc) in answer.source_documents.iter().enumerate() {
                            println!("  {}. {}", i + 1, doc.source().unwrap_or("unknown"));
                            println!(
                                "     {}",
                                doc.content.chars().take(200).collect::<String>().replace('\n', " ")
                            );
                        }
                    }
                }
                Err(e @ RagError::IndexNotFound { .. }) => println!("{e}"),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::CheckLlm { provider } => {
            let overrides = LlmOverrides {
                provider,
                ..LlmOverrides::default()
            };
            let model = EnvLlmFactory.create(&overrides)?;
            let reply = test_connection(model.as_ref()).await?;
            println!(
                "Connected to {} ({}): {reply}",
                model.provider_name(),
                model.model_name()
            );
        }
    }

    Ok(())
}
