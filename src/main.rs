use clap::{Parser, Subcommand};
use persona_retrieval::{Result, RetrievalError};
use persona_retrieval::commands::{search_command, serve, show_stats, vectorize_pending_command};
use persona_retrieval::config::{Config, get_config_dir, show_config};
use persona_retrieval::database::sqlite::models::{CandidateFilter, DocumentType};
use persona_retrieval::retrieval::KnowledgeCategory;
use persona_retrieval::search::SearchOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "persona-retrieval")]
#[command(about = "Semantic retrieval for chatbot personas, scripts and abbreviations")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file, or print it with --show
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start the HTTP API
    Serve {
        /// Address to listen on, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Search stored vectors
    Search {
        query: String,
        /// Knowledge category whose threshold and limit apply, e.g. "script_library"
        #[arg(long)]
        category: Option<KnowledgeCategory>,
        /// Only search one document type
        #[arg(long)]
        document_type: Option<DocumentType>,
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum cosine similarity, between 0 and 1
        #[arg(long)]
        threshold: Option<f64>,
        /// Print only the closest candidate, ignoring the threshold
        #[arg(long)]
        best: bool,
    },
    /// Embed every stored vector that is still missing an embedding
    VectorizePending,
    /// Show embedding coverage of the vector store
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = get_config_dir(cli.config_dir.as_deref())
        .map_err(|e| RetrievalError::Config(e.to_string()))?;
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config);
            } else {
                config.save()?;
                println!(
                    "Configuration written to {}",
                    config.config_file_path().display()
                );
            }
        }
        Commands::Serve { bind } => {
            serve(&config, bind.as_deref()).await?;
        }
        Commands::Search {
            query,
            category,
            document_type,
            limit,
            threshold,
            best,
        } => {
            let options = SearchOptions {
                category,
                similarity_threshold: threshold,
                limit,
                filter: CandidateFilter {
                    document_type,
                    ..CandidateFilter::default()
                },
            };
            search_command(&config, &query, &options, best).await?;
        }
        Commands::VectorizePending => {
            vectorize_pending_command(&config).await?;
        }
        Commands::Stats => {
            show_stats(&config).await?;
        }
    }

    Ok(())
}
