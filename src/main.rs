use clap::{Parser, Subcommand};
use knowledge_rag::Result;
use knowledge_rag::commands::{
    ConfigUpdate, add_file, delete_file, list_files, search, show_config, show_status,
    update_config,
};
use knowledge_rag::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "knowledge-rag")]
#[command(about = "A local knowledge base with vector-indexed section search")]
#[command(version)]
struct Cli {
    /// Knowledge base directory (defaults to ~/.knowledge-rag)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change Ollama and search settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Ollama host name
        #[arg(long)]
        host: Option<String>,
        /// Ollama port
        #[arg(long)]
        port: Option<u16>,
        /// Embedding model name
        #[arg(long)]
        model: Option<String>,
        /// Embedding vector dimension
        #[arg(long)]
        dimension: Option<u32>,
        /// Default number of nearest chunks fetched per query
        #[arg(long)]
        candidate_limit: Option<usize>,
    },
    /// Add a markdown file to the knowledge base
    Add {
        /// Path to the markdown file
        path: PathBuf,
        /// Optional display title for the file
        #[arg(long)]
        title: Option<String>,
    },
    /// Search the knowledge base
    Search {
        query: String,
        /// Number of nearest chunks to consider
        #[arg(long)]
        limit: Option<usize>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all files in the knowledge base
    List,
    /// Delete a file with its sections, chunks, and vectors
    Delete {
        /// File ID to delete
        file_id: String,
    },
    /// Show knowledge base status and consistency
    Status {
        /// Fix consistency issues that were found
        #[arg(long)]
        repair: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => Config::default_base_dir().map_err(anyhow::Error::from)?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config {
            show,
            host,
            port,
            model,
            dimension,
            candidate_limit,
        } => {
            if show {
                show_config(&config)?;
            } else {
                let update = ConfigUpdate {
                    host,
                    port,
                    model,
                    embedding_dimension: dimension,
                    candidate_limit,
                };
                update_config(config, update)?;
            }
        }
        Commands::Add { path, title } => {
            add_file(&config, &path, title).await?;
        }
        Commands::Search { query, limit, json } => {
            search(&config, &query, limit, json).await?;
        }
        Commands::List => {
            list_files(&config).await?;
        }
        Commands::Delete { file_id } => {
            delete_file(&config, &file_id).await?;
        }
        Commands::Status { repair } => {
            show_status(&config, repair).await?;
        }
    }

    Ok(())
}
