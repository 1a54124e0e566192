use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// latent-search - Local semantic search over a directory tree
#[derive(Parser, Debug)]
#[command(name = "latent-search")]
#[command(about = "Keeps a local embedding index of a directory in sync and searches it", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.latent-search)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, value_enum, global = true, default_value_t = EmbedderKind::Bert)]
    pub embedder: EmbedderKind,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbedderKind {
    /// MiniLM sentence transformer (downloaded on first use)
    Bert,
    /// Hashed bag-of-words, no download
    Hashing,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create directories and fetch the embedding model
    Init,
    /// Bring the index in line with a directory
    Index {
        /// Directory to index
        path: PathBuf,
    },
    /// Index a directory, keep it updated, and answer queries read from stdin
    Watch {
        /// Directory to watch
        path: PathBuf,
        /// Debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
    /// Search the index
    Search {
        /// Search query
        query: String,
        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,
    },
}
