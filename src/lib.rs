// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
}

// Data storage
pub mod storage {
    pub mod snapshot;
    pub mod state;
    pub mod vectors;
}

// Indexing pipeline
pub mod indexing {
    pub mod discovery;
    pub mod extract;
    pub mod indexer;
    pub mod reconcile;
}

// Search & ML
pub mod search {
    pub mod model;
    pub mod provider;
    pub mod query;
}

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod watch;
}

pub use ui::cli;

// Re-export commonly used types
pub use core::config::Config;
pub use core::error::{Error, Result};
pub use indexing::discovery::{discover_files, ContentKind, IgnoreRules};
pub use indexing::indexer::{FileEvent, IndexOutcome, Indexer};
pub use indexing::reconcile::{ReconcileReport, Reconciler};
pub use search::model::EmbeddingModel;
pub use search::provider::{Content, EmbeddingProvider, HashingEmbedder};
pub use search::query::{QueryEngine, SearchHit};
pub use storage::snapshot::SnapshotFiles;
pub use storage::state::StateStore;
pub use storage::vectors::{IndexEntry, QuerySnapshot, UpsertOutcome, VectorStore};
pub use ui::watch::{translate_event, FileWatcher, WatchHandle};
