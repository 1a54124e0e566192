use anyhow::{bail, Context, Result};
use clap::Parser;
use latent_search::cli::{Cli, Commands, EmbedderKind};
use latent_search::{
    Config, EmbeddingModel, EmbeddingProvider, FileWatcher, HashingEmbedder, Indexer,
    QueryEngine, Reconciler, SearchHit, StateStore, VectorStore,
};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.base_dir.clone())?;

    match &cli.command {
        Commands::Init => handle_init(&config, cli.embedder),
        Commands::Index { path } => handle_index(&config, cli.embedder, path),
        Commands::Watch { path, debounce_ms } => {
            let config = match debounce_ms {
                Some(ms) => config.with_debounce(Duration::from_millis(*ms)),
                None => config,
            };
            handle_watch(&config, cli.embedder, path)
        }
        Commands::Search { query, limit } => {
            handle_search(&config, cli.embedder, query, limit.unwrap_or(config.default_limit))
        }
    }
}

/// Everything a command needs, opened against one base directory
struct Index {
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    state: Arc<StateStore>,
}

impl Index {
    fn open(config: &Config, embedder: EmbedderKind) -> Result<Self> {
        if !config.is_initialized() {
            bail!("latent-search is not initialized. Run 'latent-search init' first.");
        }
        let provider = load_provider(config, embedder)?;
        let store = VectorStore::open(config, provider.dimension())
            .context("Failed to open vector store")?;
        let state = StateStore::open(config).context("Failed to open state store")?;
        Ok(Self {
            store: Arc::new(store),
            provider,
            state: Arc::new(state),
        })
    }

    fn reconcile(&self, root: &Path) -> Result<()> {
        let reconciler = Reconciler::new(
            root,
            self.store.clone(),
            self.provider.clone(),
            self.state.clone(),
        );
        let report = reconciler
            .reconcile()
            .with_context(|| format!("Failed to index {}", root.display()))?;

        println!(
            "Indexed {} files ({} reused, {} renamed, {} embedded), dropped {}, failed {}",
            report.indexed(),
            report.reused,
            report.renamed,
            report.embedded,
            report.dropped,
            report.failed
        );
        Ok(())
    }

    fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(self.store.clone(), self.provider.clone())
    }
}

fn load_provider(config: &Config, embedder: EmbedderKind) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match embedder {
        EmbedderKind::Bert => {
            Arc::new(EmbeddingModel::init(config).context("Failed to load embedding model")?)
        }
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
    })
}

fn handle_init(config: &Config, embedder: EmbedderKind) -> Result<()> {
    if config.is_initialized() {
        println!("latent-search is already initialized at: {}", config.base_dir.display());
    } else {
        config.init().context("Failed to create directories")?;
        println!("Created {}", config.base_dir.display());
    }

    let provider = load_provider(config, embedder)?;
    println!("Embedding model ready: {} ({} dimensions)", provider.model_id(), provider.dimension());
    Ok(())
}

fn handle_index(config: &Config, embedder: EmbedderKind, root: &Path) -> Result<()> {
    let index = Index::open(config, embedder)?;
    index.reconcile(root)
}

fn handle_watch(config: &Config, embedder: EmbedderKind, root: &Path) -> Result<()> {
    let index = Index::open(config, embedder)?;
    index.reconcile(root)?;

    let (tx, rx) = mpsc::channel();
    let watcher = FileWatcher::new(root, config.debounce)?;
    let handle = watcher.spawn(tx)?;

    let indexer = Indexer::new(
        watcher.root_path(),
        index.store.clone(),
        index.provider.clone(),
        index.state.clone(),
    )?;
    let worker = std::thread::spawn(move || indexer.run(rx));

    let engine = index.query_engine();
    println!("Watching {}. Type a query and press Enter (Ctrl+D to quit).", watcher.root_path().display());

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let query = line.trim();
        if !query.is_empty() {
            match engine.search(query, config.default_limit) {
                Ok(hits) => print_hits(&hits),
                Err(e) => eprintln!("Search failed: {}", e),
            }
        }
        print!("> ");
        stdout.flush()?;
    }
    println!();

    // Closing the watcher closes the channel, which ends the worker
    handle.stop();
    if worker.join().is_err() {
        bail!("index worker panicked");
    }
    Ok(())
}

fn handle_search(config: &Config, embedder: EmbedderKind, query: &str, limit: usize) -> Result<()> {
    let index = Index::open(config, embedder)?;

    if let Some(model_id) = index.state.get_model_id()? {
        if model_id != index.provider.model_id() {
            eprintln!(
                "Warning: index was built with {}, re-run 'latent-search index' to rebuild it.",
                model_id
            );
        }
    }

    let hits = index.query_engine().search(query, limit)?;
    print_hits(&hits);
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {} (similarity: {:.3})", i + 1, hit.path.display(), hit.score);
        let preview: String = hit
            .text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(150)
            .collect();
        if !preview.is_empty() {
            println!("   {}", preview);
        }
    }
}
