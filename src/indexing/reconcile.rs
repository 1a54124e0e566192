use crate::core::error::Result;
use crate::indexing::discovery::{discover_files, DiscoveredFile};
use crate::indexing::extract::{extract, Extracted};
use crate::search::provider::EmbeddingProvider;
use crate::storage::state::{calculate_file_hash, FileState, StateStore};
use crate::storage::vectors::{IndexEntry, QuerySnapshot, VectorStore};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Vectors kept for unchanged paths
    pub reused: usize,
    /// Vectors carried over from another path with identical content
    pub renamed: usize,
    pub embedded: usize,
    /// Indexed paths no longer on disk
    pub dropped: usize,
    /// Files skipped after a read, extraction or embedding failure
    pub failed: usize,
}

impl ReconcileReport {
    pub fn indexed(&self) -> usize {
        self.reused + self.renamed + self.embedded
    }
}

/// How a scanned file gets its vector
enum Plan {
    Reuse(usize),
    Rename(usize),
    Embed,
}

struct Scanned {
    file: DiscoveredFile,
    hash: String,
}

/// Brings the store in line with the directory tree at startup.
pub struct Reconciler {
    root: PathBuf,
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    state: Arc<StateStore>,
}

impl Reconciler {
    pub fn new(
        root: &Path,
        store: Arc<VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        state: Arc<StateStore>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            store,
            provider,
            state,
        }
    }

    /// Scan the root, reuse what is still valid, embed the rest and replace
    /// the store contents in one step.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let files = discover_files(&self.root)?;
        tracing::info!(root = %self.root.display(), files = files.len(), "reconciling index");

        let loaded = self.store.snapshot_for_query()?;
        let model_matches = self.state.get_model_id()?.as_deref() == Some(self.provider.model_id());
        let mut states = self.state.all_file_states()?;

        let previous = if model_matches {
            loaded.clone()
        } else {
            if !loaded.is_empty() || !states.is_empty() {
                tracing::warn!(
                    model = self.provider.model_id(),
                    "embedding model changed, rebuilding index"
                );
            }
            states.clear();
            QuerySnapshot {
                paths: Default::default(),
                matrix: Default::default(),
                texts: Default::default(),
                dimension: loaded.dimension,
            }
        };

        let rows: HashMap<&Path, usize> = previous
            .paths
            .iter()
            .enumerate()
            .map(|(row, path)| (path.as_path(), row))
            .collect();
        let rows_by_hash: HashMap<&str, usize> = previous
            .paths
            .iter()
            .enumerate()
            .filter_map(|(row, path)| states.get(path).map(|s| (s.content_hash.as_str(), row)))
            .collect();

        let scanned: Vec<std::result::Result<Scanned, PathBuf>> = files
            .into_par_iter()
            .map(|file| match calculate_file_hash(&file.path) {
                Ok(hash) => Ok(Scanned { file, hash }),
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "failed to read file");
                    Err(file.path)
                }
            })
            .collect();

        let mut planned = Vec::with_capacity(scanned.len());
        let mut failed_paths = Vec::new();
        for item in scanned {
            let scanned = match item {
                Ok(scanned) => scanned,
                Err(path) => {
                    failed_paths.push(path);
                    continue;
                }
            };
            let path = scanned.file.path.as_path();
            let unchanged = states
                .get(path)
                .map(|s| s.content_hash == scanned.hash)
                .unwrap_or(true);

            let plan = match rows.get(path) {
                Some(&row) if unchanged => Plan::Reuse(row),
                _ => match rows_by_hash.get(scanned.hash.as_str()) {
                    Some(&row) => Plan::Rename(row),
                    None => Plan::Embed,
                },
            };
            planned.push((scanned, plan));
        }

        // Text is re-read for reused rows; full content is only needed to embed
        let extracted: Vec<Option<Extracted>> = planned
            .par_iter()
            .map(|(scanned, plan)| {
                let needs_content = matches!(plan, Plan::Embed) || scanned.file.kind.has_text();
                if !needs_content {
                    return None;
                }
                match extract(&scanned.file.path, scanned.file.kind) {
                    Ok(extracted) => Some(extracted),
                    Err(e) => {
                        tracing::warn!(path = %scanned.file.path.display(), error = %e, "failed to extract");
                        None
                    }
                }
            })
            .collect();

        let mut entries = Vec::with_capacity(planned.len());
        let mut indexed_states = Vec::with_capacity(planned.len());
        for ((scanned, plan), extracted) in planned.into_iter().zip(extracted) {
            let path = scanned.file.path.clone();
            let text = extracted.as_ref().and_then(|e| e.text.clone());

            let vector = match plan {
                Plan::Reuse(row) => {
                    report.reused += 1;
                    previous.row(row).to_vec()
                }
                Plan::Rename(row) => {
                    tracing::debug!(
                        from = %previous.paths[row].display(),
                        to = %path.display(),
                        "reusing vector for identical content"
                    );
                    report.renamed += 1;
                    previous.row(row).to_vec()
                }
                Plan::Embed => {
                    let Some(extracted) = extracted else {
                        failed_paths.push(path);
                        continue;
                    };
                    match self.provider.embed(&extracted.content) {
                        Ok(vector) => {
                            tracing::debug!(path = %path.display(), "embedded");
                            report.embedded += 1;
                            vector
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "failed to embed");
                            failed_paths.push(path);
                            continue;
                        }
                    }
                }
            };

            indexed_states.push((path.clone(), FileState::new(scanned.hash)));
            entries.push(IndexEntry::new(path, vector, text));
        }
        report.failed = failed_paths.len();

        let current: HashSet<&Path> = indexed_states.iter().map(|(p, _)| p.as_path()).collect();
        report.dropped = loaded
            .paths
            .iter()
            .filter(|p| !current.contains(p.as_path()))
            .count();

        self.store.replace_all(entries)?;

        let recorded = self.state.all_file_states()?;
        let stale: Vec<&Path> = recorded
            .keys()
            .map(PathBuf::as_path)
            .filter(|p| !current.contains(p))
            .collect();
        self.state.remove_many(&stale)?;
        let updates: Vec<(&Path, FileState)> = indexed_states
            .iter()
            .map(|(p, s)| (p.as_path(), s.clone()))
            .collect();
        self.state.update_many(&updates)?;
        self.state.set_model_id(self.provider.model_id())?;

        tracing::info!(
            reused = report.reused,
            renamed = report.renamed,
            embedded = report.embedded,
            dropped = report.dropped,
            failed = report.failed,
            "index reconciled"
        );
        Ok(report)
    }
}
