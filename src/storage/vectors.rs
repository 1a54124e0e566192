use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::indexing::extract::extract_text;
use crate::storage::snapshot::{Snapshot, SnapshotFiles};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One row of the store
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Canonical absolute path, unique within the store
    pub path: PathBuf,
    /// Unit-length embedding of exactly `dimension` values
    pub vector: Vec<f32>,
    /// Extracted text, kept for result previews only
    pub text: Option<String>,
}

impl IndexEntry {
    pub fn new(path: PathBuf, vector: Vec<f32>, text: Option<String>) -> Self {
        Self { path, vector, text }
    }
}

/// Whether an upsert added a row or overwrote one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Appended,
    Updated,
}

/// Read-consistent view of the store.
///
/// Holds its own references to the collections as they were when it was
/// taken; later mutations copy-on-write and never show through.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub dimension: usize,
    pub paths: Arc<Vec<PathBuf>>,
    /// Row-major, `paths.len() * dimension` values
    pub matrix: Arc<Vec<f32>>,
    pub texts: Arc<HashMap<PathBuf, String>>,
}

impl QuerySnapshot {
    pub fn rows(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.matrix[row * self.dimension..(row + 1) * self.dimension]
    }

    /// Display text for `path`, empty when none was extracted
    pub fn text(&self, path: &Path) -> &str {
        self.texts.get(path).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Default, Clone)]
struct Inner {
    paths: Arc<Vec<PathBuf>>,
    matrix: Arc<Vec<f32>>,
    index: HashMap<PathBuf, usize>,
    texts: Arc<HashMap<PathBuf, String>>,
}

/// In-memory embedding matrix with a row-aligned path list.
///
/// Every mutation runs under one lock and, when the store was opened from a
/// config, rewrites the on-disk snapshot before the lock is released.
pub struct VectorStore {
    dimension: usize,
    inner: Mutex<Inner>,
    files: Option<SnapshotFiles>,
}

impl VectorStore {
    /// Create an empty store that never touches disk
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            dimension,
            inner: Mutex::new(Inner::default()),
            files: None,
        }
    }

    /// Open the store persisted under `config`, or start empty.
    ///
    /// Only paths and vectors are saved; preview text is re-read from the
    /// files themselves.
    ///
    /// An unreadable, inconsistent or wrong-dimension snapshot is logged and
    /// discarded; callers then rebuild through the reconciler.
    pub fn open(config: &Config, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(&config.embeddings_dir)?;
        Ok(Self::open_files(SnapshotFiles::from_config(config), dimension))
    }

    /// Open a store backed by explicit snapshot files
    pub fn open_files(files: SnapshotFiles, dimension: usize) -> Self {
        let inner = match files.load(dimension).and_then(|s| s.map(Inner::from_snapshot).transpose()) {
            Ok(Some(mut inner)) => {
                inner.load_texts();
                tracing::info!(
                    rows = inner.paths.len(),
                    texts = inner.texts.len(),
                    "loaded saved index"
                );
                inner
            }
            Ok(None) => Inner::default(),
            Err(e) => {
                tracing::warn!(error = %e, "saved index unusable, starting empty");
                Inner::default()
            }
        };

        Self {
            dimension,
            inner: Mutex::new(inner),
            files: Some(files),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.paths.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock()
            .map(|inner| inner.index.contains_key(path))
            .unwrap_or(false)
    }

    /// Paths in row order
    pub fn paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self.lock()?.paths.as_ref().clone())
    }

    /// Copy of the row stored for `path`
    pub fn get(&self, path: &Path) -> Result<Option<IndexEntry>> {
        let inner = self.lock()?;
        Ok(inner.index.get(path).map(|&row| IndexEntry {
            path: path.to_path_buf(),
            vector: inner.row(row, self.dimension).to_vec(),
            text: inner.texts.get(path).cloned(),
        }))
    }

    pub fn vector(&self, path: &Path) -> Result<Option<Vec<f32>>> {
        let inner = self.lock()?;
        Ok(inner
            .index
            .get(path)
            .map(|&row| inner.row(row, self.dimension).to_vec()))
    }

    pub fn text(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.lock()?.texts.get(path).cloned())
    }

    /// Add a row for a path that is not yet indexed
    pub fn append(&self, path: PathBuf, vector: Vec<f32>, text: Option<String>) -> Result<()> {
        self.check_dimension(&vector)?;
        self.mutate(|inner| {
            if inner.index.contains_key(&path) {
                return Err(Error::AlreadyExists(path));
            }
            inner.push(path, &vector, text);
            Ok(())
        })
    }

    /// Overwrite the row of an indexed path, keeping its position
    pub fn update(&self, path: &Path, vector: Vec<f32>, text: Option<String>) -> Result<()> {
        self.check_dimension(&vector)?;
        let dim = self.dimension;
        self.mutate(|inner| {
            let row = *inner
                .index
                .get(path)
                .ok_or_else(|| Error::NotFound(path.to_path_buf()))?;
            inner.overwrite(row, path, &vector, text, dim);
            Ok(())
        })
    }

    /// `update` when the path is indexed, `append` otherwise, under one lock
    pub fn upsert(&self, path: PathBuf, vector: Vec<f32>, text: Option<String>) -> Result<UpsertOutcome> {
        self.check_dimension(&vector)?;
        let dim = self.dimension;
        self.mutate(|inner| {
            let existing = inner.index.get(&path).copied();
            Ok(match existing {
                Some(row) => {
                    inner.overwrite(row, &path, &vector, text, dim);
                    UpsertOutcome::Updated
                }
                None => {
                    inner.push(path, &vector, text);
                    UpsertOutcome::Appended
                }
            })
        })
    }

    /// Remove the row for `path`. Returns `false` when it was not indexed.
    ///
    /// The last row is moved into the freed slot, so row order is not preserved
    /// across removals.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        if !self.contains(path) {
            return Ok(false);
        }
        let dim = self.dimension;
        self.mutate(|inner| {
            let Some(row) = inner.index.remove(path) else {
                return Ok(false);
            };
            let last = inner.paths.len() - 1;

            let matrix = Arc::make_mut(&mut inner.matrix);
            if row != last {
                matrix.copy_within(last * dim..(last + 1) * dim, row * dim);
            }
            matrix.truncate(last * dim);

            let paths = Arc::make_mut(&mut inner.paths);
            paths.swap_remove(row);
            if row != last {
                let moved = paths[row].clone();
                inner.index.insert(moved, row);
            }
            Arc::make_mut(&mut inner.texts).remove(path);
            Ok(true)
        })
    }

    /// Swap in a whole new set of rows and persist once.
    pub fn replace_all(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut next = Inner::default();
        {
            let paths = Arc::make_mut(&mut next.paths);
            let matrix = Arc::make_mut(&mut next.matrix);
            let texts = Arc::make_mut(&mut next.texts);
            paths.reserve(entries.len());
            matrix.reserve(entries.len() * self.dimension);

            for entry in entries {
                self.check_dimension(&entry.vector)?;
                if next.index.contains_key(&entry.path) {
                    return Err(Error::AlreadyExists(entry.path));
                }
                next.index.insert(entry.path.clone(), paths.len());
                matrix.extend_from_slice(&entry.vector);
                if let Some(text) = entry.text.filter(|t| !t.is_empty()) {
                    texts.insert(entry.path.clone(), text);
                }
                paths.push(entry.path);
            }
        }

        let mut inner = self.lock()?;
        self.persist(&next)?;
        *inner = next;
        Ok(())
    }

    /// Consistent view for scoring
    pub fn snapshot_for_query(&self) -> Result<QuerySnapshot> {
        let inner = self.lock()?;
        Ok(QuerySnapshot {
            dimension: self.dimension,
            paths: Arc::clone(&inner.paths),
            matrix: Arc::clone(&inner.matrix),
            texts: Arc::clone(&inner.texts),
        })
    }

    /// `len(paths) == rows(matrix) == len(index)` and every path maps to its own row
    pub fn check_invariants(&self) -> bool {
        let Ok(inner) = self.lock() else {
            return false;
        };
        let rows = inner.paths.len();
        rows * self.dimension == inner.matrix.len()
            && rows == inner.index.len()
            && inner
                .paths
                .iter()
                .enumerate()
                .all(|(row, path)| inner.index.get(path) == Some(&row))
            && inner.texts.keys().all(|path| inner.index.contains_key(path))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| Error::Database(format!("Failed to lock vector store: {}", e)))
    }

    /// Run `change` and persist the result before it becomes visible.
    ///
    /// A persisted store applies `change` to a staged copy, so a failed save
    /// leaves memory matching what is on disk.
    fn mutate<T>(&self, change: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut inner = self.lock()?;
        if self.files.is_none() {
            return change(&mut inner);
        }

        let mut staged = inner.clone();
        let result = change(&mut staged)?;
        self.persist(&staged)?;
        *inner = staged;
        Ok(result)
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        match &self.files {
            Some(files) => files.save(self.dimension, &inner.paths, &inner.matrix),
            None => Ok(()),
        }
    }
}

impl Inner {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut index = HashMap::with_capacity(snapshot.paths.len());
        for (row, path) in snapshot.paths.iter().enumerate() {
            if index.insert(path.clone(), row).is_some() {
                return Err(Error::CorruptSnapshot(format!(
                    "duplicate path {}",
                    path.display()
                )));
            }
        }
        Ok(Self {
            paths: Arc::new(snapshot.paths),
            matrix: Arc::new(snapshot.matrix),
            index,
            texts: Arc::new(HashMap::new()),
        })
    }

    /// Re-read preview text for every text-bearing row
    fn load_texts(&mut self) {
        let texts: HashMap<PathBuf, String> = self
            .paths
            .par_iter()
            .filter_map(|path| Some((path.clone(), extract_text(path)?)))
            .collect();
        self.texts = Arc::new(texts);
    }

    fn row(&self, row: usize, dim: usize) -> &[f32] {
        &self.matrix[row * dim..(row + 1) * dim]
    }

    fn push(&mut self, path: PathBuf, vector: &[f32], text: Option<String>) {
        let row = self.paths.len();
        Arc::make_mut(&mut self.matrix).extend_from_slice(vector);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            Arc::make_mut(&mut self.texts).insert(path.clone(), text);
        }
        self.index.insert(path.clone(), row);
        Arc::make_mut(&mut self.paths).push(path);
    }

    fn overwrite(&mut self, row: usize, path: &Path, vector: &[f32], text: Option<String>, dim: usize) {
        Arc::make_mut(&mut self.matrix)[row * dim..(row + 1) * dim].copy_from_slice(vector);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            Arc::make_mut(&mut self.texts).insert(path.to_path_buf(), text);
        }
    }
}
