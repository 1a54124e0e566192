use crate::core::error::Result;
use crate::indexing::discovery::{
    discover_files, is_ignore_file, normalize_path, ContentKind, IgnoreRules,
};
use crate::indexing::extract::extract;
use crate::search::provider::EmbeddingProvider;
use crate::storage::state::{calculate_file_hash, StateStore};
use crate::storage::vectors::{UpsertOutcome, VectorStore};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, RwLock};

/// A change reported by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
        }
    }
}

/// What happened to the store for one created or modified file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Unsupported, ignored by an ignore file, unreadable, empty or not embeddable
    Ignored,
    /// Content hash matches what is already indexed
    Unchanged,
    Appended,
    Updated,
}

impl From<UpsertOutcome> for IndexOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Appended => IndexOutcome::Appended,
            UpsertOutcome::Updated => IndexOutcome::Updated,
        }
    }
}

/// Applies file events under one watched root to the vector store
pub struct Indexer {
    root: PathBuf,
    ignore: RwLock<IgnoreRules>,
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    state: Arc<StateStore>,
}

impl Indexer {
    pub fn new(
        root: &Path,
        store: Arc<VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        state: Arc<StateStore>,
    ) -> Result<Self> {
        let root = root.canonicalize()?;
        let ignore = IgnoreRules::load(&root)?;
        Ok(Self {
            root,
            ignore: RwLock::new(ignore),
            store,
            provider,
            state,
        })
    }

    /// Re-read ignore files after one of them changed.
    ///
    /// Rows for files that became ignored stay until the next reconciliation.
    pub fn reload_ignore_rules(&self) {
        match IgnoreRules::load(&self.root) {
            Ok(rules) => {
                if let Ok(mut ignore) = self.ignore.write() {
                    *ignore = rules;
                    tracing::info!(root = %self.root.display(), "reloaded ignore rules");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to reload ignore rules"),
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore
            .read()
            .map(|rules| rules.is_ignored(path, false))
            .unwrap_or(false)
    }

    /// A created directory (e.g. moved in from elsewhere) indexes every
    /// supported file beneath it.
    pub fn on_created(&self, path: &Path) -> Result<IndexOutcome> {
        if path.is_dir() {
            let mut outcome = IndexOutcome::Ignored;
            for file in discover_files(path)? {
                match self.upsert_file(&file.path)? {
                    IndexOutcome::Ignored => {}
                    other => outcome = other,
                }
            }
            return Ok(outcome);
        }
        self.upsert_file(path)
    }

    pub fn on_modified(&self, path: &Path) -> Result<IndexOutcome> {
        self.upsert_file(path)
    }

    /// Drop `path`, or every indexed path under it when it was a directory.
    /// Returns whether anything was removed.
    pub fn on_deleted(&self, path: &Path) -> Result<bool> {
        let path = normalize_path(path);

        let targets: Vec<PathBuf> = if self.store.contains(&path) {
            vec![path]
        } else {
            self.store
                .paths()?
                .into_iter()
                .filter(|p| p.starts_with(&path))
                .collect()
        };

        let mut removed = false;
        for target in &targets {
            if self.store.remove(target)? {
                tracing::info!(path = %target.display(), "removed from index");
                removed = true;
            }
        }
        let targets: Vec<&Path> = targets.iter().map(PathBuf::as_path).collect();
        self.state.remove_many(&targets)?;
        Ok(removed)
    }

    /// Embed the file's current content and write it to the store.
    ///
    /// Extraction and embedding happen before the store lock is taken.
    pub fn upsert_file(&self, path: &Path) -> Result<IndexOutcome> {
        let path = normalize_path(path);
        let Some(kind) = ContentKind::from_path(&path) else {
            return Ok(IndexOutcome::Ignored);
        };
        if self.is_ignored(&path) {
            tracing::debug!(path = %path.display(), "excluded by ignore rules");
            return Ok(IndexOutcome::Ignored);
        }

        let hash = match calculate_file_hash(&path) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "file not readable");
                return Ok(IndexOutcome::Ignored);
            }
        };

        if self.store.contains(&path) && !self.state.has_file_changed(&path, &hash)? {
            tracing::debug!(path = %path.display(), "content unchanged");
            return Ok(IndexOutcome::Unchanged);
        }

        let extracted = match extract(&path, kind) {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "nothing to index");
                return Ok(IndexOutcome::Ignored);
            }
        };

        let vector = match self.provider.embed(&extracted.content) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to embed");
                return Ok(IndexOutcome::Ignored);
            }
        };

        let outcome = self.store.upsert(path.clone(), vector, extracted.text)?;
        self.state.update_file_state(&path, hash)?;
        tracing::info!(path = %path.display(), ?outcome, "indexed");
        Ok(outcome.into())
    }

    pub fn apply(&self, event: &FileEvent) -> Result<()> {
        tracing::debug!(?event, "file event");
        if is_ignore_file(event.path()) {
            self.reload_ignore_rules();
        }
        match event {
            FileEvent::Created(path) => self.on_created(path).map(|_| ()),
            FileEvent::Modified(path) => self.on_modified(path).map(|_| ()),
            FileEvent::Deleted(path) => self.on_deleted(path).map(|_| ()),
        }
    }

    /// Apply events in arrival order until every sender is dropped
    pub fn run(&self, events: Receiver<FileEvent>) {
        for event in events {
            if let Err(e) = self.apply(&event) {
                tracing::warn!(path = %event.path().display(), error = %e, "failed to apply file event");
            }
        }
        tracing::debug!("event channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::provider::HashingEmbedder;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        indexer: Indexer,
        store: Arc<VectorStore>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(VectorStore::in_memory(64));
        let state = Arc::new(StateStore::open_path(&temp.path().join("state.redb")).unwrap());
        let indexer = Indexer::new(
            temp.path(),
            store.clone(),
            Arc::new(HashingEmbedder::new(64).unwrap()),
            state,
        )
        .unwrap();
        Fixture {
            temp,
            indexer,
            store,
        }
    }

    #[test]
    fn test_create_modify_delete() {
        let fx = fixture();
        let file = fx.temp.path().join("note.md");

        fs::write(&file, "# first version").unwrap();
        assert_eq!(fx.indexer.on_created(&file).unwrap(), IndexOutcome::Appended);
        let canonical = file.canonicalize().unwrap();
        let first = fx.store.vector(&canonical).unwrap().unwrap();

        fs::write(&file, "# second version with other words").unwrap();
        assert_eq!(fx.indexer.on_modified(&file).unwrap(), IndexOutcome::Updated);
        assert_ne!(fx.store.vector(&canonical).unwrap().unwrap(), first);
        assert_eq!(fx.store.len(), 1);

        fs::remove_file(&file).unwrap();
        assert!(fx.indexer.on_deleted(&file).unwrap());
        assert!(fx.store.is_empty());
        assert!(fx.store.check_invariants());
    }

    #[test]
    fn test_unchanged_content_is_not_reembedded() {
        let fx = fixture();
        let file = fx.temp.path().join("a.txt");
        fs::write(&file, "steady").unwrap();

        assert_eq!(fx.indexer.on_created(&file).unwrap(), IndexOutcome::Appended);
        assert_eq!(fx.indexer.on_modified(&file).unwrap(), IndexOutcome::Unchanged);
    }

    #[test]
    fn test_ignored_files() {
        let fx = fixture();
        let unsupported = fx.temp.path().join("main.rs");
        let empty = fx.temp.path().join("empty.txt");
        fs::write(&unsupported, "fn main() {}").unwrap();
        fs::write(&empty, "").unwrap();

        assert_eq!(fx.indexer.on_created(&unsupported).unwrap(), IndexOutcome::Ignored);
        assert_eq!(fx.indexer.on_created(&empty).unwrap(), IndexOutcome::Ignored);
        assert_eq!(
            fx.indexer.on_modified(&fx.temp.path().join("gone.txt")).unwrap(),
            IndexOutcome::Ignored
        );
        // The hashing embedder only handles text
        let image = fx.temp.path().join("a.png");
        fs::write(&image, [1u8, 2, 3]).unwrap();
        assert_eq!(fx.indexer.on_created(&image).unwrap(), IndexOutcome::Ignored);
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_delete_absent_path_is_noop() {
        let fx = fixture();
        assert!(!fx.indexer.on_deleted(&fx.temp.path().join("never.md")).unwrap());
    }

    #[test]
    fn test_directory_events() {
        let fx = fixture();
        let dir = fx.temp.path().join("sub");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.txt"), "one").unwrap();
        fs::write(dir.join("b.txt"), "two").unwrap();
        fs::write(fx.temp.path().join("keep.txt"), "three").unwrap();

        fx.indexer.on_created(&dir).unwrap();
        fx.indexer.on_created(&fx.temp.path().join("keep.txt")).unwrap();
        assert_eq!(fx.store.len(), 3);

        fs::remove_dir_all(&dir).unwrap();
        assert!(fx.indexer.on_deleted(&dir).unwrap());
        assert_eq!(fx.store.len(), 1);
    }

    #[test]
    fn test_run_applies_events_in_order() {
        let fx = fixture();
        let file = fx.temp.path().join("a.txt");
        fs::write(&file, "content").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(FileEvent::Created(file.clone())).unwrap();
        tx.send(FileEvent::Deleted(file.clone())).unwrap();
        tx.send(FileEvent::Created(file.clone())).unwrap();
        drop(tx);

        fx.indexer.run(rx);
        assert_eq!(fx.store.len(), 1);
    }

    #[test]
    fn test_gitignored_files_are_ignored() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("notes");
        fs::create_dir_all(root.join("private")).unwrap();
        fs::write(root.join(".gitignore"), "private/\n").unwrap();
        fs::write(root.join("public.md"), "# P").unwrap();
        fs::write(root.join("private").join("secret.md"), "# S").unwrap();

        let store = Arc::new(VectorStore::in_memory(64));
        let state = Arc::new(StateStore::open_path(&temp.path().join("state.redb")).unwrap());
        let indexer = Indexer::new(
            &root,
            store.clone(),
            Arc::new(HashingEmbedder::new(64).unwrap()),
            state,
        )
        .unwrap();

        assert_eq!(indexer.on_created(&root.join("public.md")).unwrap(), IndexOutcome::Appended);
        assert_eq!(
            indexer.on_created(&root.join("private").join("secret.md")).unwrap(),
            IndexOutcome::Ignored
        );
        assert_eq!(indexer.on_created(&root.join("private")).unwrap(), IndexOutcome::Ignored);
        assert_eq!(store.len(), 1);
        assert!(store.paths().unwrap()[0].ends_with("public.md"));
    }

    #[test]
    fn test_changed_gitignore_applies_to_later_events() {
        let fx = fixture();
        let file = fx.temp.path().join("a.txt");
        fs::write(&file, "first").unwrap();
        assert_eq!(fx.indexer.on_created(&file).unwrap(), IndexOutcome::Appended);

        let gitignore = fx.temp.path().join(".gitignore");
        fs::write(&gitignore, "*.txt\n").unwrap();
        fx.indexer.apply(&FileEvent::Created(gitignore)).unwrap();

        fs::write(&file, "second").unwrap();
        assert_eq!(fx.indexer.on_modified(&file).unwrap(), IndexOutcome::Ignored);
        let other = fx.temp.path().join("b.txt");
        fs::write(&other, "other").unwrap();
        assert_eq!(fx.indexer.on_created(&other).unwrap(), IndexOutcome::Ignored);
        assert_eq!(fx.store.len(), 1);
    }
}
