use crate::core::error::{Error, Result};
use crate::indexing::discovery::normalize_path;
use crate::indexing::indexer::FileEvent;
use notify_debouncer_full::{
    new_debouncer,
    notify::{
        event::{ModifyKind, RenameMode},
        Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    },
    DebounceEventResult, Debouncer, FileIdMap,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Recursive, debounced watcher over a root directory
pub struct FileWatcher {
    root_path: PathBuf,
    debounce: Duration,
}

/// Keeps the watcher alive; dropping it stops event delivery and closes the
/// sending side of the channel.
pub struct WatchHandle {
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

impl WatchHandle {
    /// Stop watching and wait for the event thread to finish
    pub fn stop(self) {
        self.debouncer.stop();
    }
}

impl FileWatcher {
    pub fn new(root_path: &Path, debounce: Duration) -> Result<Self> {
        if !root_path.is_dir() {
            return Err(Error::Config(format!(
                "Path is not a directory: {}",
                root_path.display()
            )));
        }
        Ok(Self {
            root_path: root_path.canonicalize()?,
            debounce,
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Start watching; translated events are sent to `events` in the order
    /// the debouncer delivers them.
    pub fn spawn(&self, events: Sender<FileEvent>) -> Result<WatchHandle> {
        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(batch) => {
                    for event in batch {
                        for file_event in translate_event(&event.event) {
                            // Receiver gone means we are shutting down
                            if events.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(error = %error, "watch error");
                    }
                }
            }
        })
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to create file watcher: {}", e),
            ))
        })?;

        debouncer
            .watcher()
            .watch(&self.root_path, RecursiveMode::Recursive)
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to watch directory: {}", e),
                ))
            })?;

        tracing::info!(root = %self.root_path.display(), "watching for changes");
        Ok(WatchHandle { debouncer })
    }
}

/// Map a raw notify event to index events.
///
/// Renames become a delete of the old path and a create of the new one; an
/// ambiguous rename is resolved by checking whether the path still exists.
pub fn translate_event(event: &Event) -> Vec<FileEvent> {
    let paths = || event.paths.iter().map(|p| normalize_path(p));

    match &event.kind {
        EventKind::Create(_) => paths().map(FileEvent::Created).collect(),
        EventKind::Remove(_) => paths().map(FileEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => paths().map(FileEvent::Deleted).collect(),
            RenameMode::To => paths().map(FileEvent::Created).collect(),
            RenameMode::Both if event.paths.len() == 2 => vec![
                FileEvent::Deleted(normalize_path(&event.paths[0])),
                FileEvent::Created(normalize_path(&event.paths[1])),
            ],
            _ => paths()
                .map(|p| {
                    if p.exists() {
                        FileEvent::Created(p)
                    } else {
                        FileEvent::Deleted(p)
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => paths().map(FileEvent::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
