use crate::core::config::Config;
use crate::core::error::{Error, Result};
use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Table definition for file state tracking
/// Key: canonical path, Value: JSON serialized FileState
const FILE_STATE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("file_state");

/// Index-wide metadata (embedding model id)
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_MODEL_ID_KEY: &str = "model_id";

/// State information for an indexed file
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileState {
    /// SHA256 hash of file contents
    pub content_hash: String,
    /// Timestamp when file was last indexed
    pub indexed_at: u64,
}

impl FileState {
    /// Create a new file state
    pub fn new(content_hash: String) -> Self {
        Self {
            content_hash,
            indexed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Database(format!("Failed to serialize file state: {}", e)))
    }

    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize file state: {}", e)))
    }
}

/// Persistent record of what content each indexed path had when it was embedded.
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Open or create the state store
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.state_path)
    }

    /// Open or create a state store at an explicit path
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path.exists() {
            Database::open(path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Database("State database is locked. Another latent-search process may be running. Close other instances and try again.".to_string())
                } else {
                    Error::Database(format!("Failed to open state database: {}", e))
                }
            })?
        } else {
            Database::create(path)
                .map_err(|e| Error::Database(format!("Failed to create state database: {}", e)))?
        };

        let write_txn = db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;
        {
            write_txn.open_table(FILE_STATE_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
            write_txn.open_table(META_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
        }
        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(Self { db })
    }

    /// Get the state of a file
    pub fn get_file_state(&self, file_path: &Path) -> Result<Option<FileState>> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;

        let table = read_txn.open_table(FILE_STATE_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let key = path_key(file_path);
        let result = match table.get(key.as_ref()).map_err(|e| {
            Error::Database(format!("Failed to get file state: {}", e))
        })? {
            Some(guard) => FileState::from_json(guard.value()).map(Some),
            None => Ok(None),
        };
        result
    }

    /// Update the state of a file
    pub fn update_file_state(&self, file_path: &Path, content_hash: String) -> Result<()> {
        self.update_many(&[(file_path, FileState::new(content_hash))])
    }

    /// Record several file states in one transaction
    pub fn update_many(&self, states: &[(&Path, FileState)]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;

        {
            let mut table = write_txn.open_table(FILE_STATE_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;

            for (path, state) in states {
                let json_str = state.to_json()?;
                let key = path_key(path);
                table.insert(key.as_ref(), json_str.as_str()).map_err(|e| {
                    Error::Database(format!("Failed to insert file state: {}", e))
                })?;
            }
        }

        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }

    /// Remove a file from the state store
    pub fn remove_file(&self, file_path: &Path) -> Result<()> {
        self.remove_many(&[file_path])
    }

    /// Remove several files in one transaction; absent paths are ignored
    pub fn remove_many(&self, file_paths: &[&Path]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;

        {
            let mut table = write_txn.open_table(FILE_STATE_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;

            for path in file_paths {
                let key = path_key(path);
                table.remove(key.as_ref()).map_err(|e| {
                    Error::Database(format!("Failed to remove file state: {}", e))
                })?;
            }
        }

        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }

    /// Check if a file has changed since last indexing
    pub fn has_file_changed(&self, file_path: &Path, current_hash: &str) -> Result<bool> {
        match self.get_file_state(file_path)? {
            Some(state) => Ok(state.content_hash != current_hash),
            // Not recorded, consider it changed (needs indexing)
            None => Ok(true),
        }
    }

    /// Every recorded file state, keyed by path
    pub fn all_file_states(&self) -> Result<HashMap<PathBuf, FileState>> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let table = read_txn.open_table(FILE_STATE_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let mut states = HashMap::new();
        for item in table
            .iter()
            .map_err(|e| Error::Database(format!("Failed to iterate file states: {}", e)))?
        {
            let (key, value) =
                item.map_err(|e| Error::Database(format!("Failed to read file state: {}", e)))?;
            states.insert(PathBuf::from(key.value()), FileState::from_json(value.value())?);
        }
        Ok(states)
    }

    /// Number of tracked files
    pub fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let table = read_txn.open_table(FILE_STATE_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;
        let count = table
            .len()
            .map_err(|e| Error::Database(format!("Failed to count file states: {}", e)))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get_model_id(&self) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;

        let table = read_txn.open_table(META_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let v = table.get(META_MODEL_ID_KEY).map_err(|e| {
            Error::Database(format!("Failed to get model id: {}", e))
        })?;

        match v {
            Some(guard) => Ok(Some(guard.value().to_string())),
            None => Ok(None),
        }
    }

    pub fn set_model_id(&self, model_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;

        {
            let mut table = write_txn.open_table(META_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
            table.insert(META_MODEL_ID_KEY, model_id).map_err(|e| {
                Error::Database(format!("Failed to store model id: {}", e))
            })?;
        }

        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }
}

fn path_key(path: &Path) -> std::borrow::Cow<'_, str> {
    path.to_string_lossy()
}

/// Calculate SHA256 hash of file contents
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> StateStore {
        let config = Config::new(Some(temp_dir.path().join("ls"))).unwrap();
        config.init().unwrap();
        StateStore::open(&config).unwrap()
    }

    #[test]
    fn test_file_state_serialization() {
        let state = FileState::new("abc123".to_string());
        let json = state.to_json().unwrap();
        assert!(json.contains("abc123"));
        assert_eq!(FileState::from_json(&json).unwrap(), state);
    }

    #[test]
    fn test_file_state_ignores_unknown_fields() {
        let json = r#"{"last_modified":12345,"content_hash":"abc","indexed_at":1}"#;
        let state = FileState::from_json(json).unwrap();
        assert_eq!(state.content_hash, "abc");
        assert_eq!(state.indexed_at, 1);
    }

    #[test]
    fn test_state_store_update_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let path = Path::new("/notes/test.md");

        assert!(store.get_file_state(path).unwrap().is_none());

        store.update_file_state(path, "hash123".to_string()).unwrap();

        let state = store.get_file_state(path).unwrap().unwrap();
        assert_eq!(state.content_hash, "hash123");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_state_store_has_file_changed() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let path = Path::new("/notes/new.md");

        assert!(store.has_file_changed(path, "hash1").unwrap());
        store.update_file_state(path, "hash1".to_string()).unwrap();
        assert!(!store.has_file_changed(path, "hash1").unwrap());
        assert!(store.has_file_changed(path, "hash2").unwrap());
    }

    #[test]
    fn test_state_store_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let a = Path::new("/notes/a.md");
        let b = Path::new("/notes/b.md");

        store
            .update_many(&[
                (a, FileState::new("a".to_string())),
                (b, FileState::new("b".to_string())),
            ])
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);

        store.remove_many(&[a, Path::new("/notes/missing.md")]).unwrap();
        assert!(store.get_file_state(a).unwrap().is_none());
        assert!(store.get_file_state(b).unwrap().is_some());

        store.remove_file(b).unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_model_id_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert_eq!(store.get_model_id().unwrap(), None);
        store.set_model_id("hashing-bow-384").unwrap();
        assert_eq!(store.get_model_id().unwrap().as_deref(), Some("hashing-bow-384"));
        // Metadata is not a tracked file
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_all_file_states() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store.update_file_state(Path::new("/n/a.md"), "ha".to_string()).unwrap();
        store.update_file_state(Path::new("/n/b.md"), "hb".to_string()).unwrap();
        store.set_model_id("m").unwrap();

        let states = store.all_file_states().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[Path::new("/n/b.md")].content_hash, "hb");
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = Path::new("/notes/keep.md");
        {
            let store = open_store(&temp_dir);
            store.update_file_state(path, "h".to_string()).unwrap();
        }
        let store = open_store(&temp_dir);
        assert_eq!(store.get_file_state(path).unwrap().unwrap().content_hash, "h");
    }

    #[test]
    fn test_calculate_file_hash() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        fs::write(&test_file, "Hello, world!").unwrap();
        let hash1 = calculate_file_hash(&test_file).unwrap();
        assert_eq!(hash1.len(), 64);
        assert_eq!(hash1, calculate_file_hash(&test_file).unwrap());

        fs::write(&test_file, "Different content").unwrap();
        assert_ne!(hash1, calculate_file_hash(&test_file).unwrap());
    }

    #[test]
    fn test_calculate_file_hash_large_file() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("large.txt");

        // Larger than the read buffer
        fs::write(&test_file, "x".repeat(10000)).unwrap();
        assert_eq!(calculate_file_hash(&test_file).unwrap().len(), 64);
    }
}
