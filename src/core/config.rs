use super::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default debounce window for filesystem events
const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Default number of search results
const DEFAULT_LIMIT: usize = 10;

/// Configuration for latent-search
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for latent-search data
    pub base_dir: PathBuf,
    /// Directory holding the persisted matrix and path list
    pub embeddings_dir: PathBuf,
    /// Directory for cached models
    pub models_dir: PathBuf,
    /// Path to the state store
    pub state_path: PathBuf,
    /// How long the watcher waits for a burst of events to settle
    pub debounce: Duration,
    /// Number of results returned when the caller does not ask for a limit
    pub default_limit: usize,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".latent-search"))
    }

    /// Create a new configuration
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = match base_dir {
            Some(dir) => dir,
            None => Self::default_base_dir()?,
        };

        Ok(Self {
            embeddings_dir: base_dir.join("embeddings"),
            models_dir: base_dir.join("models"),
            state_path: base_dir.join("state").join("state.redb"),
            base_dir,
            debounce: DEFAULT_DEBOUNCE,
            default_limit: DEFAULT_LIMIT,
        })
    }

    /// Override the watcher debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Path of the persisted embedding matrix
    pub fn matrix_path(&self) -> PathBuf {
        self.embeddings_dir.join("matrix.bin")
    }

    /// Path of the persisted, row-aligned path list
    pub fn files_path(&self) -> PathBuf {
        self.embeddings_dir.join("files.json")
    }

    /// Initialize the configuration directories
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.embeddings_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        std::fs::create_dir_all(self.state_dir())?;
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.embeddings_dir.exists()
    }

    fn state_dir(&self) -> &Path {
        self.state_path.parent().unwrap_or(&self.base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_layout() {
        let temp_dir = TempDir::new().unwrap();
        let base_dir = temp_dir.path().join("ls");
        let config = Config::new(Some(base_dir.clone())).unwrap();

        assert_eq!(config.matrix_path(), base_dir.join("embeddings").join("matrix.bin"));
        assert_eq!(config.files_path(), base_dir.join("embeddings").join("files.json"));
        assert_eq!(config.debounce, Duration::from_secs(2));
        assert_eq!(config.default_limit, 10);
    }

    #[test]
    fn test_config_init() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(Some(temp_dir.path().join("ls"))).unwrap();

        assert!(!config.is_initialized());
        config.init().unwrap();
        assert!(config.is_initialized());
        assert!(config.models_dir.exists());
        assert!(config.state_path.parent().unwrap().exists());
    }
}
