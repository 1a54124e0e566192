use crate::core::error::{Error, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::{Match, WalkBuilder};
use std::cmp::Reverse;
use std::path::{Path, PathBuf};

/// Kind of content a file carries, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Markdown,
    Pdf,
    Image,
    Audio,
}

impl ContentKind {
    /// Classify a path by its (case-insensitive) extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Text),
            "md" | "markdown" | "mdown" | "mkd" | "mkdn" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff" => Some(Self::Image),
            "wav" | "mp3" | "flac" | "ogg" | "m4a" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Whether entries of this kind keep extracted text for previews
    pub fn has_text(self) -> bool {
        matches!(self, Self::Text | Self::Markdown | Self::Pdf)
    }
}

/// Represents a discovered file with its metadata
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Canonical absolute path
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub kind: ContentKind,
}

/// Walker shared by discovery and ignore-rule loading.
///
/// `.gitignore` applies whether or not the root is a git checkout.
fn walker(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false);
    builder
}

/// Whether `path` names a file holding ignore rules
pub fn is_ignore_file(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some(".gitignore") | Some(".ignore")
    )
}

/// The ignore rules `discover_files` walks with, for checking single paths
/// reported by the watcher.
#[derive(Debug, Default)]
pub struct IgnoreRules {
    /// Deepest directory first
    matchers: Vec<Gitignore>,
}

impl IgnoreRules {
    /// Collect every ignore file under `root` that the walker itself would read
    pub fn load(root: &Path) -> Result<Self> {
        let root = root.canonicalize()?;
        // (depth, precedence within a directory)
        let mut ranked: Vec<((usize, u8), Gitignore)> = Vec::new();

        for entry in walker(&root).build().flatten() {
            let path = entry.path();
            if !is_ignore_file(path) || !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let (matcher, err) = Gitignore::new(path);
            if let Some(err) = err {
                tracing::warn!(path = %path.display(), error = %err, "invalid ignore rule");
            }
            if matcher.is_empty() {
                continue;
            }
            let precedence = if path.ends_with(".ignore") { 2 } else { 1 };
            ranked.push(((matcher.path().components().count(), precedence), matcher));
        }

        let exclude = root.join(".git").join("info").join("exclude");
        if exclude.is_file() {
            let mut builder = GitignoreBuilder::new(&root);
            if let Some(err) = builder.add(&exclude) {
                tracing::warn!(path = %exclude.display(), error = %err, "invalid ignore rule");
            }
            match builder.build() {
                Ok(matcher) if !matcher.is_empty() => {
                    ranked.push(((root.components().count(), 0), matcher));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %exclude.display(), error = %e, "invalid ignore rule"),
            }
        }

        ranked.sort_by_key(|(rank, _)| Reverse(*rank));
        tracing::debug!(root = %root.display(), files = ranked.len(), "loaded ignore rules");
        Ok(Self {
            matchers: ranked.into_iter().map(|(_, matcher)| matcher).collect(),
        })
    }

    /// Whether `path` (canonical) or one of its parent directories is ignored
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        for matcher in &self.matchers {
            if !path.starts_with(matcher.path()) {
                continue;
            }
            match matcher.matched_path_or_any_parents(path, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }
}

/// Discover all supported files under `root`, respecting .gitignore rules.
///
/// Results are sorted by path so repeated runs visit files in the same order.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    if !root.exists() {
        return Err(Error::Config(format!(
            "Directory does not exist: {}",
            root.display()
        )));
    }

    if !root.is_dir() {
        return Err(Error::Config(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let root = root.canonicalize()?;
    let mut files = Vec::new();

    for result in walker(&root).build() {
        match result {
            Ok(entry) => {
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }

                let path = entry.path();
                let Some(kind) = ContentKind::from_path(path) else {
                    continue;
                };

                let relative_path = path
                    .strip_prefix(&root)
                    .map_err(|e| {
                        Error::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Failed to get relative path: {}", e),
                        ))
                    })?
                    .to_path_buf();

                files.push(DiscoveredFile {
                    path: path.to_path_buf(),
                    relative_path,
                    kind,
                });
            }
            Err(err) => {
                // Some files might be inaccessible; keep walking
                tracing::warn!(error = %err, "failed to access file");
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Canonical absolute form of a path reported by the watcher.
///
/// A deleted file cannot be canonicalized, so its parent is resolved instead
/// and the file name re-attached; failing that the path is returned as is.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_content_kind() {
        assert_eq!(ContentKind::from_path(Path::new("a.txt")), Some(ContentKind::Text));
        assert_eq!(ContentKind::from_path(Path::new("a.MD")), Some(ContentKind::Markdown));
        assert_eq!(ContentKind::from_path(Path::new("a.mkdn")), Some(ContentKind::Markdown));
        assert_eq!(ContentKind::from_path(Path::new("a.Pdf")), Some(ContentKind::Pdf));
        assert_eq!(ContentKind::from_path(Path::new("a.jpeg")), Some(ContentKind::Image));
        assert_eq!(ContentKind::from_path(Path::new("a.flac")), Some(ContentKind::Audio));
        assert_eq!(ContentKind::from_path(Path::new("a.js")), None);
        assert_eq!(ContentKind::from_path(Path::new("Makefile")), None);

        assert!(ContentKind::Pdf.has_text());
        assert!(!ContentKind::Image.has_text());
        assert!(!ContentKind::Audio.has_text());
    }

    #[test]
    fn test_discover_files_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("notes");
        fs::create_dir_all(root.join("sub")).unwrap();

        fs::write(root.join("zeta.md"), "# Z").unwrap();
        fs::write(root.join("alpha.txt"), "a").unwrap();
        fs::write(root.join("photo.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("script.js"), "// no").unwrap();
        fs::write(root.join("sub").join("beta.md"), "# B").unwrap();

        let files = discover_files(&root).unwrap();
        let relative: Vec<String> = files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(relative, vec!["alpha.txt", "photo.png", "sub/beta.md", "zeta.md"]);
        assert!(files.iter().all(|f| f.path.is_absolute()));
        assert_eq!(files[1].kind, ContentKind::Image);
    }

    #[test]
    fn test_discover_files_respects_gitignore() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("notes");
        fs::create_dir_all(root.join("private")).unwrap();

        fs::write(root.join(".gitignore"), "private/\n").unwrap();
        fs::write(root.join("public.md"), "# P").unwrap();
        fs::write(root.join("private").join("secret.md"), "# S").unwrap();

        let files = discover_files(&root).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("public.md"));
    }

    #[test]
    fn test_ignore_rules_match_discovery() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("notes");
        fs::create_dir_all(root.join("private")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();

        fs::write(root.join(".gitignore"), "private/\n*.pdf\n").unwrap();
        fs::write(root.join("drafts").join(".gitignore"), "!keep.pdf\nscratch.md\n").unwrap();
        fs::write(root.join("public.md"), "# P").unwrap();
        fs::write(root.join("old.pdf"), "x").unwrap();
        fs::write(root.join("private").join("secret.md"), "# S").unwrap();
        fs::write(root.join("drafts").join("keep.pdf"), "x").unwrap();
        fs::write(root.join("drafts").join("scratch.md"), "# D").unwrap();
        fs::write(root.join("drafts").join("idea.md"), "# I").unwrap();

        let root = root.canonicalize().unwrap();
        let rules = IgnoreRules::load(&root).unwrap();
        let discovered: Vec<PathBuf> = discover_files(&root)
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();

        for name in [
            "public.md",
            "old.pdf",
            "private/secret.md",
            "drafts/keep.pdf",
            "drafts/scratch.md",
            "drafts/idea.md",
        ] {
            let path = root.join(name);
            assert_eq!(
                rules.is_ignored(&path, false),
                !discovered.contains(&path),
                "{}",
                name
            );
        }
        assert!(rules.is_ignored(&root.join("private"), true));
        assert!(!rules.is_ignored(Path::new("/elsewhere/old.pdf"), false));
    }

    #[test]
    fn test_is_ignore_file() {
        assert!(is_ignore_file(Path::new("/n/.gitignore")));
        assert!(is_ignore_file(Path::new("/n/sub/.ignore")));
        assert!(!is_ignore_file(Path::new("/n/gitignore.md")));
    }

    #[test]
    fn test_discover_files_nonexistent_directory() {
        assert!(discover_files(Path::new("/nonexistent/directory")).is_err());
    }

    #[test]
    fn test_discover_files_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("file.txt");
        fs::write(&test_file, "content").unwrap();

        assert!(discover_files(&test_file).is_err());
    }

    #[test]
    fn test_normalize_path_of_deleted_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("gone.md");
        fs::write(&file, "x").unwrap();
        let canonical = file.canonicalize().unwrap();
        fs::remove_file(&file).unwrap();

        assert_eq!(normalize_path(&file), canonical);
    }
}
