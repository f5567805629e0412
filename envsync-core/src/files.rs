//! Working-copy file access.
//!
//! The engine only sees relative, `/`-separated file names. Candidate
//! files are dotenv-style (`.env`, `.env.local`, `.env.production`, ...).

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Directories never descended into while scanning
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
    ".next",
    ".cache",
];

const DEFAULT_SCAN_DEPTH: usize = 4;

/// File enumeration and byte access for one working copy
#[async_trait]
pub trait ProjectFiles: Send + Sync {
    /// Relative names of every syncable config file
    async fn list_candidates(&self) -> io::Result<Vec<String>>;

    /// File contents, or `None` if the file does not exist
    async fn read(&self, file_name: &str) -> io::Result<Option<Vec<u8>>>;

    async fn write(&self, file_name: &str, contents: &[u8]) -> io::Result<()>;
}

/// Whether a directory name is one scanning never descends into
pub fn is_skipped_dir(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

/// Whether a bare file name looks like a dotenv file
pub fn is_candidate(name: &str) -> bool {
    name == ".env" || (name.starts_with(".env.") && name.len() > ".env.".len())
}

/// Count `KEY=value` assignments, skipping blanks and `#` comments.
pub fn count_vars(contents: &[u8]) -> usize {
    String::from_utf8_lossy(contents)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.strip_prefix("export ").unwrap_or(line))
        .filter(|line| matches!(line.find('='), Some(pos) if pos > 0))
        .count()
}

/// Filesystem-backed [`ProjectFiles`] rooted at a working copy
pub struct LocalProjectFiles {
    root: PathBuf,
    max_depth: usize,
}

impl LocalProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_SCAN_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative name, rejecting anything that escapes the root.
    fn resolve(&self, file_name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(file_name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if file_name.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Refusing file name outside the working copy: {}", file_name),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn scan(&self) -> io::Result<Vec<String>> {
        let ignored = read_gitignore(&self.root);
        let mut found = Vec::new();
        walk(&self.root, "", 0, self.max_depth, &ignored, &mut found)?;
        found.sort();
        debug!(root = %self.root.display(), count = found.len(), "Scanned for config files");
        Ok(found)
    }
}

#[async_trait]
impl ProjectFiles for LocalProjectFiles {
    async fn list_candidates(&self) -> io::Result<Vec<String>> {
        self.scan()
    }

    async fn read(&self, file_name: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.resolve(file_name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, file_name: &str, contents: &[u8]) -> io::Result<()> {
        let path = self.resolve(file_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Not a candidate name, so scanners never pick it up
        let tmp = path.with_file_name(format!(".envsync-{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Simple ignore patterns: literal names and `prefix*` globs
struct IgnoreRules {
    literals: Vec<String>,
    prefixes: Vec<String>,
}

impl IgnoreRules {
    fn matches(&self, name: &str) -> bool {
        self.literals.iter().any(|l| l == name)
            || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

fn read_gitignore(root: &Path) -> IgnoreRules {
    let mut rules = IgnoreRules {
        literals: Vec::new(),
        prefixes: Vec::new(),
    };
    let Ok(contents) = std::fs::read_to_string(root.join(".gitignore")) else {
        return rules;
    };

    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let pattern = line.trim_matches('/');
        // Dotenv files are usually gitignored; that is exactly why they need syncing
        if is_candidate(pattern) || pattern.starts_with(".env") {
            continue;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) if !prefix.contains('*') => rules.prefixes.push(prefix.to_string()),
            None if !pattern.contains('*') => rules.literals.push(pattern.to_string()),
            _ => {}
        }
    }
    rules
}

fn walk(
    dir: &Path,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    ignored: &IgnoreRules,
    found: &mut Vec<String>,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };

        if file_type.is_dir() {
            if depth + 1 < max_depth
                && !is_skipped_dir(&name)
                && !ignored.matches(&name)
            {
                walk(&entry.path(), &relative, depth + 1, max_depth, ignored, found)?;
            }
        } else if file_type.is_file() && is_candidate(&name) && !ignored.matches(&name) {
            found.push(relative);
        }
    }
    Ok(())
}
