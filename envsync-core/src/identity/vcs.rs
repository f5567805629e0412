//! Version-control remote discovery.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A configured remote of a working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsRemote {
    pub name: String,
    pub url: String,
}

/// Lists the remotes configured for a working copy
pub trait VcsRemoteLookup: Send + Sync {
    fn remotes(&self, working_copy: &Path) -> io::Result<Vec<VcsRemote>>;
}

/// Pick the remote that names the project: `origin`, then `upstream`,
/// then whichever is listed first.
pub fn preferred_remote(remotes: &[VcsRemote]) -> Option<&VcsRemote> {
    remotes
        .iter()
        .find(|r| r.name == "origin")
        .or_else(|| remotes.iter().find(|r| r.name == "upstream"))
        .or_else(|| remotes.first())
}

/// Reads remotes straight from git's config files.
///
/// A `.git` *file* (`gitdir: ...`) as used by submodules and linked
/// worktrees is followed. Worktrees resolve to the parent repository via
/// `commondir`; a submodule without remotes of its own falls back to its
/// superproject.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitConfigLookup;

impl GitConfigLookup {
    pub fn new() -> Self {
        Self
    }

    /// Locate the git directory for `working_copy`, searching upwards.
    pub fn git_dir(working_copy: &Path) -> io::Result<Option<PathBuf>> {
        for dir in working_copy.ancestors() {
            let dot_git = dir.join(".git");
            if dot_git.is_dir() {
                return Ok(Some(dot_git));
            }
            if dot_git.is_file() {
                return follow_gitdir_file(&dot_git).map(Some);
            }
        }
        Ok(None)
    }
}

impl VcsRemoteLookup for GitConfigLookup {
    fn remotes(&self, working_copy: &Path) -> io::Result<Vec<VcsRemote>> {
        let Some(git_dir) = Self::git_dir(working_copy)? else {
            return Ok(Vec::new());
        };
        let common = common_dir(&git_dir)?;
        let remotes = read_remotes(&common.join("config"))?;
        if !remotes.is_empty() {
            return Ok(remotes);
        }

        match superproject_git_dir(&common) {
            Some(parent) => {
                debug!(parent = %parent.display(), "Falling back to superproject remotes");
                read_remotes(&parent.join("config"))
            }
            None => Ok(remotes),
        }
    }
}

fn follow_gitdir_file(dot_git: &Path) -> io::Result<PathBuf> {
    let contents = std::fs::read_to_string(dot_git)?;
    let target = contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("gitdir:"))
        .map(str::trim)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has no gitdir pointer", dot_git.display()),
            )
        })?;

    let base = dot_git.parent().unwrap_or(Path::new("."));
    Ok(base.join(target))
}

/// Worktrees keep shared state (including config) in `commondir`
fn common_dir(git_dir: &Path) -> io::Result<PathBuf> {
    match std::fs::read_to_string(git_dir.join("commondir")) {
        Ok(contents) => Ok(git_dir.join(contents.trim())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(git_dir.to_path_buf()),
        Err(e) => Err(e),
    }
}

/// `<super>/.git/modules/<name>` → `<super>/.git`
fn superproject_git_dir(git_dir: &Path) -> Option<PathBuf> {
    let mut seen_modules = false;
    for ancestor in git_dir.ancestors().skip(1) {
        match ancestor.file_name().and_then(|n| n.to_str()) {
            Some("modules") => seen_modules = true,
            Some(".git") if seen_modules => return Some(ancestor.to_path_buf()),
            _ => {}
        }
    }
    None
}

fn read_remotes(config: &Path) -> io::Result<Vec<VcsRemote>> {
    match std::fs::read_to_string(config) {
        Ok(contents) => Ok(parse_remotes(&contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Extract `[remote "name"] url = ...` entries from a git config file.
pub fn parse_remotes(config: &str) -> Vec<VcsRemote> {
    let mut remotes = Vec::new();
    let mut current: Option<String> = None;

    for line in config.lines().map(str::trim) {
        if line.starts_with('[') {
            current = line
                .strip_prefix("[remote \"")
                .and_then(|rest| rest.strip_suffix("\"]"))
                .map(str::to_string);
            continue;
        }
        let Some(name) = &current else { continue };
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "url" && !remotes.iter().any(|r: &VcsRemote| &r.name == name) {
                remotes.push(VcsRemote {
                    name: name.clone(),
                    url: value.trim().to_string(),
                });
            }
        }
    }
    remotes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"[core]
	repositoryformatversion = 0
[remote "upstream"]
	url = https://github.com/original/widgets.git
	fetch = +refs/heads/*:refs/remotes/upstream/*
[remote "origin"]
	url = git@github.com:acme/widgets.git
[branch "main"]
	remote = origin
"#;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn parses_remotes_and_prefers_origin() {
        let remotes = parse_remotes(CONFIG);
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].name, "upstream");
        assert_eq!(
            preferred_remote(&remotes).unwrap().url,
            "git@github.com:acme/widgets.git"
        );

        let only_upstream = &remotes[..1];
        assert_eq!(preferred_remote(only_upstream).unwrap().name, "upstream");
        assert!(preferred_remote(&[]).is_none());
    }

    #[test]
    fn plain_repository_from_subdirectory() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join(".git/config"), CONFIG);
        std::fs::create_dir_all(dir.path().join("packages/api")).unwrap();

        let remotes = GitConfigLookup
            .remotes(&dir.path().join("packages/api"))
            .unwrap();
        assert_eq!(remotes.len(), 2);
    }

    #[test]
    fn worktree_follows_commondir_to_parent() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("main");
        write(&main.join(".git/config"), CONFIG);
        write(&main.join(".git/worktrees/feature/commondir"), "../..\n");

        let worktree = dir.path().join("feature");
        write(
            &worktree.join(".git"),
            &format!("gitdir: {}\n", main.join(".git/worktrees/feature").display()),
        );

        let remotes = GitConfigLookup.remotes(&worktree).unwrap();
        assert_eq!(
            preferred_remote(&remotes).unwrap().url,
            "git@github.com:acme/widgets.git"
        );
    }

    #[test]
    fn submodule_without_remote_uses_superproject() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join(".git/config"), CONFIG);
        write(&root.join(".git/modules/lib/config"), "[core]\n\tbare = false\n");
        write(&root.join("lib/.git"), "gitdir: ../.git/modules/lib\n");

        let remotes = GitConfigLookup.remotes(&root.join("lib")).unwrap();
        assert_eq!(remotes.len(), 2);
    }
}
