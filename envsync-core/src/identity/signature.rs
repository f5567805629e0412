//! Content signatures for working copies without a usable remote.
//!
//! A manifest signature (`name@version`, plus the declared repository) is
//! preferred. Otherwise a structure signature lists well-known project
//! files and directories found near the root.

use super::normalize::normalize_remote_url;
use std::path::Path;

/// Directories skipped by every scan in this module
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
    ".next",
    ".cache",
    "coverage",
];

/// Names that characterize a project's layout
const SIGNAL_NAMES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "go.mod",
    "Gemfile",
    "composer.json",
    "pom.xml",
    "build.gradle",
    "Makefile",
    "Dockerfile",
    "docker-compose.yml",
    "README.md",
    "src",
    "lib",
    "app",
    "cmd",
    "pkg",
    "packages",
    "apps",
    "services",
    "tests",
    "test",
    "docs",
    ".github",
];

/// Files that mark a sub-project
const MANIFESTS: &[&str] = &["package.json", "Cargo.toml", "pyproject.toml", "go.mod"];

const STRUCTURE_DEPTH: usize = 2;

/// `name@version[|repository]` from the first manifest found in `dir`.
pub fn manifest_signature(dir: &Path) -> Option<String> {
    package_json(dir)
        .or_else(|| cargo_toml(dir))
        .or_else(|| pyproject_toml(dir))
        .or_else(|| go_mod(dir))
}

/// Sorted, depth-bounded list of signal names, or `None` if nothing matched.
pub fn structure_signature(dir: &Path) -> Option<String> {
    let mut signals = Vec::new();
    collect_signals(dir, "", 0, &mut signals);
    if signals.is_empty() {
        return None;
    }
    signals.sort();
    Some(format!("structure:{}", signals.join(",")))
}

/// The content-signature fallback: manifest first, then structure, then
/// the directory name as a last resort.
pub fn content_signature(dir: &Path) -> String {
    manifest_signature(dir)
        .or_else(|| structure_signature(dir))
        .unwrap_or_else(|| {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("dir:{}", name)
        })
}

/// Whether `dir` is the root of a multi-package repository.
pub fn is_monorepo(dir: &Path) -> bool {
    const MARKERS: &[&str] = &[
        "pnpm-workspace.yaml",
        "lerna.json",
        "nx.json",
        "turbo.json",
        "rush.json",
        "go.work",
    ];
    if MARKERS.iter().any(|m| dir.join(m).is_file()) {
        return true;
    }

    let has_workspaces = read_json(&dir.join("package.json"))
        .map(|pkg| pkg.get("workspaces").is_some())
        .unwrap_or(false);
    let has_cargo_workspace = read_toml(&dir.join("Cargo.toml"))
        .map(|manifest| manifest.get("workspace").is_some())
        .unwrap_or(false);
    has_workspaces || has_cargo_workspace
}

/// Relative paths of directories below `dir` that carry their own manifest.
pub fn find_sub_projects(dir: &Path, max_depth: usize) -> Vec<String> {
    let mut found = Vec::new();
    scan_sub_projects(dir, "", 0, max_depth, &mut found);
    found.sort();
    found
}

fn scan_sub_projects(dir: &Path, prefix: &str, depth: usize, max_depth: usize, found: &mut Vec<String>) {
    if depth >= max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.path().is_dir() || SKIPPED_DIRS.contains(&name.as_str()) || name.starts_with('.') {
            continue;
        }
        let relative = join(prefix, &name);
        if MANIFESTS.iter().any(|m| entry.path().join(m).is_file()) {
            found.push(relative.clone());
        }
        scan_sub_projects(&entry.path(), &relative, depth + 1, max_depth, found);
    }
}

fn collect_signals(dir: &Path, prefix: &str, depth: usize, signals: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if SKIPPED_DIRS.contains(&name.as_str()) {
            continue;
        }
        let relative = join(prefix, &name);
        if SIGNAL_NAMES.contains(&name.as_str()) {
            signals.push(relative.clone());
        }
        if entry.path().is_dir() && depth + 1 < STRUCTURE_DEPTH {
            collect_signals(&entry.path(), &relative, depth + 1, signals);
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn signature(name: &str, version: Option<&str>, repository: Option<&str>) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut out = format!("{}@{}", name, version.unwrap_or("0.0.0"));
    if let Some(repo) = repository.filter(|r| !r.trim().is_empty()) {
        out.push('|');
        out.push_str(&normalize_remote_url(repo));
    }
    Some(format!("manifest:{}", out))
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn read_toml(path: &Path) -> Option<toml::Table> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.parse::<toml::Table>().ok()
}

fn package_json(dir: &Path) -> Option<String> {
    let pkg = read_json(&dir.join("package.json"))?;
    let repository = match pkg.get("repository") {
        Some(serde_json::Value::String(url)) => Some(url.as_str()),
        Some(obj) => obj.get("url").and_then(|u| u.as_str()),
        None => None,
    };
    signature(
        pkg.get("name")?.as_str()?,
        pkg.get("version").and_then(|v| v.as_str()),
        repository,
    )
}

fn cargo_toml(dir: &Path) -> Option<String> {
    let manifest = read_toml(&dir.join("Cargo.toml"))?;
    let package = manifest.get("package")?.as_table()?;
    signature(
        package.get("name")?.as_str()?,
        package.get("version").and_then(|v| v.as_str()),
        package.get("repository").and_then(|v| v.as_str()),
    )
}

fn pyproject_toml(dir: &Path) -> Option<String> {
    let manifest = read_toml(&dir.join("pyproject.toml"))?;
    let project = manifest
        .get("project")
        .or_else(|| manifest.get("tool")?.get("poetry"))?;
    let repository = project.get("repository").and_then(|v| v.as_str()).or_else(|| {
        project
            .get("urls")?
            .as_table()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("repository"))
            .and_then(|(_, v)| v.as_str())
    });
    signature(
        project.get("name")?.as_str()?,
        project.get("version").and_then(|v| v.as_str()),
        repository,
    )
}

fn go_mod(dir: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(dir.join("go.mod")).ok()?;
    let module = contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("module "))?;
    signature(module, None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn package_json_signature_includes_repository() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"name":"widgets","version":"1.2.0","repository":{"type":"git","url":"git+https://github.com/acme/widgets.git"}}"#,
        );
        let sig = manifest_signature(dir.path()).unwrap();
        assert!(sig.starts_with("manifest:widgets@1.2.0|"));
        assert!(sig.ends_with("github.com/acme/widgets"));
    }

    #[test]
    fn cargo_and_pyproject_signatures() {
        let cargo = TempDir::new().unwrap();
        write(
            cargo.path(),
            "Cargo.toml",
            "[package]\nname = \"gadget\"\nversion = \"0.3.1\"\n",
        );
        assert_eq!(
            manifest_signature(cargo.path()).as_deref(),
            Some("manifest:gadget@0.3.1")
        );

        let poetry = TempDir::new().unwrap();
        write(
            poetry.path(),
            "pyproject.toml",
            "[tool.poetry]\nname = \"svc\"\nversion = \"2.0\"\n",
        );
        assert_eq!(
            manifest_signature(poetry.path()).as_deref(),
            Some("manifest:svc@2.0")
        );
    }

    #[test]
    fn structure_signature_is_order_independent_and_skips_deps() {
        let a = TempDir::new().unwrap();
        write(a.path(), "src/main.py", "");
        write(a.path(), "Makefile", "");
        write(a.path(), "node_modules/lib/package.json", "{}");

        let b = TempDir::new().unwrap();
        write(b.path(), "Makefile", "");
        write(b.path(), "src/other.py", "");

        let sig_a = structure_signature(a.path()).unwrap();
        assert_eq!(sig_a, "structure:Makefile,src");
        assert_eq!(sig_a, structure_signature(b.path()).unwrap());
    }

    #[test]
    fn empty_directory_falls_back_to_name() {
        let dir = TempDir::new().unwrap();
        let sig = content_signature(dir.path());
        assert!(sig.starts_with("dir:"));
        assert_eq!(sig, content_signature(dir.path()));
    }

    #[test]
    fn monorepo_detection_and_sub_projects() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        assert!(!is_monorepo(root));

        write(root, "package.json", r#"{"name":"root","workspaces":["packages/*"]}"#);
        write(root, "packages/api/package.json", r#"{"name":"api"}"#);
        write(root, "packages/web/package.json", r#"{"name":"web"}"#);
        write(root, "node_modules/dep/package.json", r#"{"name":"dep"}"#);

        assert!(is_monorepo(root));
        assert_eq!(
            find_sub_projects(root, 3),
            vec!["packages/api", "packages/web"]
        );
    }

    #[test]
    fn cargo_workspace_is_monorepo() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Cargo.toml", "[workspace]\nmembers = [\"a\"]\n");
        assert!(is_monorepo(dir.path()));
        assert_eq!(manifest_signature(dir.path()), None);
    }
}
