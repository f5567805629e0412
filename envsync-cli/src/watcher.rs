//! Filesystem notifications feeding local change notifications.

use envsync_core::files::{is_candidate, is_skipped_dir};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watch `root` recursively and send the relative name of every dotenv
/// file that is created, written, renamed or removed. Runs until `cancel`
/// fires or the receiving side goes away.
pub async fn watch(
    root: PathBuf,
    changes: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> notify::Result<()> {
    let root = root.canonicalize().unwrap_or(root);
    let events_root = root.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) => {
            for name in changed_files(&events_root, &event) {
                if tx.send(name).is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "File watch error"),
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "Watching for file changes");

    loop {
        let name = tokio::select! {
            _ = cancel.cancelled() => break,
            name = rx.recv() => match name {
                Some(name) => name,
                None => break,
            },
        };

        // Deleted files are reported too so the engine can spot ghosts
        debug!(file_name = %name, "Detected local change");
        if changes.send(name).await.is_err() {
            break;
        }
    }

    drop(watcher);
    Ok(())
}

/// Relative dotenv names touched by one notification.
fn changed_files(root: &Path, event: &Event) -> Vec<String> {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => {}
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => {}
        _ => return Vec::new(),
    }

    let mut names: Vec<String> = event
        .paths
        .iter()
        .filter_map(|path| relative_candidate(root, path))
        .collect();
    names.dedup();
    names
}

fn relative_candidate(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }

    let (file_name, dirs) = parts.split_last()?;
    if !is_candidate(file_name) || dirs.iter().any(|dir| is_skipped_dir(dir)) {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

    fn root() -> PathBuf {
        PathBuf::from("/work/app")
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(root().join(path)))
    }

    #[test]
    fn reports_dotenv_writes_by_relative_name() {
        let write = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[".env", "services/api/.env.local"],
        );
        assert_eq!(
            changed_files(&root(), &write),
            vec![".env".to_string(), "services/api/.env.local".to_string()]
        );
    }

    #[test]
    fn reports_creation_removal_and_rename_targets() {
        let created = event(EventKind::Create(CreateKind::File), &[".env.test"]);
        let removed = event(EventKind::Remove(RemoveKind::File), &[".env"]);
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[".envsync-1234.tmp", ".env"],
        );

        assert_eq!(changed_files(&root(), &created), vec![".env.test".to_string()]);
        assert_eq!(changed_files(&root(), &removed), vec![".env".to_string()]);
        assert_eq!(changed_files(&root(), &renamed), vec![".env".to_string()]);
    }

    #[test]
    fn ignores_other_files_and_skipped_directories() {
        let write = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            &["src/main.rs", ".env.", "node_modules/pkg/.env", ".git/.env"],
        );
        assert!(changed_files(&root(), &write).is_empty());
    }

    #[test]
    fn ignores_metadata_and_access_events() {
        let touched = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            &[".env"],
        );
        let accessed = event(EventKind::Access(notify::event::AccessKind::Any), &[".env"]);
        assert!(changed_files(&root(), &touched).is_empty());
        assert!(changed_files(&root(), &accessed).is_empty());
    }

    #[test]
    fn ignores_paths_outside_the_working_copy() {
        let mut write = Event::new(EventKind::Modify(ModifyKind::Any));
        write = write.add_path(PathBuf::from("/elsewhere/.env"));
        assert!(changed_files(&root(), &write).is_empty());
    }
}
