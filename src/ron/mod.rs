//! Utilities for loading RON files and watching directories for changes.
//!
//! This module provides a small helper for reading RON files from disk
//! and a simple filesystem watcher resource that sets a shared boolean when
//! files change. The watcher is used for hot-reloading the settings during
//! a streaming session.

use bevy::log::warn;
use bevy::prelude::Resource;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Resource)]
/// File-watcher resource for RON hot-reload.
pub struct RonWatcher {
    pub changed: Arc<Mutex<bool>>, // Shared boolean set to `true` when watched files change.
    _watcher: Option<notify::RecommendedWatcher>, // watcher handle kept to prevent immediate drop.
}

impl RonWatcher {
    /// Create a stub `RonWatcher` that does not have an active OS watcher.
    ///
    /// Useful as a fallback when watcher creation fails or when running on
    /// platforms without notify support.
    #[must_use]
    pub fn stub() -> Self {
        RonWatcher { changed: Arc::new(Mutex::new(false)), _watcher: None }
    }
}

/// Load all `.ron` files from a directory and deserialize them into `T`.
///
/// Files are visited in file-name order so "first file wins" callers are
/// deterministic. Files that fail to parse are skipped with a warning.
///
/// # Arguments
/// * `path` - Directory path to scan for `.ron` files.
#[must_use]
pub fn load_ron_files<T: DeserializeOwned>(path: &str) -> Vec<T> {
    let Ok(entries) = std::fs::read_dir(path) else { return Vec::new() };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "ron"))
        .collect();
    paths.sort();

    let mut items = Vec::new();
    for p in paths {
        let Ok(content) = std::fs::read_to_string(&p) else { continue };
        match ron::from_str::<T>(&content) {
            Ok(item) => items.push(item),
            Err(e) => warn!("failed to parse {}: {e}", p.display()),
        }
    }
    items
}

/// Create a `RonWatcher` that watches a directory for modifications.
///
/// The returned watcher's `changed` flag is set to `true` whenever a file
/// under the watched directory is created or modified.
///
/// # Errors
/// Returns a `notify::Error` if the underlying file-watcher cannot be
/// created or the watcher cannot be registered for the provided path.
pub fn setup_ron_watcher(path: &str) -> Result<RonWatcher, notify::Error> {
    let changed = Arc::new(Mutex::new(false));
    let changed_clone = changed.clone();
    // Resolve watched path to a canonical form if possible so we can filter events
    let watched_path: PathBuf = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));

    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                    return;
                }
                let relevant = event.paths.iter().any(|p| {
                    std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()).starts_with(&watched_path)
                });
                if relevant {
                    *changed_clone.lock().unwrap_or_else(PoisonError::into_inner) = true;
                }
            }
            Err(e) => warn!("watch error: {e:?}"),
        },
        Config::default(),
    )?;

    watcher.watch(Path::new(path), RecursiveMode::NonRecursive)?;
    Ok(RonWatcher { changed, _watcher: Some(watcher) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        value: u32,
    }

    #[test]
    fn loads_ron_files_in_name_order_and_skips_bad_ones() {
        let dir = std::env::temp_dir().join(format!("terrastream-ron-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        std::fs::write(dir.join("b.ron"), "(value: 2)").expect("write");
        std::fs::write(dir.join("a.ron"), "(value: 1)").expect("write");
        std::fs::write(dir.join("c.ron"), "(value: \"nope\")").expect("write");
        std::fs::write(dir.join("notes.txt"), "(value: 9)").expect("write");

        let items: Vec<Probe> = load_ron_files(dir.to_str().expect("utf-8 path"));
        assert_eq!(items, vec![Probe { value: 1 }, Probe { value: 2 }]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stub_watcher_never_fires() {
        let watcher = RonWatcher::stub();
        assert!(!*watcher.changed.lock().expect("lock"));
    }
}
