//! Settings loading and hot-reloading.
//! This module provides utilities for loading settings from RON files and watching
//! for changes to enable hot-reloading of settings at runtime.
//!
//! Settings are loaded from RON files in the `data/settings` directory. If multiple
//! RON files are present, the first successfully parsed `Settings` will be used.
//! If no RON files are found or if no parsing succeeds, default settings will be used.
use crate::ron::{load_ron_files, setup_ron_watcher, RonWatcher};
use crate::chunk::ConfigError;
use crate::settings::Settings;
use bevy::log::{info, warn};
use bevy::prelude::{Res, ResMut, Resource};
use std::sync::PoisonError;

pub const SETTINGS_DIR: &str = "data/settings";

#[derive(Resource)]
pub struct SettingsWatcher(pub RonWatcher);

impl SettingsWatcher {
    #[must_use]
    pub fn stub() -> Self {
        SettingsWatcher(RonWatcher::stub())
    }
}

/// Load settings from `path` (directory). If multiple `.ron` files are present
/// the first parsed `Settings` will be used. If none exist the `Default` is used.
///
/// A `streaming` section that fails validation is replaced by the defaults
/// with a warning, so the returned settings always describe a runnable
/// streamer.
///
/// # Arguments
/// * `path` - The directory path where settings RON files are located (e.g., "data/settings").
#[must_use]
pub fn load_settings_from_dir(path: &str) -> Settings {
    let (settings, rejected) = load_settings_checked(path);
    if let Some(e) = rejected {
        warn!("invalid streaming settings in {path}: {e}; using defaults");
    }
    settings
}

/// Like [`load_settings_from_dir`] but hands back the rejected streaming
/// error instead of logging it, for callers that load before logging is up.
#[must_use]
pub fn load_settings_checked(path: &str) -> (Settings, Option<ConfigError>) {
    let mut settings = load_ron_files::<Settings>(path).into_iter().next().unwrap_or_else(Settings::defaults);
    let rejected = settings.streaming.validate().err();
    if rejected.is_some() {
        settings.streaming = Settings::defaults().streaming;
    }
    (settings, rejected)
}

/// Streaming section rejected while loading settings at startup.
#[derive(Resource, Default)]
pub struct RejectedStreamingSettings(pub Option<ConfigError>);

/// Report a startup fallback once the log subscriber exists.
#[allow(clippy::needless_pass_by_value)]
pub fn report_rejected_settings(rejected: Res<RejectedStreamingSettings>) {
    if let Some(e) = &rejected.0 {
        warn!("invalid streaming settings in {SETTINGS_DIR}: {e}; using defaults");
    }
}

/// Create a watcher for the settings directory (hot-reload).
///
/// # Errors
/// Returns the `notify` error if the directory cannot be watched.
pub fn setup_settings_watcher(path: &str) -> Result<SettingsWatcher, notify::Error> {
    setup_ron_watcher(path).map(SettingsWatcher)
}

/// Merge freshly loaded settings into the current ones.
///
/// An invalid `streaming` section is rejected and the running one kept;
/// every other section is taken as loaded.
pub fn merge_reloaded(current: &Settings, mut reloaded: Settings) -> Settings {
    if let Err(e) = reloaded.streaming.validate() {
        warn!("rejected streaming settings: {e}; keeping the previous values");
        reloaded.streaming = current.streaming.clone();
    }
    reloaded
}

/// Check for changes and reload the settings resource when files change.
///
/// # Arguments
/// * `watcher` - The `SettingsWatcher` resource that monitors changes in settings RON files.
/// * `settings` - The mutable `Settings` resource that is updated when changes are detected
#[allow(clippy::needless_pass_by_value)]
pub fn check_settings_changes(watcher: Res<SettingsWatcher>, mut settings: ResMut<Settings>) {
    let mut flag = watcher.0.changed.lock().unwrap_or_else(|poisoned| {
        warn!("settings watcher mutex poisoned, recovering");
        PoisonError::into_inner(poisoned)
    });
    if !*flag {
        return;
    }
    *flag = false;
    drop(flag);

    info!("settings changed, reloading");
    let reloaded = load_ron_files::<Settings>(SETTINGS_DIR).into_iter().next().unwrap_or_else(Settings::defaults);
    *settings = merge_reloaded(&settings, reloaded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_streaming_section_is_rejected_on_reload() {
        let mut current = Settings::defaults();
        current.streaming.load_radius = 3;
        current.streaming.unload_radius = 5;

        let mut reloaded = Settings::defaults();
        reloaded.streaming.load_radius = 9;
        reloaded.streaming.unload_radius = 2;
        reloaded.flight.speed = 10.0;

        let merged = merge_reloaded(&current, reloaded);
        assert_eq!(merged.streaming.load_radius, 3);
        assert!((merged.flight.speed - 10.0).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_streaming_file_falls_back_and_reports() {
        let dir = std::env::temp_dir().join(format!("terrastream-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        std::fs::write(dir.join("settings.ron"), "(streaming: (load_radius: 5, unload_radius: 2), flight: (speed: 7.0))")
            .expect("write");

        let (settings, rejected) = load_settings_checked(dir.to_str().expect("utf-8 path"));
        assert_eq!(rejected, Some(ConfigError::NoHysteresis { load: 5, unload: 2 }));
        assert_eq!(settings.streaming, Settings::defaults().streaming);
        assert!((settings.flight.speed - 7.0).abs() < f32::EPSILON);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_directory_gives_defaults() {
        let settings = load_settings_from_dir("does/not/exist");
        assert_eq!(settings.streaming, Settings::defaults().streaming);
    }
}
