//! Display-related systems, such as syncing vsync
//! settings from the main `Settings` resource to the primary window's present mode.
use bevy::prelude::*;
use bevy::window::{PresentMode, PrimaryWindow};
use terrastream::settings::Settings;

/// Sync `Settings.graphics.vsync` into the present mode of the primary window.
/// Allows the user to toggle vsync at runtime without restarting.
#[allow(clippy::needless_pass_by_value)]
pub fn sync_vsync_settings(
    settings: Res<Settings>,
    mut windows: Query<&mut Window, With<PrimaryWindow>>,
    mut last: Local<Option<bool>>,
) {
    let desired = settings.graphics.vsync;
    if *last == Some(desired) {
        return;
    }

    for mut w in &mut windows {
        w.present_mode = if desired { PresentMode::Fifo } else { PresentMode::AutoNoVsync };
    }
    *last = Some(desired);
}

/// Sync `Settings.graphics.shadows` into every directional light.
#[allow(clippy::needless_pass_by_value)]
pub fn sync_shadow_settings(
    settings: Res<Settings>,
    mut lights: Query<&mut DirectionalLight>,
    mut last: Local<Option<bool>>,
) {
    let desired = settings.graphics.shadows;
    if *last == Some(desired) {
        return;
    }
    for mut light in &mut lights {
        light.shadows_enabled = desired;
    }
    *last = Some(desired);
}
