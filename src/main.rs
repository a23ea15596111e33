use bevy::diagnostic::{FrameTimeDiagnosticsPlugin, LogDiagnosticsPlugin};
use bevy::prelude::*;
use bevy::window::{PresentMode, Window, WindowPlugin};
use terrastream::chunk::plugin::TerrainStreamingPlugin;
use terrastream::settings::loader as settings_loader;
use terrastream::ui::{handle_debug_keys, render_chunk_grid, setup_hud, update_hud};

mod app;
use app::{fly_camera, setup, sync_shadow_settings, sync_vsync_settings, toggle_flight_pause, FlightPath};

fn main() {
    // Logging is not up yet; the rejection is reported from a Startup system.
    let (settings, rejected) = settings_loader::load_settings_checked(settings_loader::SETTINGS_DIR);
    let settings_watcher = settings_loader::setup_settings_watcher(settings_loader::SETTINGS_DIR)
        .unwrap_or_else(|_| settings_loader::SettingsWatcher::stub());

    let mut app = App::new();

    app.add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "terrastream".to_string(),
                position: WindowPosition::Centered(MonitorSelection::Primary),
                present_mode: if settings.graphics.vsync { PresentMode::Fifo } else { PresentMode::AutoNoVsync },
                ..default()
            }),
            ..default()
        }))
        .add_plugins(FrameTimeDiagnosticsPlugin)
        .add_plugins(LogDiagnosticsPlugin::default())
        .add_plugins(TerrainStreamingPlugin::from_settings(&settings));

    app.insert_resource(settings);
    app.insert_resource(settings_watcher);
    app.insert_resource(FlightPath::default());
    app.insert_resource(settings_loader::RejectedStreamingSettings(rejected));

    app.add_systems(Startup, (setup, setup_hud, settings_loader::report_rejected_settings));
    app.add_systems(Update, settings_loader::check_settings_changes);
    app.add_systems(Update, (toggle_flight_pause, fly_camera).chain());
    app.add_systems(Update, (handle_debug_keys, update_hud, render_chunk_grid));
    app.add_systems(Update, (sync_vsync_settings, sync_shadow_settings));

    app.run();
}
