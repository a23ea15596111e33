//! HUD and debug drawing for the streaming demo.
//!
//! The overlay shows FPS, the camera position and the streamer's queue,
//! in-flight, resident and blacklist counts alongside its running totals.
//! The chunk grid draws an outline around every resident chunk, coloured by
//! the resolution band it was built at.

use crate::chunk::mesh::TerrainChunk;
use crate::chunk::plugin::TerrainStreamer;
use crate::chunk::ResolutionBand;
use crate::settings::Settings;
use bevy::diagnostic::{Diagnostic, DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;

/// State for the HUD visibility.
#[derive(Resource)]
pub struct HudState {
    pub visible: bool,
}

impl Default for HudState {
    fn default() -> Self {
        Self { visible: true }
    }
}

#[derive(Resource, Default)]
pub struct HudTimer(pub Timer);

#[derive(Resource, Default)]
pub struct ChunkGridVisible(pub bool);

#[derive(Component)]
pub struct HudText;

/// Band colours, finest first. Bands past the palette reuse the last colour.
const BAND_COLORS: [Color; 4] = [
    Color::srgb(0.2, 1.0, 0.3),
    Color::srgb(0.9, 0.9, 0.2),
    Color::srgb(1.0, 0.55, 0.1),
    Color::srgb(0.9, 0.2, 0.2),
];

/// Outline colour for a chunk built at `resolution`. Resolutions missing
/// from the table get the coarsest colour.
#[must_use]
pub fn band_color(bands: &[ResolutionBand], resolution: u32) -> Color {
    let coarsest = BAND_COLORS.len() - 1;
    let band = bands.iter().position(|b| b.resolution == resolution).unwrap_or(coarsest);
    BAND_COLORS[band.min(coarsest)]
}

/// Insert HUD resources and spawn the overlay text.
pub fn setup_hud(mut commands: Commands) {
    commands.insert_resource(HudTimer(Timer::from_seconds(0.25, TimerMode::Repeating)));
    commands.insert_resource(HudState::default());
    commands.insert_resource(ChunkGridVisible::default());

    commands.spawn((
        TextBundle {
            text: Text::from_section(
                "",
                TextStyle { font_size: 16.0, color: Color::srgb(1.0, 1.0, 0.0), ..default() },
            ),
            style: Style {
                position_type: PositionType::Absolute,
                left: Val::Px(10.0),
                top: Val::Px(10.0),
                ..default()
            },
            ..default()
        },
        HudText,
    ));
}

/// Handle the HUD, grid and streaming-debug keybinds.
#[allow(clippy::needless_pass_by_value)]
pub fn handle_debug_keys(
    input: Res<ButtonInput<KeyCode>>,
    settings: Option<Res<Settings>>,
    mut hud: ResMut<HudState>,
    mut grid: ResMut<ChunkGridVisible>,
    streamer: Option<ResMut<TerrainStreamer>>,
) {
    let controls = settings.map(|s| s.controls.clone()).unwrap_or_default();
    if input.just_pressed(controls.key_for("toggle_hud", KeyCode::F1)) {
        hud.visible = !hud.visible;
    }
    if input.just_pressed(controls.key_for("toggle_grid", KeyCode::F2)) {
        grid.0 = !grid.0;
    }
    if input.just_pressed(controls.key_for("toggle_streaming_debug", KeyCode::F3))
        && let Some(mut streamer) = streamer
    {
        let enabled = !streamer.0.config().debug;
        streamer.0.set_debug(enabled);
        info!("streaming debug logging {}", if enabled { "on" } else { "off" });
    }
}

/// Refresh the HUD text once per timer interval.
#[allow(clippy::needless_pass_by_value)]
pub fn update_hud(
    diagnostics: Res<DiagnosticsStore>,
    state: Res<HudState>,
    time: Res<Time>,
    mut timer: ResMut<HudTimer>,
    streamer: Option<Res<TerrainStreamer>>,
    camera: Query<&GlobalTransform, With<Camera3d>>,
    mut text: Query<&mut Text, With<HudText>>,
) {
    if !timer.0.tick(time.delta()).just_finished() {
        return;
    }
    let Ok(mut text) = text.get_single_mut() else { return };
    if !state.visible {
        text.sections[0].value = String::new();
        return;
    }

    let fps = diagnostics.get(&FrameTimeDiagnosticsPlugin::FPS).and_then(Diagnostic::smoothed).unwrap_or(0.0);
    let pos = camera
        .get_single()
        .map_or_else(|_| "Camera: N/A".to_string(), |t| {
            let p = t.translation();
            format!("Camera: ({:.0}, {:.0}, {:.0})", p.x, p.y, p.z)
        });

    let Some(streamer) = streamer else {
        text.sections[0].value = format!("FPS: {fps:.1}\n{pos}\nStreaming: disabled");
        return;
    };
    let s = &streamer.0;
    let stats = s.stats();
    let observer = s.observer_chunk().map_or_else(|| "-".to_string(), |k| k.to_string());
    text.sections[0].value = format!(
        "FPS: {fps:.1}\n{pos}\nChunk: {observer}\n\
         Queued: {} | In flight: {}/{}\nResident: {} | Blacklisted: {}\n\
         Started: {} | Built: {} | Not ready: {}\nFailed: {} | Cancelled: {} | Evicted: {}\nTriangles: {}",
        s.queue_depth(),
        s.in_flight_count(),
        s.config().max_concurrent_fetches,
        s.resident_count(),
        s.blacklisted_count(),
        stats.fetches_started,
        stats.built,
        stats.not_ready,
        stats.transient_failures,
        stats.cancellations,
        stats.evictions,
        stats.total_triangles,
    );
}

/// Outline every resident chunk at ground level, coloured by its band.
#[allow(clippy::needless_pass_by_value)]
pub fn render_chunk_grid(
    grid: Res<ChunkGridVisible>,
    mut gizmos: Gizmos,
    streamer: Option<Res<TerrainStreamer>>,
    chunks: Query<&TerrainChunk>,
) {
    if !grid.0 {
        return;
    }
    let Some(streamer) = streamer else { return };
    let config = streamer.0.config();
    let size = config.chunk_size_meters;

    for chunk in &chunks {
        let color = band_color(&config.resolution_bands, chunk.resolution);
        let origin = chunk.key.origin(size);
        let center = chunk.key.center(size);
        gizmos.rect(
            Vec3::new(center.x, 0.5, center.y),
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
            Vec2::splat(size),
            color,
        );
        gizmos.line(
            Vec3::new(origin.x, 0.5, origin.y),
            Vec3::new(origin.x, 0.5 + size * 0.25, origin.y),
            color.with_alpha(0.3),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::lod::DEFAULT_BANDS;

    #[test]
    fn band_colours_follow_the_table() {
        assert_eq!(band_color(&DEFAULT_BANDS, 65), BAND_COLORS[0]);
        assert_eq!(band_color(&DEFAULT_BANDS, 17), BAND_COLORS[2]);
        assert_eq!(band_color(&DEFAULT_BANDS, 5), BAND_COLORS[3]);

        let many: Vec<ResolutionBand> =
            (0..6).map(|i| ResolutionBand::new(100.0 * (i + 1) as f32, 129 >> i)).collect();
        assert_eq!(band_color(&many, 129 >> 5), BAND_COLORS[3]);
    }
}
