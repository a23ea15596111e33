//! Startup system spawning the camera, lights and a ground plane reference.
use bevy::prelude::*;
use terrastream::settings::Settings;

use super::flight::flight_position;

/// Spawn the observer camera and the scene lighting.
///
/// The camera starts where the scripted flight begins so the first
/// streaming tick already sees the right neighbourhood.
#[allow(clippy::needless_pass_by_value)]
pub fn setup(mut commands: Commands, settings: Res<Settings>) {
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            shadows_enabled: settings.graphics.shadows,
            illuminance: 9000.0,
            ..default()
        },
        transform: Transform::from_rotation(Quat::from_euler(EulerRot::XYZ, -0.9, 0.4, 0.0)),
        ..default()
    });

    commands.insert_resource(AmbientLight { color: Color::srgb(0.75, 0.8, 0.95), brightness: 250.0 });
    commands.insert_resource(ClearColor(Color::srgb(0.55, 0.7, 0.9)));

    let start = flight_position(&settings.flight, 0.0);
    commands.spawn(Camera3dBundle {
        transform: Transform::from_translation(start).looking_at(Vec3::new(100.0, 0.0, 100.0), Vec3::Y),
        projection: PerspectiveProjection { far: 20_000.0, ..default() }.into(),
        ..default()
    });
}
