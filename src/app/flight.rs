//! Scripted camera flight.
//!
//! The camera follows a figure-eight over the terrain so the streamer sees a
//! continuously moving observer that keeps crossing chunk boundaries and
//! revisiting areas it has already loaded.
use bevy::prelude::*;
use terrastream::settings::{FlightSettings, Settings};

/// Progress along the flight path.
#[derive(Resource, Default)]
pub struct FlightPath {
    pub angle: f32,
    pub paused: bool,
}

/// Point on the figure-eight at `angle` radians.
#[must_use]
pub fn flight_position(flight: &FlightSettings, angle: f32) -> Vec3 {
    let (sin, cos) = angle.sin_cos();
    Vec3::new(flight.radius * sin, flight.altitude, flight.radius * sin * cos)
}

/// Advance the camera along the path and face the direction of travel.
#[allow(clippy::needless_pass_by_value)]
pub fn fly_camera(
    time: Res<Time>,
    settings: Res<Settings>,
    mut path: ResMut<FlightPath>,
    mut camera: Query<&mut Transform, With<Camera3d>>,
) {
    let Ok(mut transform) = camera.get_single_mut() else { return };
    let flight = &settings.flight;
    if !path.paused && flight.radius > 0.0 {
        path.angle = (path.angle + flight.speed * time.delta_seconds() / flight.radius) % std::f32::consts::TAU;
    }
    let here = flight_position(flight, path.angle);
    let ahead = flight_position(flight, path.angle + 0.05);
    // Look slightly down so the near chunks stay in view.
    let target = Vec3::new(ahead.x, flight.altitude * 0.6, ahead.z);
    *transform = Transform::from_translation(here);
    if (target - here).length_squared() > f32::EPSILON {
        transform.look_at(target, Vec3::Y);
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn toggle_flight_pause(
    input: Res<ButtonInput<KeyCode>>,
    settings: Res<Settings>,
    mut path: ResMut<FlightPath>,
) {
    if input.just_pressed(settings.controls.key_for("pause_flight", KeyCode::Space)) {
        path.paused = !path.paused;
    }
}
