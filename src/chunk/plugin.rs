//! Bevy integration for the chunk streamer.
//!
//! `TerrainStreamingPlugin` owns a [`ChunkStreamer`] as a resource, ticks it
//! on a timer with the 3D camera as observer, polls fetch completions every
//! frame, pushes reloaded settings into it and shuts it down on `AppExit`.
use super::mesh::{BevyChunkBuilder, ChunkRenderable};
use super::{ChunkKey, ChunkStreamer, ConfigError, StreamingConfig};
use crate::fetch::{SyntheticFetchClient, TerrainSource};
use crate::settings::{Settings, SourceSettings};
use bevy::ecs::system::SystemParam;
use bevy::prelude::*;
use std::time::Duration;

/// The streamer as used by the app: fetches run as Bevy tasks, resident
/// chunks are spawned entities.
pub type TerrainChunkStreamer = ChunkStreamer<TerrainSource, ChunkRenderable>;

#[derive(Resource)]
pub struct TerrainStreamer(pub TerrainChunkStreamer);

/// Shared material for every terrain chunk entity.
#[derive(Resource)]
pub struct TerrainMaterial(pub Handle<StandardMaterial>);

#[derive(Resource)]
pub struct StreamingTickTimer(pub Timer);

/// Time of the last `StreamingDiag` log line.
#[derive(Resource, Default)]
pub struct StreamingDiag {
    pub last_log_seconds: f64,
}

/// System sets the plugin schedules in `Update`, in this order.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamingSet {
    Sync,
    Tick,
    Poll,
}

pub struct TerrainStreamingPlugin {
    pub config: StreamingConfig,
    pub source: SourceSettings,
}

impl TerrainStreamingPlugin {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self { config: settings.streaming.clone(), source: settings.source.clone() }
    }

    fn build_streamer(&self) -> Result<TerrainChunkStreamer, ConfigError> {
        let config = match self.config.validate() {
            Ok(()) => self.config.clone(),
            Err(e) => {
                error!("invalid streaming config: {e}; falling back to defaults");
                StreamingConfig::default()
            }
        };
        let client = self.source.build_client(config.chunk_size_meters).unwrap_or_else(|e| {
            error!("could not start {:?} terrain source: {e}; using synthetic terrain", self.source.kind);
            TerrainSource::Synthetic(SyntheticFetchClient::new(
                self.source.seed,
                config.chunk_size_meters,
                self.source.warmup_requests,
            ))
        });
        let decoder = self.source.build_decoder(&config);
        ChunkStreamer::new(config, client, decoder)
    }
}

impl Plugin for TerrainStreamingPlugin {
    fn build(&self, app: &mut App) {
        let streamer = match self.build_streamer() {
            Ok(streamer) => streamer,
            Err(e) => {
                error!("terrain streaming disabled: {e}");
                return;
            }
        };
        let interval = tick_interval(streamer.config());
        info!(
            "terrain streaming: source={:?} load_radius={} unload_radius={} budget={}",
            self.source.kind,
            streamer.config().load_radius,
            streamer.config().unload_radius,
            streamer.config().max_concurrent_fetches
        );

        app.insert_resource(TerrainStreamer(streamer))
            .insert_resource(StreamingTickTimer(Timer::new(interval, TimerMode::Repeating)))
            .insert_resource(StreamingDiag::default())
            .configure_sets(Update, (StreamingSet::Sync, StreamingSet::Tick, StreamingSet::Poll).chain())
            .add_systems(Startup, setup_terrain_material)
            .add_systems(Update, sync_streaming_settings.in_set(StreamingSet::Sync))
            .add_systems(Update, tick_streamer.in_set(StreamingSet::Tick))
            .add_systems(Update, (poll_streamer, log_streaming_diag).chain().in_set(StreamingSet::Poll))
            .add_systems(Last, shutdown_on_exit);
    }
}

/// Tick period, clamped to something a `Duration` can hold.
fn tick_interval(config: &StreamingConfig) -> Duration {
    Duration::try_from_secs_f64(config.tick_interval_seconds).unwrap_or(Duration::from_secs(3600))
}

fn setup_terrain_material(mut commands: Commands, mut materials: ResMut<Assets<StandardMaterial>>) {
    let handle = materials.add(StandardMaterial {
        base_color: Color::srgb(0.42, 0.5, 0.36),
        perceptual_roughness: 0.95,
        reflectance: 0.05,
        ..default()
    });
    commands.insert_resource(TerrainMaterial(handle));
}

/// Everything a system needs to build or release chunk meshes.
#[derive(SystemParam)]
pub struct StreamingCtx<'w, 's> {
    pub commands: Commands<'w, 's>,
    pub meshes: ResMut<'w, Assets<Mesh>>,
    pub material: Option<Res<'w, TerrainMaterial>>,
    pub streamer: ResMut<'w, TerrainStreamer>,
    pub time: Res<'w, Time>,
}

impl StreamingCtx<'_, '_> {
    /// Run `f` with the streamer and a mesh builder borrowing this context.
    /// Does nothing until the terrain material exists.
    fn with_builder(&mut self, f: impl FnOnce(&mut TerrainChunkStreamer, &mut BevyChunkBuilder<'_, '_, '_>, f64)) {
        let Some(material) = self.material.as_ref().map(|m| m.0.clone()) else { return };
        let now = self.time.elapsed_seconds_f64();
        let chunk_size = self.streamer.0.config().chunk_size_meters;
        let mut builder = BevyChunkBuilder {
            commands: &mut self.commands,
            meshes: &mut *self.meshes,
            material,
            chunk_size,
        };
        f(&mut self.streamer.0, &mut builder, now);
    }
}

/// Tick the streamer when its timer fires, using the 3D camera as observer.
#[allow(clippy::needless_pass_by_value)]
pub fn tick_streamer(
    mut ctx: StreamingCtx<'_, '_>,
    mut timer: ResMut<StreamingTickTimer>,
    camera: Query<&GlobalTransform, With<Camera3d>>,
) {
    if !timer.0.tick(ctx.time.delta()).just_finished() {
        return;
    }
    let Ok(observer) = camera.get_single().map(GlobalTransform::translation) else { return };
    ctx.with_builder(|streamer, builder, now| {
        streamer.tick(observer, now, builder);
    });
}

/// Apply finished fetches every frame.
pub fn poll_streamer(mut ctx: StreamingCtx<'_, '_>) {
    ctx.with_builder(|streamer, builder, now| {
        streamer.poll_completions(now, builder);
    });
}

/// One-line streaming summary at most once per second.
#[allow(clippy::needless_pass_by_value)]
pub fn log_streaming_diag(streamer: Res<TerrainStreamer>, mut diag: ResMut<StreamingDiag>, time: Res<Time>) {
    let now = time.elapsed_seconds_f64();
    if now - diag.last_log_seconds <= 1.0 {
        return;
    }
    diag.last_log_seconds = now;
    let s = &streamer.0;
    let stats = s.stats();
    let observer = s.observer_chunk().map_or_else(|| "-".to_string(), |k: ChunkKey| k.to_string());
    info!(
        "StreamingDiag: observer={} queued={} in_flight={} resident={} blacklisted={} started={} built={} not_ready={} failed={} cancelled={} evicted={} tris={}",
        observer,
        s.queue_depth(),
        s.in_flight_count(),
        s.resident_count(),
        s.blacklisted_count(),
        stats.fetches_started,
        stats.built,
        stats.not_ready,
        stats.transient_failures,
        stats.cancellations,
        stats.evictions,
        stats.total_triangles
    );
}

/// Push a reloaded `streaming` section into the running streamer.
#[allow(clippy::needless_pass_by_value)]
pub fn sync_streaming_settings(
    settings: Option<Res<Settings>>,
    mut streamer: ResMut<TerrainStreamer>,
    mut timer: ResMut<StreamingTickTimer>,
    mut last: Local<Option<StreamingConfig>>,
) {
    let Some(settings) = settings else { return };
    let desired = &settings.streaming;
    if last.as_ref() == Some(desired) {
        return;
    }
    *last = Some(desired.clone());
    if streamer.0.config() == desired {
        return;
    }
    match streamer.0.apply_config(desired.clone()) {
        Ok(()) => {
            timer.0.set_duration(tick_interval(streamer.0.config()));
        }
        Err(e) => warn!("streaming settings rejected: {e}"),
    }
}

/// Cancel every fetch and release every chunk when the app exits.
pub fn shutdown_on_exit(mut exit: EventReader<AppExit>, mut ctx: StreamingCtx<'_, '_>) {
    if exit.read().next().is_none() {
        return;
    }
    ctx.with_builder(|streamer, builder, _| streamer.shutdown(builder));
}
