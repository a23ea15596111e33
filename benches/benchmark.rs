use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use bevy::math::Vec3;
use terrastream::chunk::decode::{encode_terrain_rgb, ChunkDecoder, DecodeError, TerrainRgbDecoder};
use terrastream::chunk::lod::DEFAULT_BANDS;
use terrastream::chunk::mesh::{build_terrain_mesh_data, BuildError, ChunkMeshBuilder};
use terrastream::chunk::{select_resolution, ChunkKey, ChunkStreamer, HeightGrid, StreamingConfig};
use terrastream::fetch::synthetic::{generate_heights, TerrainNoise};
use terrastream::fetch::{FetchClient, FetchOutcome, PendingFetch};

/// Fetch that is ready the first time it is polled.
struct InstantFetch(Option<FetchOutcome>);

impl PendingFetch for InstantFetch {
    fn poll_outcome(&mut self) -> Option<FetchOutcome> {
        self.0.take()
    }

    fn cancel(&mut self) {
        self.0 = None;
    }
}

struct InstantClient;

impl FetchClient for InstantClient {
    type Pending = InstantFetch;

    fn fetch(&self, _key: ChunkKey, resolution: u32) -> InstantFetch {
        InstantFetch(Some(FetchOutcome::Ready(resolution.to_le_bytes().to_vec())))
    }
}

/// Decodes the resolution back out of the payload and returns a flat grid.
struct FlatDecoder;

impl ChunkDecoder for FlatDecoder {
    fn decode(&self, bytes: &[u8], key: ChunkKey) -> Result<HeightGrid, DecodeError> {
        let raw: [u8; 4] = bytes.try_into().map_err(|_| DecodeError::Empty { key })?;
        let resolution = u32::from_le_bytes(raw);
        Ok(HeightGrid::new(resolution, vec![0.0; (resolution * resolution) as usize]))
    }
}

struct NullBuilder;

impl ChunkMeshBuilder for NullBuilder {
    type Renderable = u32;

    fn build(&mut self, _key: ChunkKey, grid: &HeightGrid) -> Result<u32, BuildError> {
        Ok(grid.resolution)
    }

    fn release(&mut self, renderable: u32) {
        black_box(renderable);
    }
}

fn wide_config() -> StreamingConfig {
    StreamingConfig { load_radius: 32, unload_radius: 36, max_concurrent_fetches: 64, ..Default::default() }
}

fn bench_select_resolution(c: &mut Criterion) {
    c.bench_function("select_resolution_sweep", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for i in 0..10_000u32 {
                sum += u64::from(select_resolution(black_box(&DEFAULT_BANDS), i as f32));
            }
            black_box(sum)
        });
    });
}

/// First tick around a fresh observer: 65x65 desired cells, queue build-up and admission.
fn bench_first_tick(c: &mut Criterion) {
    c.bench_function("tick_cold_radius_32", |b| {
        b.iter_batched(
            || ChunkStreamer::new(wide_config(), InstantClient, FlatDecoder).expect("valid config"),
            |mut streamer: ChunkStreamer<InstantClient, u32>| {
                black_box(streamer.tick(Vec3::ZERO, 0.0, &mut NullBuilder))
            },
            BatchSize::SmallInput,
        );
    });
}

/// Steady-state streaming while the observer moves one chunk per tick.
fn bench_moving_observer(c: &mut Criterion) {
    c.bench_function("tick_and_poll_moving_observer", |b| {
        b.iter_batched(
            || ChunkStreamer::new(wide_config(), InstantClient, FlatDecoder).expect("valid config"),
            |mut streamer: ChunkStreamer<InstantClient, u32>| {
                let mut builder = NullBuilder;
                for step in 0..20 {
                    let now = f64::from(step) * 0.25;
                    let observer = Vec3::new(step as f32 * 256.0, 0.0, 0.0);
                    streamer.tick(observer, now, &mut builder);
                    streamer.poll_completions(now, &mut builder);
                }
                black_box(streamer.resident_count())
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_mesh_build(c: &mut Criterion) {
    let noise = TerrainNoise::new(12345);
    let key = ChunkKey::new(3, -2);
    let grid = HeightGrid::new(65, generate_heights(&noise, key, 65, 256.0));
    c.bench_function("build_terrain_mesh_65", |b| {
        b.iter(|| black_box(build_terrain_mesh_data(key, black_box(&grid), 256.0)));
    });
}

fn bench_synthetic_tile(c: &mut Criterion) {
    let noise = TerrainNoise::new(12345);
    let key = ChunkKey::new(1, 1);
    c.bench_function("generate_heights_65", |b| {
        b.iter(|| black_box(generate_heights(&noise, black_box(key), 65, 256.0)));
    });

    let png = encode_terrain_rgb(65, &generate_heights(&noise, key, 65, 256.0)).expect("encode");
    let decoder = TerrainRgbDecoder::new();
    c.bench_function("decode_terrain_rgb_65", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&png), key)));
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(50);
    targets =
        bench_select_resolution,
        bench_first_tick,
        bench_moving_observer,
        bench_mesh_build,
        bench_synthetic_tile
}
criterion_main!(benches);
