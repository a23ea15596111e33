//! Offline terrain source.
//!
//! Generates heights from layered noise (rolling hills plus ridged mountains
//! masked by a low-frequency selector) and serves them as terrain-RGB PNG
//! tiles, so the whole pipeline including decoding runs without a network.
//! The first `warmup_requests` requests for each chunk answer "not ready",
//! like a tile server that renders on demand.
use super::{FetchClient, FetchError, FetchOutcome, FetchTask};
use crate::chunk::decode::encode_terrain_rgb;
use crate::chunk::ChunkKey;
use bevy::tasks::{AsyncComputeTaskPool, TaskPool};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin, RidgedMulti, Simplex};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Noise stack for one seed. World coordinates are in meters.
pub struct TerrainNoise {
    hills: Fbm<Perlin>,
    ridges: RidgedMulti<Perlin>,
    selector: Simplex,
    detail: Perlin,
}

impl TerrainNoise {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            hills: Fbm::new(seed).set_octaves(5).set_frequency(0.0015).set_persistence(0.5),
            ridges: RidgedMulti::new(seed.wrapping_add(1)).set_octaves(4).set_frequency(0.0008),
            selector: Simplex::new(seed.wrapping_add(2)),
            detail: Perlin::new(seed.wrapping_add(5)),
        }
    }

    /// Terrain height in meters at world position `(x, z)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn height(&self, x: f64, z: f64) -> f32 {
        let mountains = f64::midpoint(self.selector.get([x * 0.0002, z * 0.0002]), 1.0);
        let hills = self.hills.get([x, z]) * 120.0;
        let ridges = self.ridges.get([x, z]).abs() * 600.0 * mountains * mountains;
        let detail = self.detail.get([x * 0.02, z * 0.02]) * 3.0;
        (40.0 + hills + ridges + detail) as f32
    }
}

/// Sample `resolution` x `resolution` heights across chunk `key`, edges
/// included, rows filled in parallel.
#[must_use]
pub fn generate_heights(noise: &TerrainNoise, key: ChunkKey, resolution: u32, chunk_size: f32) -> Vec<f32> {
    let n = resolution as usize;
    if n == 0 {
        return Vec::new();
    }
    let origin = key.origin(chunk_size);
    let step = if n > 1 { f64::from(chunk_size) / (n - 1) as f64 } else { 0.0 };
    let mut heights = vec![0.0_f32; n * n];
    heights.par_chunks_mut(n).enumerate().for_each(|(z, row)| {
        let wz = f64::from(origin.y) + z as f64 * step;
        for (x, h) in row.iter_mut().enumerate() {
            *h = noise.height(f64::from(origin.x) + x as f64 * step, wz);
        }
    });
    heights
}

/// Fetch client backed by [`TerrainNoise`].
#[derive(Clone)]
pub struct SyntheticFetchClient {
    seed: u32,
    chunk_size: f32,
    warmup_requests: u32,
    noise: Arc<TerrainNoise>,
    requests: Arc<Mutex<HashMap<ChunkKey, u32>>>,
}

impl SyntheticFetchClient {
    #[must_use]
    pub fn new(seed: u32, chunk_size: f32, warmup_requests: u32) -> Self {
        Self {
            seed,
            chunk_size,
            warmup_requests,
            noise: Arc::new(TerrainNoise::new(seed)),
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Number of chunks that have been asked for but not yet served.
    #[must_use]
    pub fn warming_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Count a request for `key` and report whether it is still warming up.
    /// A key leaves the map once it is served, so only chunks mid-warm-up
    /// are held.
    fn warming_up(&self, key: ChunkKey) -> bool {
        if self.warmup_requests == 0 {
            return false;
        }
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = requests.entry(key).or_insert(0);
        if *seen < self.warmup_requests {
            *seen += 1;
            return true;
        }
        requests.remove(&key);
        false
    }

    /// Produce the payload for `key` synchronously.
    #[must_use]
    pub fn render(&self, key: ChunkKey, resolution: u32) -> FetchOutcome {
        render_tile(&self.noise, key, resolution, self.chunk_size)
    }
}

fn render_tile(noise: &TerrainNoise, key: ChunkKey, resolution: u32, chunk_size: f32) -> FetchOutcome {
    let heights = generate_heights(noise, key, resolution, chunk_size);
    match encode_terrain_rgb(resolution, &heights) {
        Ok(png) => FetchOutcome::Ready(png),
        Err(e) => FetchOutcome::Failed(FetchError::Generate(format!("chunk {key}: {e}"))),
    }
}

impl FetchClient for SyntheticFetchClient {
    type Pending = FetchTask;

    fn fetch(&self, key: ChunkKey, resolution: u32) -> FetchTask {
        let pool = AsyncComputeTaskPool::get_or_init(TaskPool::new);
        if self.warming_up(key) {
            return FetchTask::new(pool.spawn(async { FetchOutcome::NotReady }));
        }
        let noise = Arc::clone(&self.noise);
        let chunk_size = self.chunk_size;
        FetchTask::new(pool.spawn(async move { render_tile(&noise, key, resolution, chunk_size) }))
    }
}
