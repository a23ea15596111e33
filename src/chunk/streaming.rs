//! Chunk streaming scheduler.
//!
//! [`ChunkStreamer`] owns the request queue, the concurrency gate and the
//! per-chunk tracker, and drives them from two entry points called by the
//! host: [`ChunkStreamer::tick`] on a slow cadence with the observer's
//! position, and [`ChunkStreamer::poll_completions`] as often as convenient
//! to apply finished fetches. All state is mutated from the caller's thread;
//! only the fetches themselves run elsewhere.
//!
//! Around the observer there are two square rings measured in chunks:
//! inside `load_radius` chunks are wanted and requested at a resolution
//! picked by distance; beyond `unload_radius` they are evicted. In between,
//! chunks keep whatever they already display but nothing new is fetched.
use super::config::{ConfigError, StreamingConfig};
use super::decode::ChunkDecoder;
use super::gate::{try_admit_next, ConcurrencyGate};
use super::lod::select_resolution;
use super::mesh::ChunkMeshBuilder;
use super::queue::{Enqueue, RequestQueue};
use super::stats::StreamingStats;
use super::tracker::{ChunkState, ChunkTracker, Transition};
use super::ChunkKey;
use crate::fetch::FetchClient;
use bevy::log::{debug, error, info, warn};
use bevy::math::{Vec2, Vec3};
use std::collections::{HashMap, HashSet};

/// What one [`ChunkStreamer::tick`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub desired: usize,
    pub enqueued: usize,
    pub cancelled: usize,
    pub evicted: usize,
    pub started: usize,
}

/// A chunk wanted this tick.
#[derive(Debug, Clone, Copy)]
struct DesiredCell {
    key: ChunkKey,
    resolution: u32,
    priority: u64,
}

/// Streams chunks around a moving observer.
///
/// `C` is the fetch source and `R` whatever the mesh builder produces for a
/// resident chunk. The builder is passed into every call that may build or
/// release, so it can borrow host state (e.g. Bevy `Commands`) per call.
pub struct ChunkStreamer<C: FetchClient, R> {
    config: StreamingConfig,
    client: C,
    decoder: Box<dyn ChunkDecoder + Send + Sync>,
    tracker: ChunkTracker<C::Pending, R>,
    queue: RequestQueue,
    gate: ConcurrencyGate,
    stats: StreamingStats,
    observer: Option<ChunkKey>,
}

impl<C: FetchClient, R> ChunkStreamer<C, R> {
    /// # Errors
    /// Returns the first violated constraint if `config` is invalid.
    pub fn new(
        config: StreamingConfig,
        client: C,
        decoder: impl ChunkDecoder + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            gate: ConcurrencyGate::new(config.max_concurrent_fetches),
            config,
            client,
            decoder: Box::new(decoder),
            tracker: ChunkTracker::new(),
            queue: RequestQueue::new(),
            stats: StreamingStats::default(),
            observer: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    #[must_use]
    pub fn stats(&self) -> &StreamingStats {
        &self.stats
    }

    /// Chunk the observer was in at the last tick.
    #[must_use]
    pub fn observer_chunk(&self) -> Option<ChunkKey> {
        self.observer
    }

    #[must_use]
    pub fn resident(&self, key: ChunkKey) -> Option<&R> {
        self.tracker.resident(key)
    }

    #[must_use]
    pub fn resident_resolution(&self, key: ChunkKey) -> Option<u32> {
        self.tracker.resident_resolution(key)
    }

    #[must_use]
    pub fn state(&self, key: ChunkKey) -> Option<&ChunkState<C::Pending, R>> {
        self.tracker.state(key)
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.gate.in_flight()
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.tracker.resident_count()
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn blacklisted_count(&self) -> usize {
        self.tracker.blacklist().len()
    }

    /// Turn per-transition logging at info level on or off.
    pub fn set_debug(&mut self, enabled: bool) {
        self.config.debug = enabled;
    }

    /// Swap in a new configuration while streaming.
    ///
    /// Radii and the band table take effect at the next tick. Lowering the
    /// fetch budget below the number of fetches in flight cancels the ones
    /// farthest from the observer. The chunk size cannot change while chunks
    /// are tracked; a different value is ignored with a warning.
    ///
    /// # Errors
    /// Returns the violated constraint and keeps the current configuration.
    #[allow(clippy::float_cmp)]
    pub fn apply_config(&mut self, mut config: StreamingConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if config.chunk_size_meters != self.config.chunk_size_meters && !self.tracker.is_empty() {
            warn!(
                "chunk_size_meters change {} -> {} needs a restart; keeping {}",
                self.config.chunk_size_meters, config.chunk_size_meters, self.config.chunk_size_meters
            );
            config.chunk_size_meters = self.config.chunk_size_meters;
        }
        self.gate.set_budget(config.max_concurrent_fetches);
        self.config = config;

        let excess = self.gate.excess();
        if excess > 0 {
            let center = self.observer.unwrap_or_default();
            let mut in_flight: Vec<ChunkKey> = self.tracker.in_flight().map(|(key, _)| key).collect();
            in_flight.sort_by_key(|key| (std::cmp::Reverse(key.squared_distance(center)), *key));
            for key in in_flight.into_iter().take(excess) {
                self.cancel_fetch(key, "fetch budget lowered");
            }
        }
        info!("streaming config applied: {:?}", self.config);
        Ok(())
    }

    /// One scheduling pass for an observer at world position `observer`.
    ///
    /// Requests every wanted chunk that is not already resident or in flight
    /// at its wanted resolution, abandons fetches that no longer match, evicts
    /// chunks past the unload radius and then fills the fetch budget.
    pub fn tick<B>(&mut self, observer: Vec3, now: f64, builder: &mut B) -> TickSummary
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let center = ChunkKey::from_world(observer, self.config.chunk_size_meters);
        if self.config.debug && self.observer != Some(center) {
            info!("observer entered chunk {center}");
        }
        self.observer = Some(center);

        let cells = self.desired_cells(observer, center);
        let desired: HashMap<ChunkKey, DesiredCell> = cells.iter().map(|c| (c.key, *c)).collect();
        let mut summary = TickSummary { desired: cells.len(), ..TickSummary::default() };

        // Chunks that left the load radius keep what they display, but stop
        // fetching and leave the queue.
        let leaving: Vec<ChunkKey> = self
            .tracker
            .in_flight()
            .map(|(key, _)| key)
            .filter(|key| !desired.contains_key(key))
            .collect();
        for key in leaving {
            if self.cancel_fetch(key, "left the load radius") {
                summary.cancelled += 1;
            }
        }
        self.queue.retain(|key| desired.contains_key(&key));

        let mut enqueued = HashSet::new();
        for cell in &cells {
            let key = cell.key;
            if self.tracker.blacklist().contains(key) {
                continue;
            }
            match self.tracker.state(key).and_then(ChunkState::in_flight_resolution) {
                Some(r) if r == cell.resolution => {
                    self.queue.remove(key);
                    continue;
                }
                Some(_) => {
                    if self.cancel_fetch(key, "resolution changed") {
                        summary.cancelled += 1;
                    }
                }
                None => {}
            }
            let state = self.tracker.state(key);
            if state.and_then(ChunkState::resident_resolution) == Some(cell.resolution) {
                self.queue.remove(key);
                continue;
            }
            if state.is_some_and(|s| s.is_waiting(now)) {
                continue;
            }
            if self.request(*cell) {
                summary.enqueued += 1;
            }
            enqueued.insert(key);
        }

        for key in self.tracker.elapsed_retries(now) {
            if enqueued.contains(&key) {
                continue;
            }
            let wanted = desired
                .get(&key)
                .filter(|cell| self.tracker.resident_resolution(key) != Some(cell.resolution));
            match wanted {
                Some(cell) => {
                    if self.request(*cell) {
                        summary.enqueued += 1;
                    }
                }
                None => self.tracker.clear_wait(key),
            }
        }

        summary.evicted = self.evict_beyond(center, builder);
        summary.started = self.admit(now);

        if self.config.debug && (summary.enqueued > 0 || summary.cancelled > 0 || summary.evicted > 0) {
            info!("tick at {center}: {summary:?}");
        }
        summary
    }

    /// Apply every fetch that has finished since the last call, then refill
    /// the fetch budget. Returns how many fetches finished.
    pub fn poll_completions<B>(&mut self, now: f64, builder: &mut B) -> usize
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let finished = self.tracker.take_finished();
        if finished.is_empty() {
            return 0;
        }
        let count = finished.len();
        for (key, resolution, outcome) in finished {
            self.gate.release();
            let transition =
                self.tracker
                    .complete(key, resolution, outcome, now, &self.config, &*self.decoder, builder);
            self.record(key, resolution, transition);
        }
        self.admit(now);
        count
    }

    /// Cancel all fetches, release every resident chunk and forget all
    /// state, including the blacklist. The streamer can be ticked again
    /// afterwards and starts from scratch.
    pub fn shutdown<B>(&mut self, builder: &mut B)
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let resident = self.tracker.resident_count();
        let cancelled = self.tracker.shutdown(builder);
        self.queue.clear();
        self.gate = ConcurrencyGate::new(self.config.max_concurrent_fetches);
        self.stats.cancellations += cancelled as u64;
        self.stats.clear_chunks();
        self.observer = None;
        info!("terrain streaming shut down: cancelled {cancelled} fetches, released {resident} chunks");
    }

    fn desired_cells(&self, observer: Vec3, center: ChunkKey) -> Vec<DesiredCell> {
        let radius = self.config.load_radius;
        let size = self.config.chunk_size_meters;
        let eye = Vec2::new(observer.x, observer.z);
        let side = usize::try_from(radius).ok().and_then(|r| r.checked_mul(2)?.checked_add(1)).unwrap_or(0);
        let mut cells = Vec::with_capacity(side.saturating_mul(side));
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                // Cells past the edge of the i32 grid do not exist.
                let Some(key) = center.offset(dx, dz) else { continue };
                let distance = eye.distance(key.center(size));
                cells.push(DesiredCell {
                    key,
                    resolution: select_resolution(&self.config.resolution_bands, distance),
                    priority: key.squared_distance(center),
                });
            }
        }
        cells.sort_by_key(|c| (c.priority, c.key));
        cells
    }

    /// Queue `cell`. Returns whether the queue changed.
    fn request(&mut self, cell: DesiredCell) -> bool {
        self.tracker.touch(cell.key);
        let outcome = self.queue.enqueue(self.tracker.blacklist(), cell.key, cell.resolution, cell.priority);
        matches!(outcome, Enqueue::Inserted | Enqueue::Replaced)
    }

    /// Abort the fetch for `key`, returning whether one was running.
    fn cancel_fetch(&mut self, key: ChunkKey, reason: &str) -> bool {
        let Some(resolution) = self.tracker.cancel(key) else { return false };
        self.gate.release();
        self.stats.cancellations += 1;
        if self.config.debug {
            info!("chunk {key}: cancelled fetch at {resolution} ({reason})");
        }
        true
    }

    fn evict_beyond<B>(&mut self, center: ChunkKey, builder: &mut B) -> usize
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let unload = u64::try_from(self.config.unload_radius).unwrap_or(0);
        let far: Vec<ChunkKey> = self.tracker.keys().filter(|key| key.chebyshev_distance(center) > unload).collect();
        let mut evicted = 0;
        for key in far {
            self.queue.remove(key);
            let Some(torn_down) = self.tracker.evict(key, builder) else { continue };
            if torn_down.cancelled.is_some() {
                self.gate.release();
                self.stats.cancellations += 1;
            }
            self.stats.remove_chunk(key);
            self.stats.evictions += 1;
            evicted += 1;
            if self.config.debug {
                info!("chunk {key}: evicted ({torn_down:?})");
            }
        }
        evicted
    }

    fn admit(&mut self, now: f64) -> usize {
        let started = try_admit_next(&mut self.gate, &mut self.queue, &mut self.tracker, &self.client, now);
        self.stats.fetches_started += started.len() as u64;
        if self.config.debug {
            for entry in &started {
                info!("chunk {}: fetching at {} (priority {})", entry.key, entry.resolution, entry.priority);
            }
        }
        debug_assert_eq!(self.gate.in_flight(), self.tracker.in_flight().count());
        started.len()
    }

    fn record(&mut self, key: ChunkKey, resolution: u32, transition: Transition) {
        match transition {
            Transition::Built { resolution, triangles, replaced } => {
                self.stats.built += 1;
                self.stats.update_chunk(key, triangles);
                if self.config.debug {
                    match replaced {
                        Some(old) => info!("chunk {key}: rebuilt {old} -> {resolution} ({triangles} tris)"),
                        None => info!("chunk {key}: built at {resolution} ({triangles} tris)"),
                    }
                }
            }
            Transition::PendingRetry { retry_at } => {
                self.stats.not_ready += 1;
                debug!("chunk {key}: not ready at {resolution}, retrying at {retry_at:.2}s");
            }
            Transition::Cooldown { until, error } => {
                self.stats.transient_failures += 1;
                warn!("chunk {key}: fetch at {resolution} failed: {error}; cooling down until {until:.2}s");
            }
            Transition::Blacklisted(failure) => {
                self.stats.blacklisted += 1;
                error!("chunk {key}: {failure}; blacklisted for this session");
            }
            Transition::Orphaned => {}
        }
    }
}
