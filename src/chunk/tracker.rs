//! Per-chunk lifecycle state.
//!
//! Every relevant chunk owns one [`ChunkState`]: an optional resident build
//! plus exactly one [`Activity`]. Folding "fetching", "waiting for retry",
//! "cooling down" and "blacklisted" into a single variant means a chunk can
//! never be both blacklisted and in flight, or in cooldown and pending retry.
//!
//! Fetch outcomes are classified here and nowhere else: the scheduler and the
//! queue only ever see the resulting [`Transition`].
use super::config::StreamingConfig;
use super::decode::{ChunkDecoder, DecodeError};
use super::mesh::{BuildError, ChunkMeshBuilder};
use super::{ChunkKey, HeightGrid};
use crate::fetch::{FetchError, FetchOutcome, PendingFetch};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Keys excluded from scheduling for the rest of the session.
///
/// The set outlives the chunks' tracker entries: evicting a blacklisted
/// chunk drops its state but not its membership here.
#[derive(Debug, Default)]
pub struct Blacklist(HashSet<ChunkKey>);

impl Blacklist {
    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.0.contains(&key)
    }

    pub fn insert(&mut self, key: ChunkKey) -> bool {
        self.0.insert(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// What the chunk is doing right now, independent of what it displays.
#[derive(Debug)]
pub enum Activity<P> {
    Idle,
    Fetching { resolution: u32, pending: P },
    /// Source answered "not ready yet"; re-request once `retry_at` passes.
    PendingRetry { retry_at: f64 },
    /// Transient fetch failure; no request before `until`.
    Cooldown { until: f64 },
    Blacklisted,
}

/// Payload-free view of an [`Activity`], for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    PendingRetry,
    Cooldown,
    Blacklisted,
}

impl<P> Activity<P> {
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Activity::Idle => Phase::Idle,
            Activity::Fetching { .. } => Phase::Fetching,
            Activity::PendingRetry { .. } => Phase::PendingRetry,
            Activity::Cooldown { .. } => Phase::Cooldown,
            Activity::Blacklisted => Phase::Blacklisted,
        }
    }
}

/// A built chunk and the resolution it was built at.
#[derive(Debug)]
pub struct Resident<R> {
    pub resolution: u32,
    pub renderable: R,
}

#[derive(Debug)]
pub struct ChunkState<P, R> {
    pub resident: Option<Resident<R>>,
    pub activity: Activity<P>,
}

impl<P, R> ChunkState<P, R> {
    fn idle() -> Self {
        Self { resident: None, activity: Activity::Idle }
    }

    #[must_use]
    pub fn resident_resolution(&self) -> Option<u32> {
        self.resident.as_ref().map(|r| r.resolution)
    }

    #[must_use]
    pub fn in_flight_resolution(&self) -> Option<u32> {
        match self.activity {
            Activity::Fetching { resolution, .. } => Some(resolution),
            _ => None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.activity.phase()
    }

    /// Whether a cooldown or retry wait is still running at `now`.
    #[must_use]
    pub fn is_waiting(&self, now: f64) -> bool {
        match self.activity {
            Activity::PendingRetry { retry_at } => now < retry_at,
            Activity::Cooldown { until } => now < until,
            _ => false,
        }
    }
}

/// Gate verdict for a dequeued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Start,
    /// In flight at another resolution: cancel that fetch, then start.
    Supersede,
    AlreadySatisfied,
    Blacklisted,
    /// Cooldown or retry wait not yet over.
    Defer,
}

/// Unrecoverable failure for a chunk's payload.
#[derive(Debug, Error)]
pub enum PermanentFailure {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("mesh build failed: {0}")]
    Build(#[from] BuildError),
}

/// Result of applying a fetch outcome to a chunk.
#[derive(Debug)]
pub enum Transition {
    Built { resolution: u32, triangles: usize, replaced: Option<u32> },
    PendingRetry { retry_at: f64 },
    Cooldown { until: f64, error: FetchError },
    Blacklisted(PermanentFailure),
    /// The chunk was evicted while its outcome was in transit.
    Orphaned,
}

/// What eviction tore down for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub cancelled: Option<u32>,
    pub released: Option<u32>,
}

/// Owner of all per-chunk state and the session blacklist.
#[derive(Debug)]
pub struct ChunkTracker<P, R> {
    states: HashMap<ChunkKey, ChunkState<P, R>>,
    blacklist: Blacklist,
}

impl<P, R> Default for ChunkTracker<P, R> {
    fn default() -> Self {
        Self { states: HashMap::new(), blacklist: Blacklist::default() }
    }
}

impl<P: PendingFetch, R> ChunkTracker<P, R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    #[must_use]
    pub fn state(&self, key: ChunkKey) -> Option<&ChunkState<P, R>> {
        self.states.get(&key)
    }

    #[must_use]
    pub fn resident(&self, key: ChunkKey) -> Option<&R> {
        self.states.get(&key)?.resident.as_ref().map(|r| &r.renderable)
    }

    #[must_use]
    pub fn resident_resolution(&self, key: ChunkKey) -> Option<u32> {
        self.states.get(&key)?.resident_resolution()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.states.values().filter(|s| s.resident.is_some()).count()
    }

    pub fn keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.states.keys().copied()
    }

    /// Chunks with a fetch in flight and the resolution being fetched.
    pub fn in_flight(&self) -> impl Iterator<Item = (ChunkKey, u32)> + '_ {
        self.states
            .iter()
            .filter_map(|(key, state)| state.in_flight_resolution().map(|r| (*key, r)))
    }

    /// Create an idle state for `key` if it has none yet.
    pub fn touch(&mut self, key: ChunkKey) {
        self.states.entry(key).or_insert_with(ChunkState::idle);
    }

    /// Decide what the gate should do with a request for `key` at `resolution`.
    #[must_use]
    pub fn admission(&self, key: ChunkKey, resolution: u32, now: f64) -> Admission {
        if self.blacklist.contains(key) {
            return Admission::Blacklisted;
        }
        let Some(state) = self.states.get(&key) else { return Admission::Start };
        if state.resident_resolution() == Some(resolution) {
            return Admission::AlreadySatisfied;
        }
        match state.activity {
            Activity::Blacklisted => Admission::Blacklisted,
            Activity::Fetching { resolution: r, .. } if r == resolution => Admission::AlreadySatisfied,
            Activity::Fetching { .. } => Admission::Supersede,
            _ if state.is_waiting(now) => Admission::Defer,
            _ => Admission::Start,
        }
    }

    /// Record a freshly started fetch. Any wait marker is cleared.
    pub fn begin_fetch(&mut self, key: ChunkKey, resolution: u32, pending: P) {
        let state = self.states.entry(key).or_insert_with(ChunkState::idle);
        debug_assert!(state.in_flight_resolution().is_none(), "second fetch for {key}");
        state.activity = Activity::Fetching { resolution, pending };
    }

    /// Abort the in-flight fetch for `key`, returning its resolution.
    ///
    /// The chunk goes back to idle with no penalty. Returns `None` (and does
    /// nothing) when nothing is in flight, so repeated calls are harmless.
    pub fn cancel(&mut self, key: ChunkKey) -> Option<u32> {
        let state = self.states.get_mut(&key)?;
        let Activity::Fetching { resolution, pending } = &mut state.activity else { return None };
        let resolution = *resolution;
        pending.cancel();
        state.activity = Activity::Idle;
        Some(resolution)
    }

    /// Poll every in-flight fetch and detach the finished ones.
    ///
    /// Finished chunks are left idle; the caller feeds each outcome back
    /// through [`ChunkTracker::complete`].
    pub fn take_finished(&mut self) -> Vec<(ChunkKey, u32, FetchOutcome)> {
        let mut finished = Vec::new();
        for (key, state) in &mut self.states {
            if let Activity::Fetching { resolution, pending } = &mut state.activity
                && let Some(outcome) = pending.poll_outcome()
            {
                finished.push((*key, *resolution, outcome));
                state.activity = Activity::Idle;
            }
        }
        finished
    }

    /// Classify a fetch outcome for `key` and apply the resulting transition.
    ///
    /// Ready payloads are decoded and built; the previous resident build is
    /// released only after its replacement exists. Decode or build failures
    /// blacklist the key for the session.
    #[allow(clippy::too_many_arguments)]
    pub fn complete<B>(
        &mut self,
        key: ChunkKey,
        resolution: u32,
        outcome: FetchOutcome,
        now: f64,
        config: &StreamingConfig,
        decoder: &dyn ChunkDecoder,
        builder: &mut B,
    ) -> Transition
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let Some(state) = self.states.get_mut(&key) else { return Transition::Orphaned };
        match outcome {
            FetchOutcome::Ready(bytes) => {
                let built = decoder
                    .decode(&bytes, key)
                    .map_err(PermanentFailure::from)
                    .and_then(|grid| {
                        let triangles = triangle_count(&grid);
                        builder.build(key, &grid).map(|r| (r, triangles)).map_err(PermanentFailure::from)
                    });
                match built {
                    Ok((renderable, triangles)) => {
                        let previous = state.resident.replace(Resident { resolution, renderable });
                        state.activity = Activity::Idle;
                        let replaced = previous.map(|old| {
                            let old_resolution = old.resolution;
                            builder.release(old.renderable);
                            old_resolution
                        });
                        Transition::Built { resolution, triangles, replaced }
                    }
                    Err(failure) => {
                        state.activity = Activity::Blacklisted;
                        self.blacklist.insert(key);
                        Transition::Blacklisted(failure)
                    }
                }
            }
            FetchOutcome::NotReady => {
                let retry_at = now + config.retry_delay;
                state.activity = Activity::PendingRetry { retry_at };
                Transition::PendingRetry { retry_at }
            }
            FetchOutcome::Failed(error) => {
                let until = now + config.cooldown_delay;
                state.activity = Activity::Cooldown { until };
                Transition::Cooldown { until, error }
            }
        }
    }

    /// Keys whose "not ready" wait has run out at `now`.
    #[must_use]
    pub fn elapsed_retries(&self, now: f64) -> Vec<ChunkKey> {
        self.states
            .iter()
            .filter(|(_, s)| matches!(s.activity, Activity::PendingRetry { retry_at } if now >= retry_at))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Drop a finished retry or cooldown marker so the chunk is plain idle.
    pub fn clear_wait(&mut self, key: ChunkKey) {
        if let Some(state) = self.states.get_mut(&key)
            && matches!(state.activity, Activity::PendingRetry { .. } | Activity::Cooldown { .. })
        {
            state.activity = Activity::Idle;
        }
    }

    /// Tear down everything held for `key`: cancel its fetch, release its
    /// build and forget its state. Blacklist membership is kept.
    pub fn evict<B>(&mut self, key: ChunkKey, builder: &mut B) -> Option<Evicted>
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let mut state = self.states.remove(&key)?;
        let cancelled = match &mut state.activity {
            Activity::Fetching { resolution, pending } => {
                pending.cancel();
                Some(*resolution)
            }
            _ => None,
        };
        let released = state.resident.map(|resident| {
            builder.release(resident.renderable);
            resident.resolution
        });
        Some(Evicted { cancelled, released })
    }

    /// Cancel every fetch, release every build and forget all state,
    /// including the blacklist. Returns how many fetches were cancelled.
    pub fn shutdown<B>(&mut self, builder: &mut B) -> usize
    where
        B: ChunkMeshBuilder<Renderable = R>,
    {
        let keys: Vec<ChunkKey> = self.states.keys().copied().collect();
        let cancelled = keys
            .into_iter()
            .filter_map(|key| self.evict(key, builder))
            .filter(|evicted| evicted.cancelled.is_some())
            .count();
        self.blacklist.clear();
        cancelled
    }
}

/// Triangles in a full-resolution mesh of `grid`.
fn triangle_count(grid: &HeightGrid) -> usize {
    let quads = grid.resolution.saturating_sub(1) as usize;
    quads * quads * 2
}
