//! In-memory collaborators for scheduler tests.
//!
//! `ScriptedClient` records every fetch and lets a test decide when and how
//! each one finishes. `FakeDecoder` turns a one-byte payload into a flat grid
//! of that resolution (an empty payload fails to decode). `FakeBuilder`
//! records builds and releases and can be told to fail for given keys.
use super::decode::{ChunkDecoder, DecodeError};
use super::mesh::{BuildError, ChunkMeshBuilder};
use super::{ChunkKey, HeightGrid};
use crate::fetch::{FetchClient, FetchOutcome, PendingFetch};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Slot {
    outcome: Option<FetchOutcome>,
    cancelled: bool,
    delivered: bool,
}

impl Slot {
    fn is_live(&self) -> bool {
        !self.cancelled && !self.delivered
    }
}

#[derive(Debug)]
struct FetchRecord {
    key: ChunkKey,
    resolution: u32,
    slot: Rc<RefCell<Slot>>,
}

#[derive(Debug)]
pub struct ScriptedFetch {
    slot: Rc<RefCell<Slot>>,
}

impl PendingFetch for ScriptedFetch {
    fn poll_outcome(&mut self) -> Option<FetchOutcome> {
        let mut slot = self.slot.borrow_mut();
        if !slot.is_live() {
            return None;
        }
        let outcome = slot.outcome.take()?;
        slot.delivered = true;
        Some(outcome)
    }

    fn cancel(&mut self) {
        self.slot.borrow_mut().cancelled = true;
    }
}

/// Fetch client whose requests finish only when the test resolves them.
#[derive(Debug, Default, Clone)]
pub struct ScriptedClient {
    log: Rc<RefCell<Vec<FetchRecord>>>,
}

impl FetchClient for ScriptedClient {
    type Pending = ScriptedFetch;

    fn fetch(&self, key: ChunkKey, resolution: u32) -> ScriptedFetch {
        let slot = Rc::new(RefCell::new(Slot::default()));
        self.log.borrow_mut().push(FetchRecord { key, resolution, slot: slot.clone() });
        ScriptedFetch { slot }
    }
}

impl ScriptedClient {
    /// Finish the live, unresolved fetch for `key` with `outcome`.
    ///
    /// # Panics
    /// Panics if `key` has no such fetch; that is a broken test.
    pub fn resolve(&self, key: ChunkKey, outcome: FetchOutcome) {
        let log = self.log.borrow();
        let record = log
            .iter()
            .rev()
            .find(|r| r.key == key && r.slot.borrow().is_live() && r.slot.borrow().outcome.is_none())
            .unwrap_or_else(|| panic!("no live fetch for {key}"));
        record.slot.borrow_mut().outcome = Some(outcome);
    }

    /// Finish the live fetch for `key` with a payload at its own resolution.
    pub fn resolve_ready(&self, key: ChunkKey) {
        let resolution = self
            .live()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, r)| r)
            .unwrap_or_else(|| panic!("no live fetch for {key}"));
        self.resolve(key, FetchOutcome::Ready(payload(resolution)));
    }

    /// Every fetch ever started, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<(ChunkKey, u32)> {
        self.log.borrow().iter().map(|r| (r.key, r.resolution)).collect()
    }

    #[must_use]
    pub fn fetch_count(&self, key: ChunkKey) -> usize {
        self.log.borrow().iter().filter(|r| r.key == key).count()
    }

    /// Fetches that are neither cancelled nor delivered.
    #[must_use]
    pub fn live(&self) -> Vec<(ChunkKey, u32)> {
        self.log
            .borrow()
            .iter()
            .filter(|r| r.slot.borrow().is_live())
            .map(|r| (r.key, r.resolution))
            .collect()
    }

    #[must_use]
    pub fn was_cancelled(&self, key: ChunkKey, resolution: u32) -> bool {
        self.log
            .borrow()
            .iter()
            .any(|r| r.key == key && r.resolution == resolution && r.slot.borrow().cancelled)
    }
}

/// Wire payload understood by [`FakeDecoder`].
#[must_use]
pub fn payload(resolution: u32) -> Vec<u8> {
    vec![u8::try_from(resolution).expect("test resolutions fit in a byte")]
}

pub struct FakeDecoder;

impl ChunkDecoder for FakeDecoder {
    fn decode(&self, bytes: &[u8], key: ChunkKey) -> Result<HeightGrid, DecodeError> {
        let Some(&resolution) = bytes.first() else { return Err(DecodeError::Empty { key }) };
        let resolution = u32::from(resolution);
        Ok(HeightGrid::new(resolution, vec![0.0; (resolution * resolution) as usize]))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FakeMesh {
    pub key: ChunkKey,
    pub resolution: u32,
}

#[derive(Debug, Default)]
pub struct FakeBuilder {
    events: Vec<String>,
    released: Vec<(ChunkKey, u32)>,
    failing: HashSet<ChunkKey>,
}

impl FakeBuilder {
    pub fn fail_on(&mut self, key: ChunkKey) {
        self.failing.insert(key);
    }

    #[must_use]
    pub fn events(&self) -> Vec<&str> {
        self.events.iter().map(String::as_str).collect()
    }

    #[must_use]
    pub fn released(&self) -> &[(ChunkKey, u32)] {
        &self.released
    }

    #[must_use]
    pub fn released_resolutions(&self) -> Vec<u32> {
        self.released.iter().map(|(_, r)| *r).collect()
    }
}

impl ChunkMeshBuilder for FakeBuilder {
    type Renderable = FakeMesh;

    fn build(&mut self, key: ChunkKey, grid: &HeightGrid) -> Result<FakeMesh, BuildError> {
        if self.failing.contains(&key) {
            return Err(BuildError::TooCoarse { key, resolution: grid.resolution });
        }
        self.events.push(format!("build {}", grid.resolution));
        Ok(FakeMesh { key, resolution: grid.resolution })
    }

    fn release(&mut self, renderable: FakeMesh) {
        self.events.push(format!("release {}", renderable.resolution));
        self.released.push((renderable.key, renderable.resolution));
    }
}
