//! Fetch clients: where chunk payloads come from.
//!
//! A [`FetchClient`] starts one request per (chunk, resolution) and hands
//! back a [`PendingFetch`] that the scheduler polls from its own thread.
//! Dropping or cancelling a pending fetch abandons it; a cancelled fetch
//! never yields an outcome.
//!
//! Two sources ship with the crate: [`http::HttpFetchClient`] for a remote
//! tile endpoint and [`synthetic::SyntheticFetchClient`] which generates
//! noise terrain locally. [`TerrainSource`] selects between them at runtime.
use crate::chunk::ChunkKey;
use bevy::tasks::Task;
use thiserror::Error;

pub mod http;
pub mod synthetic;

pub use http::HttpFetchClient;
pub use synthetic::SyntheticFetchClient;

/// How a single fetch ended.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The source returned the chunk payload.
    Ready(Vec<u8>),
    /// The source is still producing the chunk; ask again later.
    NotReady,
    /// Transport or server failure; worth retrying after a cooldown.
    Failed(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("fetch task panicked")]
    Panicked,
    #[error("fetch task was aborted")]
    Aborted,
    #[error("could not start HTTP client: {0}")]
    Setup(String),
    #[error("terrain generation failed: {0}")]
    Generate(String),
}

/// A request in flight.
pub trait PendingFetch {
    /// Return the outcome once the request has finished. Yields `Some`
    /// at most once, and never after [`PendingFetch::cancel`].
    fn poll_outcome(&mut self) -> Option<FetchOutcome>;

    /// Abandon the request. Calling it again, or after completion, does nothing.
    fn cancel(&mut self);
}

pub trait FetchClient {
    type Pending: PendingFetch;

    /// Start fetching `key` at `resolution` samples per edge.
    fn fetch(&self, key: ChunkKey, resolution: u32) -> Self::Pending;
}

/// A fetch running as a Bevy task. Dropping the task cancels it.
pub struct FetchTask {
    task: Option<Task<FetchOutcome>>,
}

impl FetchTask {
    #[must_use]
    pub fn new(task: Task<FetchOutcome>) -> Self {
        Self { task: Some(task) }
    }
}

impl PendingFetch for FetchTask {
    fn poll_outcome(&mut self) -> Option<FetchOutcome> {
        if !self.task.as_ref().is_some_and(Task::is_finished) {
            return None;
        }
        let mut task = self.task.take()?;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            futures::executor::block_on(&mut task)
        }));
        Some(outcome.unwrap_or(FetchOutcome::Failed(FetchError::Panicked)))
    }

    fn cancel(&mut self) {
        self.task.take();
    }
}

/// The fetch client selected by the `source` settings section.
pub enum TerrainSource {
    Synthetic(SyntheticFetchClient),
    Http(HttpFetchClient),
}

impl FetchClient for TerrainSource {
    type Pending = FetchTask;

    fn fetch(&self, key: ChunkKey, resolution: u32) -> FetchTask {
        match self {
            TerrainSource::Synthetic(client) => client.fetch(key, resolution),
            TerrainSource::Http(client) => client.fetch(key, resolution),
        }
    }
}
