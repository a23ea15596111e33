//! Remote tile endpoint client.
//!
//! Requests go out through a shared `reqwest` client on a small tokio
//! runtime owned by this client. Each request is wrapped in a Bevy IO task
//! so the scheduler sees the same [`FetchTask`] handle as for any other
//! source; dropping that task aborts the underlying tokio task.
//!
//! Status mapping: `200` is a payload, `202`, `204` and `425` mean the tile
//! is still being generated, anything else is a transient failure.
use super::{FetchClient, FetchError, FetchOutcome, FetchTask};
use crate::chunk::ChunkKey;
use bevy::log::debug;
use bevy::tasks::{IoTaskPool, TaskPool};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Coarse class of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ready,
    NotReady,
    Failed,
}

#[must_use]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200 => StatusClass::Ready,
        202 | 204 | 425 => StatusClass::NotReady,
        _ => StatusClass::Failed,
    }
}

/// Expand the endpoint template for one chunk request.
///
/// `{resolution}`, `{x}` and `{z}` are substituted. A template without any
/// placeholder is treated as a base URL and gets `/{resolution}/{x}/{z}.png`
/// appended.
///
/// # Examples
/// ```
/// use terrastream::chunk::ChunkKey;
/// use terrastream::fetch::http::chunk_url;
/// assert_eq!(
///     chunk_url("https://tiles.example/terrain/", ChunkKey::new(-3, 7), 33),
///     "https://tiles.example/terrain/33/-3/7.png"
/// );
/// assert_eq!(
///     chunk_url("http://localhost:8080/t?r={resolution}&x={x}&z={z}", ChunkKey::new(1, 2), 9),
///     "http://localhost:8080/t?r=9&x=1&z=2"
/// );
/// ```
#[must_use]
pub fn chunk_url(template: &str, key: ChunkKey, resolution: u32) -> String {
    let has_placeholders = ["{resolution}", "{x}", "{z}"].iter().any(|p| template.contains(p));
    if !has_placeholders {
        return format!("{}/{resolution}/{}/{}.png", template.trim_end_matches('/'), key.x, key.z);
    }
    template
        .replace("{resolution}", &resolution.to_string())
        .replace("{x}", &key.x.to_string())
        .replace("{z}", &key.z.to_string())
}

/// Fetches chunk payloads from an HTTP tile endpoint.
pub struct HttpFetchClient {
    client: reqwest::Client,
    runtime: Arc<tokio::runtime::Runtime>,
    endpoint: String,
}

impl HttpFetchClient {
    /// Build a client for `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    /// Returns [`FetchError::Setup`] if the runtime or HTTP client cannot be
    /// created.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("terrain-http")
            .enable_all()
            .build()
            .map_err(|e| FetchError::Setup(format!("tokio runtime init failed: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Setup(format!("http client init failed: {e}")))?;
        Ok(Self { client, runtime: Arc::new(runtime), endpoint: endpoint.into() })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FetchClient for HttpFetchClient {
    type Pending = FetchTask;

    fn fetch(&self, key: ChunkKey, resolution: u32) -> FetchTask {
        let url = chunk_url(&self.endpoint, key, resolution);
        debug!("GET {url}");
        let request = AbortOnDrop(self.runtime.spawn(request_chunk(self.client.clone(), url)));
        let task = IoTaskPool::get_or_init(TaskPool::new).spawn(async move {
            match request.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => FetchOutcome::Failed(FetchError::Panicked),
                Err(_) => FetchOutcome::Failed(FetchError::Aborted),
            }
        });
        FetchTask::new(task)
    }
}

async fn request_chunk(client: reqwest::Client, url: String) -> FetchOutcome {
    let response = match client
        .get(&url)
        .header("Accept", "image/png,application/octet-stream")
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return FetchOutcome::Failed(FetchError::Transport(format!("{url}: {e}"))),
    };

    let status = response.status().as_u16();
    match classify_status(status) {
        StatusClass::Ready => match response.bytes().await {
            Ok(bytes) => FetchOutcome::Ready(bytes.to_vec()),
            Err(e) => FetchOutcome::Failed(FetchError::Body(format!("{url}: {e}"))),
        },
        StatusClass::NotReady => FetchOutcome::NotReady,
        StatusClass::Failed => FetchOutcome::Failed(FetchError::Status(status)),
    }
}

/// Tokio join handle that aborts its task when dropped.
struct AbortOnDrop(tokio::task::JoinHandle<FetchOutcome>);

impl Future for AbortOnDrop {
    type Output = Result<FetchOutcome, tokio::task::JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
