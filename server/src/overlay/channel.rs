//! Asynchronous request/response bridge to the external tile producer
//!
//! This module provides:
//! - `TileRequestChannel` trait, the capability the tile providers fetch through
//! - `TileFetch`, an awaitable and abortable handle to one in-flight request
//! - `ProducerChannel`, which forwards requests to a connected producer over a
//!   tokio mpsc queue and correlates the answers by request id
//!
//! The channel never retries, never deduplicates and imposes no timeout.
//! A producer that answers with malformed data yields `TileResult::Absent`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{OverlayId, TileCoordinate, TileResult};

/// Default capacity of the queue between the channel and the producer
pub const DEFAULT_PRODUCER_QUEUE_SIZE: usize = 256;

/// Capability used by tile providers to reach the tile producer
pub trait TileRequestChannel: Send + Sync {
    /// Start fetching one tile. Returns immediately; the answer arrives when
    /// the returned task is awaited.
    fn fetch(&self, overlay_id: &OverlayId, coordinate: TileCoordinate) -> TileFetch;
}

/// Handle to a spawned tile fetch.
///
/// Awaiting yields the task's output. A task that panicked or was aborted
/// yields `T::default()`, which is the "no tile" value for the tile types.
///
/// Dropping the handle aborts the task, so a fetch that owns other fetches
/// cancels them when it is itself aborted.
pub struct TileFetch<T = TileResult> {
    handle: JoinHandle<T>,
}

impl<T> TileFetch<T>
where
    T: Send + 'static,
{
    /// Run `future` on the tokio runtime and return a handle to it
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// A fetch that is already resolved
    pub fn ready(value: T) -> Self {
        Self::spawn(async move { value })
    }
}

impl<T> TileFetch<T> {
    /// Stop the fetch. Awaiting it afterwards yields the default value.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Drop for TileFetch<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<T: Default> Future for TileFetch<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(e)) => {
                if e.is_panic() {
                    warn!("Tile fetch task panicked: {}", e);
                }
                Poll::Ready(T::default())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A tile request as handed to the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRequest {
    /// Correlation id, echoed back in the producer's answer
    pub request_id: Uuid,
    pub overlay_id: OverlayId,
    pub coordinate: TileCoordinate,
}

/// Tile payload sent back by the producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerTile {
    pub width: u32,
    pub height: u32,
    /// Raw image bytes; missing means "no tile here"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl ProducerTile {
    /// Interpret the payload. Anything that cannot be a tile is `Absent`.
    pub fn into_result(self) -> TileResult {
        match self.data {
            Some(data) if !data.is_empty() && self.width > 0 && self.height > 0 => {
                TileResult::Present(Bytes::from(data))
            }
            Some(_) => {
                debug!(
                    "Malformed tile payload ({}x{}), treating as absent",
                    self.width, self.height
                );
                TileResult::Absent
            }
            None => TileResult::Absent,
        }
    }
}

struct PendingRequest {
    producer_id: Uuid,
    responder: oneshot::Sender<TileResult>,
}

/// A connected producer and the queue it drains
#[derive(Clone)]
struct Producer {
    id: Uuid,
    queue: mpsc::Sender<ProducerRequest>,
}

struct ProducerState {
    /// Connected producers in connection order; the last one serves requests
    producers: RwLock<Vec<Producer>>,
    pending: DashMap<Uuid, PendingRequest>,
    queue_size: usize,
}

/// Removes a correlation entry when its request finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a DashMap<Uuid, PendingRequest>,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
        gauge!("tile_overlay_producer_pending").set(self.pending.len() as f64);
    }
}

impl ProducerState {
    async fn current_producer(&self) -> Option<Producer> {
        self.producers.read().await.last().cloned()
    }

    async fn is_registered(&self, producer_id: Uuid) -> bool {
        self.producers
            .read()
            .await
            .iter()
            .any(|producer| producer.id == producer_id)
    }

    async fn request(&self, overlay_id: OverlayId, coordinate: TileCoordinate) -> TileResult {
        let Some(producer) = self.current_producer().await else {
            debug!(
                "No tile producer connected, {} {:?} is absent",
                overlay_id, coordinate
            );
            counter!("tile_overlay_producer_requests_total", "outcome" => "no_producer")
                .increment(1);
            return TileResult::Absent;
        };
        self.request_from(producer, overlay_id, coordinate).await
    }

    async fn request_from(
        &self,
        producer: Producer,
        overlay_id: OverlayId,
        coordinate: TileCoordinate,
    ) -> TileResult {
        let request_id = Uuid::new_v4();
        let (responder, answer) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingRequest {
                producer_id: producer.id,
                responder,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };
        gauge!("tile_overlay_producer_pending").set(self.pending.len() as f64);

        let request = ProducerRequest {
            request_id,
            overlay_id,
            coordinate,
        };
        if producer.queue.send(request).await.is_err() {
            warn!("Tile producer {} went away before the request was sent", producer.id);
            counter!("tile_overlay_producer_requests_total", "outcome" => "send_failed")
                .increment(1);
            return TileResult::Absent;
        }

        // A disconnect racing this request may have swept the pending map
        // before our entry was inserted
        if !self.is_registered(producer.id).await {
            debug!(
                "Tile producer {} disconnected while request {} was queued",
                producer.id, request_id
            );
            counter!("tile_overlay_producer_requests_total", "outcome" => "send_failed")
                .increment(1);
            return TileResult::Absent;
        }
        counter!("tile_overlay_producer_requests_total", "outcome" => "sent").increment(1);

        // A dropped responder means the producer disconnected
        answer.await.unwrap_or_default()
    }
}

/// `TileRequestChannel` backed by the most recently connected producer
#[derive(Clone)]
pub struct ProducerChannel {
    inner: Arc<ProducerState>,
}

impl ProducerChannel {
    pub fn new(queue_size: usize) -> Self {
        Self {
            inner: Arc::new(ProducerState {
                producers: RwLock::new(Vec::new()),
                pending: DashMap::new(),
                queue_size: queue_size.max(1),
            }),
        }
    }

    /// Install a new producer. It serves every request from now on, until it
    /// disconnects or a newer producer connects.
    ///
    /// Returns the producer id (needed to disconnect) and the queue the
    /// producer must drain.
    pub async fn connect_producer(&self) -> (Uuid, mpsc::Receiver<ProducerRequest>) {
        let producer_id = Uuid::new_v4();
        let (queue, rx) = mpsc::channel(self.inner.queue_size);

        let mut producers = self.inner.producers.write().await;
        match producers.last() {
            Some(previous) => info!(
                "Tile producer {} takes over from {}",
                producer_id, previous.id
            ),
            None => info!("Tile producer {} connected", producer_id),
        }
        producers.push(Producer {
            id: producer_id,
            queue,
        });
        drop(producers);
        counter!("tile_overlay_producer_connections_total").increment(1);

        (producer_id, rx)
    }

    /// Remove a producer. Its unanswered requests resolve as absent, and the
    /// most recently connected remaining producer takes over.
    pub async fn disconnect_producer(&self, producer_id: Uuid) {
        {
            let mut producers = self.inner.producers.write().await;
            producers.retain(|producer| producer.id != producer_id);
            match producers.last() {
                Some(current) => info!(
                    "Tile producer {} disconnected, {} serves tiles",
                    producer_id, current.id
                ),
                None => info!("Tile producer {} disconnected", producer_id),
            }
        }

        let before = self.inner.pending.len();
        self.inner
            .pending
            .retain(|_, pending| pending.producer_id != producer_id);
        let dropped = before.saturating_sub(self.inner.pending.len());
        if dropped > 0 {
            debug!(
                "Resolved {} pending tile requests of producer {} as absent",
                dropped, producer_id
            );
        }
    }

    /// Deliver the producer's answer to request `request_id`.
    ///
    /// Returns false if nobody is waiting for that request any more.
    pub fn complete(&self, request_id: Uuid, tile: Option<ProducerTile>) -> bool {
        let Some((_, pending)) = self.inner.pending.remove(&request_id) else {
            debug!("Dropping answer for unknown tile request {}", request_id);
            return false;
        };

        let result = tile.map(ProducerTile::into_result).unwrap_or_default();
        // The requester may have timed out in the meantime
        pending.responder.send(result).is_ok()
    }

    pub async fn is_connected(&self) -> bool {
        !self.inner.producers.read().await.is_empty()
    }

    /// Number of requests waiting for a producer answer
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Default for ProducerChannel {
    fn default() -> Self {
        Self::new(DEFAULT_PRODUCER_QUEUE_SIZE)
    }
}

impl TileRequestChannel for ProducerChannel {
    fn fetch(&self, overlay_id: &OverlayId, coordinate: TileCoordinate) -> TileFetch {
        let state = Arc::clone(&self.inner);
        let overlay_id = overlay_id.clone();
        TileFetch::spawn(async move { state.request(overlay_id, coordinate).await })
    }
}
