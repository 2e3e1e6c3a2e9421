//! Guest-side RPC orchestrator.
//!
//! [`RpcClient`] writes request frames to the channel and is fed the bytes
//! coming back. Chunks are delivered through the caller's callback as they
//! arrive; the call returns once the terminal frame for its id is seen, the
//! caller cancels, or the optional timeout elapses.

use super::correlator::RequestCorrelator;
use super::demux::StreamDemultiplexer;
use super::error::{Result, RpcError};
use super::protocol::{GenerateParams, Message};
use super::transport::ChannelWriter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default time to wait for a pong.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Guest-side endpoint of the channel.
pub struct RpcClient {
    writer: Arc<dyn ChannelWriter>,
    demux: Mutex<StreamDemultiplexer>,
    correlator: RequestCorrelator<()>,
    /// Chunk delivery per in-flight generate call.
    streams: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    request_timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(writer: Arc<dyn ChannelWriter>) -> Self {
        Self {
            writer,
            demux: Mutex::new(StreamDemultiplexer::new()),
            correlator: RequestCorrelator::new(),
            streams: Mutex::new(HashMap::new()),
            request_timeout: None,
        }
    }

    /// Give up on a generation after `timeout` without a terminal frame.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_frame_body(mut self, max_body: usize) -> Self {
        self.demux = Mutex::new(StreamDemultiplexer::with_max_body(max_body));
        self
    }

    /// Feed bytes received from the host. Returns bytes that were not part of
    /// any frame.
    pub fn feed(&self, chunk: &[u8]) -> Vec<u8> {
        let demuxed = self
            .demux
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .parse(chunk);
        for message in demuxed.messages {
            self.dispatch(message);
        }
        demuxed.output
    }

    /// The channel closed: fail everything still waiting.
    pub fn close(&self) {
        self.lock_streams().clear();
        self.correlator.reject_all(|| RpcError::ChannelClosed);
    }

    /// Number of calls awaiting a terminal frame.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Run one generation, calling `on_chunk` for every streamed delta.
    ///
    /// Returns the full text. Cancelling `cancel` (or hitting the request
    /// timeout) sends `llm:cancel` and returns [`RpcError::Cancelled`]
    /// (or [`RpcError::Timeout`]) without waiting for the host.
    pub async fn generate(
        &self,
        params: GenerateParams,
        mut on_chunk: impl FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<String> {
        let id = self.correlator.generate_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.lock_streams().insert(id, tx);
        let mut pending = match self.correlator.register(id) {
            Ok(pending) => pending,
            Err(e) => {
                self.lock_streams().remove(&id);
                return Err(e);
            }
        };
        // Cleans up if this future is dropped before a terminal outcome.
        let guard = InFlight {
            client: self,
            id,
            armed: true,
        };

        if let Err(e) = self.writer.send(&Message::generate(id, params)).await {
            guard.disarm();
            self.lock_streams().remove(&id);
            self.correlator.cancel(id);
            return Err(e);
        }
        debug!("Request {} sent", id);

        let timeout = self.request_timeout;
        let deadline = async move {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut content = String::new();
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(RpcError::Cancelled),
                _ = &mut deadline => break Err(RpcError::Timeout),
                Some(delta) = rx.recv() => {
                    on_chunk(&delta);
                    content.push_str(&delta);
                }
                result = &mut pending => break result,
            }
        };

        guard.disarm();
        match outcome {
            Ok(()) => {
                // Chunks that arrived in the same read as the terminal frame.
                while let Ok(delta) = rx.try_recv() {
                    on_chunk(&delta);
                    content.push_str(&delta);
                }
                Ok(content)
            }
            Err(e @ (RpcError::Cancelled | RpcError::Timeout)) => {
                self.abandon(id).await;
                Err(e)
            }
            Err(e) => {
                self.lock_streams().remove(&id);
                Err(e)
            }
        }
    }

    /// Stop waiting for `id` and tell the host to stop working on it.
    pub async fn abandon(&self, id: u64) {
        self.lock_streams().remove(&id);
        self.correlator.cancel(id);
        debug!("Request {} abandoned, sending cancel", id);
        if let Err(e) = self.writer.send(&Message::Cancel { id }).await {
            warn!("Failed to send cancel for request {}: {}", id, e);
        }
    }

    /// Round-trip a ping through the host.
    pub async fn ping(&self) -> Result<Duration> {
        let id = self.correlator.generate_id();
        let pending = self.correlator.register(id)?;
        let started = std::time::Instant::now();
        if let Err(e) = self.writer.send(&Message::Ping { id }).await {
            self.correlator.cancel(id);
            return Err(e);
        }
        match tokio::time::timeout(PING_TIMEOUT, pending).await {
            Ok(result) => result.map(|()| started.elapsed()),
            Err(_) => {
                self.correlator.cancel(id);
                Err(RpcError::Timeout)
            }
        }
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Chunk { id, chunk } => {
                let streams = self.lock_streams();
                match streams.get(&id) {
                    Some(tx) => {
                        let _ = tx.send(chunk);
                    }
                    None => trace!("Dropping chunk for unknown request {}", id),
                }
            }
            Message::Done { id } => {
                self.lock_streams().remove(&id);
                self.correlator.resolve(id, ());
            }
            Message::Error { id, error } => {
                self.lock_streams().remove(&id);
                self.correlator.reject(id, RpcError::Remote(error));
            }
            Message::Pong { id } => {
                self.correlator.resolve(id, ());
            }
            other => debug!("Ignoring {} on guest side", other.kind()),
        }
    }

    fn lock_streams(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<String>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pending state of one `generate` call. Dropped while armed, it forgets the
/// request and sends a best-effort `llm:cancel`.
struct InFlight<'a> {
    client: &'a RpcClient,
    id: u64,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        self.client.lock_streams().remove(&id);
        self.client.correlator.cancel(id);
        debug!("Request {} dropped by caller, sending cancel", id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let writer = Arc::clone(&self.client.writer);
                handle.spawn(async move {
                    if let Err(e) = writer.send(&Message::Cancel { id }).await {
                        warn!("Failed to send cancel for request {}: {}", id, e);
                    }
                });
            }
            Err(_) => debug!("No runtime to send cancel for request {}", id),
        }
    }
}
