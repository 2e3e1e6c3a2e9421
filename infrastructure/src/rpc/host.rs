//! Host-side RPC orchestrator.
//!
//! [`RpcHost`] sits on the guest's output stream. Every chunk of guest output
//! goes through [`RpcHost::feed`], which returns the bytes meant for the
//! terminal and acts on any control frames found in between:
//!
//! ```text
//! llm:request ─▶ token registered ─▶ service task ─▶ llm:chunk* ─▶ llm:done | llm:error
//! llm:cancel  ─▶ token cancelled, bookkeeping freed, nothing more written for the id
//! llm:ping    ─▶ llm:pong (same id)
//! fs:*        ─▶ FsHandler, if one is installed
//! ```
//!
//! Each request runs on its own task, so requests with different ids may
//! interleave on the wire; chunks of one id are always written in order and
//! before its terminal frame.

use super::demux::StreamDemultiplexer;
use super::protocol::{METHOD_GENERATE, Message};
use super::transport::ChannelWriter;
use async_trait::async_trait;
use guestlink_application::{
    ChunkSink, ConversationEvent, ConversationLogger, GatewayError, GenerationService,
    NoConversationLogger,
};
use guestlink_domain::GenerationRequest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serves `fs:*` frames from the guest.
#[async_trait]
pub trait FsHandler: Send + Sync {
    /// Handle one filesystem message. A returned message is written back.
    async fn handle(&self, message: Message) -> Option<Message>;
}

type ActiveRequests = Arc<Mutex<HashMap<u64, CancellationToken>>>;

fn lock(active: &ActiveRequests) -> std::sync::MutexGuard<'_, HashMap<u64, CancellationToken>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Host-side endpoint of the guest channel.
pub struct RpcHost {
    service: Arc<dyn GenerationService>,
    writer: Arc<dyn ChannelWriter>,
    demux: Mutex<StreamDemultiplexer>,
    /// Cancellation token per in-flight request id.
    active: ActiveRequests,
    fs_handler: Option<Arc<dyn FsHandler>>,
    conversation_logger: Arc<dyn ConversationLogger>,
}

impl RpcHost {
    pub fn new(service: Arc<dyn GenerationService>, writer: Arc<dyn ChannelWriter>) -> Self {
        Self {
            service,
            writer,
            demux: Mutex::new(StreamDemultiplexer::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            fs_handler: None,
            conversation_logger: Arc::new(NoConversationLogger),
        }
    }

    pub fn with_fs_handler(mut self, handler: Arc<dyn FsHandler>) -> Self {
        self.fs_handler = Some(handler);
        self
    }

    pub fn with_conversation_logger(mut self, logger: Arc<dyn ConversationLogger>) -> Self {
        self.conversation_logger = logger;
        self
    }

    pub fn with_max_frame_body(mut self, max_body: usize) -> Self {
        self.demux = Mutex::new(StreamDemultiplexer::with_max_body(max_body));
        self
    }

    /// Feed a chunk of guest output. Returns the bytes that are ordinary
    /// terminal output; control frames are handled and stripped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn feed(&self, chunk: &[u8]) -> Vec<u8> {
        let demuxed = self
            .demux
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .parse(chunk);
        for message in demuxed.messages {
            self.handle_message(message);
        }
        demuxed.output
    }

    /// Release bytes held back by the demultiplexer. Call when the guest
    /// output stream ends.
    pub fn finish(&self) -> Vec<u8> {
        self.demux.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }

    /// Number of requests currently being served.
    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Cancel every in-flight request. Nothing more is written for them.
    pub fn shutdown(&self) {
        let drained: Vec<_> = lock(&self.active).drain().collect();
        for (id, token) in drained {
            debug!("Host shutdown: cancelling request {}", id);
            token.cancel();
        }
    }

    /// Act on one decoded control message.
    pub fn handle_message(&self, message: Message) {
        match message {
            Message::Request { id, method, params } => {
                if method != METHOD_GENERATE {
                    warn!("Request {}: unsupported method '{}'", id, method);
                    self.spawn_write(Message::Error {
                        id,
                        error: format!("unsupported method: {}", method),
                    });
                    return;
                }
                self.start_request(params.into_request(id));
            }
            Message::Cancel { id } => {
                let token = lock(&self.active).remove(&id);
                match token {
                    Some(token) => {
                        info!("Request {} cancelled by guest", id);
                        token.cancel();
                        self.conversation_logger.log(ConversationEvent::cancel(id));
                    }
                    None => debug!("Cancel for unknown request {}", id),
                }
            }
            Message::Ping { id } => self.spawn_write(Message::Pong { id }),
            fs @ (Message::FsRead(_)
            | Message::FsWrite(_)
            | Message::FsList(_)
            | Message::FsResponse(_)) => {
                let Some(handler) = self.fs_handler.clone() else {
                    debug!("No filesystem handler installed, ignoring {}", fs.kind());
                    return;
                };
                let writer = Arc::clone(&self.writer);
                tokio::spawn(async move {
                    if let Some(reply) = handler.handle(fs).await
                        && let Err(e) = writer.send(&reply).await
                    {
                        warn!("Failed to write {}: {}", reply.kind(), e);
                    }
                });
            }
            Message::Unrecognized { kind, .. } => {
                debug!("Ignoring unrecognized message type '{}'", kind);
            }
            other => {
                debug!("Ignoring guest-bound message {} on host side", other.kind());
            }
        }
    }

    fn start_request(&self, request: GenerationRequest) {
        let id = request.id;
        if let Err(e) = request.validate() {
            warn!("Request {} rejected: {}", id, e);
            self.spawn_write(Message::Error {
                id,
                error: e.to_string(),
            });
            return;
        }

        let token = CancellationToken::new();
        {
            let mut active = lock(&self.active);
            if active.contains_key(&id) {
                drop(active);
                warn!("Request {} is already in flight", id);
                self.spawn_write(Message::Error {
                    id,
                    error: format!("request id {} is already in flight", id),
                });
                return;
            }
            active.insert(id, token.clone());
        }

        debug!("Request {}: {} message(s)", id, request.messages.len());
        self.conversation_logger.log(ConversationEvent::request(
            id,
            request.messages.len(),
            request.model_hint.as_deref(),
        ));

        tokio::spawn(serve_request(
            request,
            token,
            Arc::clone(&self.service),
            Arc::clone(&self.writer),
            Arc::clone(&self.active),
            Arc::clone(&self.conversation_logger),
        ));
    }

    fn spawn_write(&self, message: Message) {
        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move {
            if let Err(e) = writer.send(&message).await {
                warn!("Failed to write {}: {}", message.kind(), e);
            }
        });
    }
}

impl Drop for RpcHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_request(
    request: GenerationRequest,
    token: CancellationToken,
    service: Arc<dyn GenerationService>,
    writer: Arc<dyn ChannelWriter>,
    active: ActiveRequests,
    logger: Arc<dyn ConversationLogger>,
) {
    let id = request.id;
    let (sink, mut chunks) = ChunkSink::channel(id);

    let generation = async {
        let result = service.generate(&request, &sink, &token).await;
        // Closes the chunk channel so the forwarder finishes.
        drop(sink);
        result
    };
    let forward = async {
        while let Some(chunk) = chunks.recv().await {
            if token.is_cancelled() {
                continue;
            }
            let message = Message::Chunk {
                id,
                chunk: chunk.content_delta,
            };
            if let Err(e) = writer.send(&message).await {
                warn!("Request {}: failed to write chunk: {}", id, e);
            }
        }
    };
    let (result, ()) = tokio::join!(generation, forward);

    let still_active = lock(&active).remove(&id).is_some();
    if token.is_cancelled() || !still_active {
        debug!("Request {} ended after cancellation, writing nothing", id);
        return;
    }

    let terminal = match result {
        Ok(completion) => {
            info!(
                "Request {} served by {} ({} chunks)",
                id, completion.backend_id, completion.chunk_count
            );
            logger.log(ConversationEvent::done(
                id,
                &completion.backend_id,
                &completion.model_id,
                completion.chunk_count,
                completion.content.len(),
            ));
            Message::Done { id }
        }
        Err(GatewayError::Cancelled) => {
            debug!("Request {} cancelled by backend", id);
            return;
        }
        Err(e) => {
            warn!("Request {} failed: {}", id, e);
            logger.log(ConversationEvent::error(id, &e.to_string()));
            Message::Error {
                id,
                error: e.to_string(),
            }
        }
    };
    if let Err(e) = writer.send(&terminal).await {
        warn!("Request {}: failed to write {}: {}", id, terminal.kind(), e);
    }
}
