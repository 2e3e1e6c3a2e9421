//! Outgoing side of the guest channel.
//!
//! Frames must reach the channel whole: two tasks writing at once must never
//! interleave mid-frame. Every [`ChannelWriter`] serialises its writes.

use super::codec::FrameCodec;
use super::error::{Result, RpcError};
use super::protocol::Message;
use async_trait::async_trait;
use guestlink_application::ExecutionEngine;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

/// Sink for encoded frames.
#[async_trait]
pub trait ChannelWriter: Send + Sync {
    /// Write `bytes` atomically with respect to other writers.
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()>;

    /// Encode and write one message.
    async fn send(&self, message: &Message) -> Result<()> {
        let frame = FrameCodec::encode(message)?;
        trace!("Channel sending {} ({} bytes)", message.kind(), frame.len());
        self.write_bytes(&frame).await
    }
}

/// Writes frames to any async writer (stdout, a pipe, a socket half).
pub struct AsyncWriteChannel<W> {
    writer: Mutex<W>,
}

impl<W> AsyncWriteChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> ChannelWriter for AsyncWriteChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Writes frames into the guest's input through its execution engine.
pub struct EngineChannel {
    engine: Arc<dyn ExecutionEngine>,
}

impl EngineChannel {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ChannelWriter for EngineChannel {
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.engine
            .send_input(bytes)
            .await
            .map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))
    }
}
