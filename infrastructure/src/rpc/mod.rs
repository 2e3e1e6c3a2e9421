//! Guest channel RPC: framing, demultiplexing, correlation and the two
//! endpoints that speak it.
//!
//! The guest and the host share one ordered byte stream with the guest's
//! terminal output. Control messages travel inside APC frames (see
//! [`codec`]) that terminals ignore, so the stream stays printable.

pub mod client;
pub mod codec;
pub mod correlator;
pub mod demux;
pub mod error;
pub mod host;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::RpcClient;
pub use codec::{END, FrameCodec, MAX_FRAME_BODY, START};
pub use correlator::{PendingRequest, RequestCorrelator};
pub use demux::{Demuxed, StreamDemultiplexer};
pub use error::{DecodeError, RpcError};
pub use host::{FsHandler, RpcHost};
pub use protocol::{Frame, GenerateParams, Message};
pub use transport::{AsyncWriteChannel, ChannelWriter, EngineChannel};
