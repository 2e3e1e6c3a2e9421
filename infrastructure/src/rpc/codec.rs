//! Frame encoding.
//!
//! A frame is `START <json body> END`, where the markers are an APC
//! introducer and a string terminator. Terminals ignore APC strings, so a
//! guest can interleave frames with ordinary output on one byte stream.
//!
//! The body is produced by `serde_json`, which escapes every control
//! character (`U+0000..=U+001F`) as `\u00XX`. An encoded body therefore
//! never contains a raw `ESC`, and `END` cannot appear inside it. Bodies that
//! do contain a raw `ESC` did not come from an encoder and are rejected.

use super::error::DecodeError;
use super::protocol::{Frame, Message};

/// Frame start marker: `ESC _ g l k ;`.
pub const START: &[u8] = b"\x1b_glk;";

/// Frame end marker: `ESC \`.
pub const END: &[u8] = b"\x1b\\";

/// Largest body the demultiplexer waits for before treating a start marker
/// as ordinary output.
pub const MAX_FRAME_BODY: usize = 1024 * 1024;

const ESC: u8 = 0x1b;

/// Stateless frame encoder/decoder.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode `message` stamped with the current time.
    pub fn encode(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
        Self::encode_at(message, now_millis())
    }

    /// Encode `message` with an explicit timestamp.
    pub fn encode_at(message: &Message, ts: u64) -> Result<Vec<u8>, serde_json::Error> {
        let body = serde_json::to_vec(&message.to_value(ts))?;
        let mut frame = Vec::with_capacity(START.len() + body.len() + END.len());
        frame.extend_from_slice(START);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(END);
        Ok(frame)
    }

    /// Decode a frame body (the bytes between the markers).
    pub fn decode(body: &[u8]) -> Result<Message, DecodeError> {
        Self::decode_frame(body).map(|frame| frame.message)
    }

    pub fn decode_frame(body: &[u8]) -> Result<Frame, DecodeError> {
        if body.contains(&ESC) {
            return Err(DecodeError::RawControlByte);
        }
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let (message, ts) = Message::from_value(value)?;
        Ok(Frame { message, ts })
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
