//! Message types carried over the guest channel.
//!
//! Every frame body is a JSON object with a `type` discriminator, the
//! type-specific fields, and a `ts` timestamp (milliseconds since the Unix
//! epoch):
//!
//! | `type` | Direction | Fields |
//! |--------|-----------|--------|
//! | `llm:request` | guest → host | `id`, `method` (`"generate"`), `params` |
//! | `llm:cancel` | guest → host | `id` |
//! | `llm:chunk` | host → guest | `id`, `chunk`, `done: false` |
//! | `llm:done` | host → guest | `id` |
//! | `llm:error` | host → guest | `id`, `error` |
//! | `llm:ping` / `llm:pong` | both | `id` |
//! | `fs:read` / `fs:write` / `fs:list` / `fs:response` | both | opaque |
//!
//! Unknown types decode to [`Message::Unrecognized`] so newer peers can add
//! message kinds without breaking older ones.

use super::error::DecodeError;
use guestlink_domain::{ChatMessage, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, GenerationRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const TYPE_REQUEST: &str = "llm:request";
pub const TYPE_CANCEL: &str = "llm:cancel";
pub const TYPE_CHUNK: &str = "llm:chunk";
pub const TYPE_DONE: &str = "llm:done";
pub const TYPE_ERROR: &str = "llm:error";
pub const TYPE_PING: &str = "llm:ping";
pub const TYPE_PONG: &str = "llm:pong";
pub const TYPE_FS_READ: &str = "fs:read";
pub const TYPE_FS_WRITE: &str = "fs:write";
pub const TYPE_FS_LIST: &str = "fs:list";
pub const TYPE_FS_RESPONSE: &str = "fs:response";

/// The only method `llm:request` currently supports.
pub const METHOD_GENERATE: &str = "generate";

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// `params` of an `llm:request` with method `generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateParams {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerateParams {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            model: None,
        }
    }

    pub fn into_request(self, id: u64) -> GenerationRequest {
        let mut request = GenerationRequest::new(id, self.messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        request.model_hint = self.model;
        request
    }
}

impl From<&GenerationRequest> for GenerateParams {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            model: request.model_hint.clone(),
        }
    }
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u64,
        method: String,
        params: GenerateParams,
    },
    Cancel {
        id: u64,
    },
    Chunk {
        id: u64,
        chunk: String,
    },
    Done {
        id: u64,
    },
    Error {
        id: u64,
        error: String,
    },
    Ping {
        id: u64,
    },
    Pong {
        id: u64,
    },
    FsRead(Map<String, Value>),
    FsWrite(Map<String, Value>),
    FsList(Map<String, Value>),
    FsResponse(Map<String, Value>),
    /// A well-formed frame with a `type` this build does not know.
    Unrecognized {
        kind: String,
        payload: Map<String, Value>,
    },
}

#[derive(Deserialize)]
struct IdBody {
    id: u64,
}

#[derive(Deserialize)]
struct RequestBody {
    id: u64,
    #[serde(default = "default_method")]
    method: String,
    params: GenerateParams,
}

fn default_method() -> String {
    METHOD_GENERATE.to_string()
}

#[derive(Deserialize)]
struct ChunkBody {
    id: u64,
    chunk: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    id: u64,
    error: String,
}

impl Message {
    pub fn generate(id: u64, params: GenerateParams) -> Self {
        Message::Request {
            id,
            method: METHOD_GENERATE.to_string(),
            params,
        }
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Message::Request { .. } => TYPE_REQUEST,
            Message::Cancel { .. } => TYPE_CANCEL,
            Message::Chunk { .. } => TYPE_CHUNK,
            Message::Done { .. } => TYPE_DONE,
            Message::Error { .. } => TYPE_ERROR,
            Message::Ping { .. } => TYPE_PING,
            Message::Pong { .. } => TYPE_PONG,
            Message::FsRead(_) => TYPE_FS_READ,
            Message::FsWrite(_) => TYPE_FS_WRITE,
            Message::FsList(_) => TYPE_FS_LIST,
            Message::FsResponse(_) => TYPE_FS_RESPONSE,
            Message::Unrecognized { kind, .. } => kind.as_str(),
        }
    }

    /// Correlation id, for the message kinds that carry one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Message::Request { id, .. }
            | Message::Cancel { id }
            | Message::Chunk { id, .. }
            | Message::Done { id }
            | Message::Error { id, .. }
            | Message::Ping { id }
            | Message::Pong { id } => Some(*id),
            _ => None,
        }
    }

    /// JSON body of this message stamped with `ts`.
    pub fn to_value(&self, ts: u64) -> Value {
        let mut body = match self {
            Message::Request { id, method, params } => {
                json!({ "id": id, "method": method, "params": params })
            }
            Message::Chunk { id, chunk } => json!({ "id": id, "chunk": chunk, "done": false }),
            Message::Error { id, error } => json!({ "id": id, "error": error }),
            Message::Cancel { id }
            | Message::Done { id }
            | Message::Ping { id }
            | Message::Pong { id } => json!({ "id": id }),
            Message::FsRead(payload)
            | Message::FsWrite(payload)
            | Message::FsList(payload)
            | Message::FsResponse(payload)
            | Message::Unrecognized { payload, .. } => Value::Object(payload.clone()),
        };
        if let Value::Object(map) = &mut body {
            map.insert("type".into(), Value::String(self.kind().to_string()));
            map.insert("ts".into(), json!(ts));
        }
        body
    }

    /// Decode a frame body, returning the message and its `ts` (0 if absent).
    pub fn from_value(value: Value) -> Result<(Message, u64), DecodeError> {
        let Value::Object(mut map) = value else {
            return Err(DecodeError::MissingType);
        };
        let kind = match map.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(DecodeError::MissingType),
        };
        let ts = map.remove("ts").and_then(|v| v.as_u64()).unwrap_or(0);

        let message = match kind.as_str() {
            TYPE_REQUEST => {
                let body: RequestBody = payload(&kind, map)?;
                Message::Request {
                    id: body.id,
                    method: body.method,
                    params: body.params,
                }
            }
            TYPE_CANCEL => Message::Cancel {
                id: payload::<IdBody>(&kind, map)?.id,
            },
            TYPE_CHUNK => {
                let body: ChunkBody = payload(&kind, map)?;
                Message::Chunk {
                    id: body.id,
                    chunk: body.chunk,
                }
            }
            TYPE_DONE => Message::Done {
                id: payload::<IdBody>(&kind, map)?.id,
            },
            TYPE_ERROR => {
                let body: ErrorBody = payload(&kind, map)?;
                Message::Error {
                    id: body.id,
                    error: body.error,
                }
            }
            TYPE_PING => Message::Ping {
                id: payload::<IdBody>(&kind, map)?.id,
            },
            TYPE_PONG => Message::Pong {
                id: payload::<IdBody>(&kind, map)?.id,
            },
            TYPE_FS_READ => Message::FsRead(map),
            TYPE_FS_WRITE => Message::FsWrite(map),
            TYPE_FS_LIST => Message::FsList(map),
            TYPE_FS_RESPONSE => Message::FsResponse(map),
            _ => Message::Unrecognized { kind, payload: map },
        };
        Ok((message, ts))
    }
}

fn payload<T: DeserializeOwned>(kind: &str, map: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| DecodeError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// A decoded frame: the message plus the sender's timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Message,
    pub ts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_camel_case_params() {
        let params = GenerateParams {
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.2,
            max_tokens: 50,
            model: None,
        };
        let value = Message::generate(7, params).to_value(1000);
        assert_eq!(value["type"], "llm:request");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "generate");
        assert_eq!(value["params"]["maxTokens"], 50);
        assert_eq!(value["params"]["messages"][0]["role"], "user");
        assert!(value["params"].get("model").is_none());
        assert_eq!(value["ts"], 1000);
    }

    #[test]
    fn chunk_body_carries_done_false() {
        let value = Message::Chunk {
            id: 3,
            chunk: "Hel".into(),
        }
        .to_value(0);
        assert_eq!(value["chunk"], "Hel");
        assert_eq!(value["done"], false);
    }

    #[test]
    fn request_params_fall_back_to_defaults() {
        let value = json!({
            "type": "llm:request",
            "id": 1,
            "params": { "messages": [{ "role": "user", "content": "hi" }] },
            "ts": 5
        });
        let (message, ts) = Message::from_value(value).unwrap();
        assert_eq!(ts, 5);
        let Message::Request { method, params, .. } = message else {
            panic!("expected request");
        };
        assert_eq!(method, "generate");
        assert_eq!(params.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(params.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let value = json!({ "type": "clipboard:copy", "text": "x", "ts": 1 });
        let (message, _) = Message::from_value(value).unwrap();
        match message {
            Message::Unrecognized { kind, payload } => {
                assert_eq!(kind, "clipboard:copy");
                assert_eq!(payload["text"], "x");
                assert!(!payload.contains_key("ts"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn known_type_with_bad_payload_is_invalid() {
        let value = json!({ "type": "llm:chunk", "id": "seven" });
        let err = Message::from_value(value).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { ref kind, .. } if kind == "llm:chunk"));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(matches!(
            Message::from_value(json!({ "id": 1 })),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            Message::from_value(json!([1, 2])),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn fs_payload_is_kept_opaque() {
        let value = json!({ "type": "fs:read", "path": "/etc/hosts", "ts": 9 });
        let (message, _) = Message::from_value(value).unwrap();
        let Message::FsRead(payload) = &message else {
            panic!("expected fs:read");
        };
        assert_eq!(payload["path"], "/etc/hosts");
        assert_eq!(message.to_value(9)["path"], "/etc/hosts");
    }

    #[test]
    fn params_convert_into_request() {
        let mut params = GenerateParams::new(vec![ChatMessage::user("hi")]);
        params.model = Some("qwen2.5:0.5b".into());
        let request = params.into_request(11);
        assert_eq!(request.id, 11);
        assert_eq!(request.model_hint.as_deref(), Some("qwen2.5:0.5b"));
        assert_eq!(GenerateParams::from(&request).model.as_deref(), Some("qwen2.5:0.5b"));
    }
}
