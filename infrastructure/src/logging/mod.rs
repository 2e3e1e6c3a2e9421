//! RPC transcript logging.
//!
//! [`JsonlConversationLogger`] implements the
//! [`ConversationLogger`](guestlink_application::ConversationLogger) port.

mod jsonl_logger;

pub use jsonl_logger::JsonlConversationLogger;
