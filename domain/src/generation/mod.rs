//! Generation requests and their streamed results

pub mod chunk;
pub mod entities;
