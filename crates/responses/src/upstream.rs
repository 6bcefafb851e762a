//! Upstream model routing and the chat completions HTTP client.

mod client;
mod resolve;

pub use client::{ChatChunkStream, UpstreamClient};
pub use resolve::{Upstream, resolve_upstream};
