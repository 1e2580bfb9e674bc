//! Chat over HTTP: SSE streaming replies, token usage normalization and
//! the refresh-and-retry policy for expired access tokens.

pub mod client;
pub mod config;
pub mod error;
pub mod result;
pub mod sse;
pub mod usage;

pub use {
    client::ChatClient,
    config::ChatConfig,
    error::{Error, Result},
    result::{ChatResult, ContentBlock},
    sse::{ChatStream, SseDecoder, SseEvent, StreamStep},
    usage::{TokenUsage, UsageCost, UsageShape, normalize_usage},
};
