//! Abstractions over the message bus carrying indexer traffic.
//!
//! The engine assumes a connection-oriented, asynchronous
//! request/response transport with correlation: every request produces
//! exactly one reply or one transport failure. Framing, correlation
//! ids, and the socket itself belong to the implementor.
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;

/// One live request/response channel to an indexer.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Issue `method` with `body` and await the raw response payload.
    ///
    /// Implementations report connection loss and framing problems as
    /// [`TransportError`]; they do not need to enforce a deadline (the
    /// codec wraps every call in its own timeout).
    async fn request(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Dials an indexer endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a bus to the server named by `url`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn MessageBus>, TransportError>;
}
