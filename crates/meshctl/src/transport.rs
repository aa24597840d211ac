/// WebSocket mesh gateway adapter.
mod ws;

/// In-memory transport used by tests.
#[cfg(test)]
pub(crate) mod memory;

pub(crate) use ws::WsTransport;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use tokio_tungstenite::tungstenite::{self, http::header::InvalidHeaderValue};

/// Transport-level errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum TransportError {
    /// WebSocket protocol or connection error.
    #[display(fmt = "websocket error: {}", _0)]
    WebSocket(tungstenite::Error),

    /// Shared secret cannot be sent as a header value.
    #[display(fmt = "invalid secret: {}", _0)]
    InvalidSecret(InvalidHeaderValue),

    /// Inbound frame does not follow the gateway framing.
    #[display(fmt = "malformed frame")]
    MalformedFrame,

    /// Mesh refused the connection.
    #[display(fmt = "mesh endpoint unavailable")]
    Unavailable,
}

/// Tagged payload delivered by the mesh.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Data tag.
    pub tag: u32,

    /// Logical source the frame was emitted by.
    pub source: String,

    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Mesh connection factory.
///
/// A transport hands out one outbound and one inbound channel per command.
/// Both are scoped to the session identifier, so that the mesh routes
/// responses back to this process only.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    /// Outbound channel type.
    type Publisher: Publisher + 'static;

    /// Inbound channel type.
    type Subscriber: Subscriber;

    /// Connect the outbound channel.
    async fn publisher(&self, session: &str) -> Result<Self::Publisher, TransportError>;

    /// Connect the inbound channel, observing frames tagged with `tag`.
    async fn subscriber(&self, session: &str, tag: u32)
        -> Result<Self::Subscriber, TransportError>;
}

/// Outbound channel.
#[async_trait]
pub(crate) trait Publisher: Send + Sync {
    /// Publish a tagged payload.
    async fn publish(&self, tag: u32, payload: &[u8]) -> Result<(), TransportError>;

    /// Release the channel. Errors are not reported, the channel is unusable afterwards.
    async fn close(&self);
}

/// Inbound channel.
#[async_trait]
pub(crate) trait Subscriber: Send {
    /// Wait for the next frame. [`None`] means the channel was closed by the mesh.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Release the channel.
    async fn close(&mut self);
}
