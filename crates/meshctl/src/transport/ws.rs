use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    tungstenite::{
        client::IntoClientRequest,
        http::header::{HeaderValue, AUTHORIZATION},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::{Frame, Publisher, Subscriber, Transport, TransportError};

/// WebSocket connection to the mesh gateway.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Mesh transport speaking to a WebSocket gateway.
///
/// Outbound frames are `tag (u32, BE) | payload`, inbound frames are
/// `tag (u32, BE) | source length (u16, BE) | source | payload`.
pub(crate) struct WsTransport {
    /// Gateway base URL, e.g. `ws://localhost:9000`.
    endpoint: String,

    /// Shared secret, sent as a bearer token when non-empty.
    secret: String,
}

impl WsTransport {
    /// Create a transport for a normalized gateway URL.
    pub(crate) fn new(endpoint: String, secret: String) -> Self {
        Self { endpoint, secret }
    }

    /// Open a gateway connection for the given route.
    async fn connect(&self, route: &str) -> Result<WsStream, TransportError> {
        let mut request = format!("{}/{route}", self.endpoint).into_client_request()?;

        if !self.secret.is_empty() {
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.secret))?,
            );
        }

        debug!(endpoint = %self.endpoint, %route, "connecting to mesh gateway");

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;

        Ok(stream)
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Publisher = WsPublisher;
    type Subscriber = WsSubscriber;

    async fn publisher(&self, session: &str) -> Result<WsPublisher, TransportError> {
        let stream = self
            .connect(&format!("publish?name=req:{session}&session={session}"))
            .await?;

        Ok(WsPublisher {
            stream: Mutex::new(stream),
        })
    }

    async fn subscriber(&self, session: &str, tag: u32) -> Result<WsSubscriber, TransportError> {
        let stream = self
            .connect(&format!(
                "subscribe?name=res:{session}&session={session}&tag={tag}"
            ))
            .await?;

        Ok(WsSubscriber { stream })
    }
}

/// Outbound gateway connection.
pub(crate) struct WsPublisher {
    /// Shared between the command task and the republishing task.
    stream: Mutex<WsStream>,
}

#[async_trait]
impl Publisher for WsPublisher {
    async fn publish(&self, tag: u32, payload: &[u8]) -> Result<(), TransportError> {
        self.stream
            .lock()
            .await
            .send(Message::Binary(encode_outbound(tag, payload)))
            .await?;

        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.stream.lock().await.close(None).await {
            debug!(%e, "unable to close publisher connection");
        }
    }
}

/// Inbound gateway connection.
pub(crate) struct WsSubscriber {
    /// Gateway stream.
    stream: WsStream,
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Binary(data)) => return Some(decode_inbound(&data)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }

        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(%e, "unable to close subscriber connection");
        }
    }
}

/// Frame an outbound payload.
fn encode_outbound(tag: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&tag.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse an inbound gateway frame.
fn decode_inbound(data: &[u8]) -> Result<Frame, TransportError> {
    let (tag, rest) = split_array::<4>(data).ok_or(TransportError::MalformedFrame)?;
    let (source_len, rest) = split_array::<2>(rest).ok_or(TransportError::MalformedFrame)?;

    let source_len = usize::from(u16::from_be_bytes(source_len));
    if rest.len() < source_len {
        return Err(TransportError::MalformedFrame);
    }

    let (source, payload) = rest.split_at(source_len);
    let source = std::str::from_utf8(source).map_err(|_| TransportError::MalformedFrame)?;

    Ok(Frame {
        tag: u32::from_be_bytes(tag),
        source: source.to_owned(),
        payload: payload.to_vec(),
    })
}

/// Split a fixed-size prefix off a byte slice.
fn split_array<const N: usize>(data: &[u8]) -> Option<([u8; N], &[u8])> {
    if data.len() < N {
        return None;
    }

    let (head, tail) = data.split_at(N);
    Some((head.try_into().ok()?, tail))
}
