use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use common::protocol::{CommandTag, Response};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Frame, Publisher, Subscriber, Transport, TransportError};

/// Shared state of the in-memory mesh.
#[derive(Default)]
struct MeshState {
    /// Frames delivered on the first publish of a request tag.
    replies: HashMap<u32, Vec<Frame>>,

    /// Every published `(tag, payload)` pair, in order.
    published: Vec<(u32, Vec<u8>)>,

    /// Live subscriptions. Every frame reaches every subscriber.
    subscribers: Vec<UnboundedSender<Frame>>,

    /// Refuse every connection.
    refuse: bool,

    /// Number of released channels.
    closed: usize,
}

/// Scripted mesh: replies to requests with canned frames.
///
/// Frames are broadcast without tag routing, so consumers see unrelated
/// traffic the way a shared mesh channel delivers it.
/// Subscriptions stay open until the transport is dropped, so commands
/// without enough replies wait for their deadline or cancellation.
#[derive(Clone, Default)]
pub(crate) struct MemoryTransport {
    /// Shared mesh state.
    state: Arc<Mutex<MeshState>>,
}

impl MemoryTransport {
    /// Mesh without scripted replies.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mesh refusing all connections.
    pub(crate) fn refusing() -> Self {
        let transport = Self::new();
        transport.state.lock().unwrap().refuse = true;
        transport
    }

    /// Answer the first `command` request with the given responses.
    pub(crate) fn reply(self, command: CommandTag, responses: Vec<Response>) -> Self {
        let frames = responses
            .into_iter()
            .map(|response| Frame {
                tag: command.response_tag(),
                source: response.mesh_zone.clone(),
                payload: serde_json::to_vec(&response).unwrap(),
            })
            .collect();

        self.reply_frames(command, frames)
    }

    /// Answer the first `command` request with raw frames.
    pub(crate) fn reply_frames(self, command: CommandTag, frames: Vec<Frame>) -> Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.request_tag(), frames);
        self
    }

    /// Tags of all published frames, in order.
    pub(crate) fn published_tags(&self) -> Vec<u32> {
        self.published().into_iter().map(|(tag, _)| tag).collect()
    }

    /// All published frames, in order.
    pub(crate) fn published(&self) -> Vec<(u32, Vec<u8>)> {
        self.state.lock().unwrap().published.clone()
    }

    /// Number of channels released so far.
    pub(crate) fn closed_channels(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Publisher = MemoryPublisher;
    type Subscriber = MemorySubscriber;

    async fn publisher(&self, _session: &str) -> Result<MemoryPublisher, TransportError> {
        if self.state.lock().unwrap().refuse {
            return Err(TransportError::Unavailable);
        }

        Ok(MemoryPublisher {
            state: self.state.clone(),
        })
    }

    async fn subscriber(
        &self,
        _session: &str,
        _tag: u32,
    ) -> Result<MemorySubscriber, TransportError> {
        let mut state = self.state.lock().unwrap();

        if state.refuse {
            return Err(TransportError::Unavailable);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.push(sender);

        Ok(MemorySubscriber {
            receiver,
            state: self.state.clone(),
        })
    }
}

/// Outbound in-memory channel.
pub(crate) struct MemoryPublisher {
    /// Shared mesh state.
    state: Arc<Mutex<MeshState>>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, tag: u32, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();

        state.published.push((tag, payload.to_vec()));

        if let Some(frames) = state.replies.remove(&tag) {
            for frame in frames {
                state
                    .subscribers
                    .retain(|sender| sender.send(frame.clone()).is_ok());
            }
        }

        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed += 1;
    }
}

/// Inbound in-memory channel.
pub(crate) struct MemorySubscriber {
    /// Frames routed to this subscription.
    receiver: UnboundedReceiver<Frame>,

    /// Shared mesh state.
    state: Arc<Mutex<MeshState>>,
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.receiver.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed += 1;
    }
}
