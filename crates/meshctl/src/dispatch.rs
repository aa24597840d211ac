//! Command fan-out and response fan-in.
//!
//! A command is published once to the whole mesh and answered by every zone
//! that handles it. The dispatcher connects both channels, publishes the
//! request and feeds the responses into an [`Aggregator`] until it reaches a
//! terminal state, the deadline elapses or the user cancels the invocation.

use std::{future, sync::Arc, time::Duration};

use common::{
    config::Config,
    protocol::{CommandTag, Request, Response},
};
use derive_more::{Display, Error, From};
use rand::{
    distributions::{Alphanumeric, DistString},
    thread_rng,
};
use serde::Serialize;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    aggregator::{Aggregator, SessionState, TerminationPolicy},
    transport::{Publisher, Subscriber, Transport, TransportError},
};

/// Length of the random session identifier.
const SESSION_ID_LEN: usize = 8;

/// Dispatch errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum DispatchError {
    /// Unable to open a mesh channel.
    #[display(fmt = "unable to connect to the mesh: {}", _0)]
    #[from(ignore)]
    Connect(TransportError),

    /// Mesh channel failed after connecting.
    #[display(fmt = "mesh transport error: {}", _0)]
    Transport(TransportError),

    /// Unable to encode the request envelope.
    #[display(fmt = "unable to encode request: {}", _0)]
    Json(serde_json::Error),

    /// Mesh closed the response channel before the command finished.
    #[display(fmt = "mesh closed the response channel")]
    Disconnected,
}

/// Per-invocation context shared by every command of a CLI run.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    /// Session identifier responses are routed to.
    pub session_id: String,

    /// Serverless tool the commands apply to.
    pub tool: String,

    /// Number of zones expected to answer.
    pub quorum: u32,

    /// Stop at the first reported error.
    pub fail_fast: bool,

    /// Response deadline of bounded commands.
    pub deadline: Duration,

    /// Period between `logs` request re-announcements.
    pub republish_interval: Duration,

    /// Cancelled on user interrupt.
    pub cancel: CancellationToken,
}

impl Invocation {
    /// Create a new invocation with a random session identifier.
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            session_id: Alphanumeric.sample_string(&mut thread_rng(), SESSION_ID_LEN),
            tool: config.tool.clone(),
            quorum: config.mesh,
            fail_fast: config.fail_fast,
            deadline: Duration::from_secs(config.deadline),
            republish_interval: Duration::from_secs(config.republish_interval),
            cancel: CancellationToken::new(),
        }
    }

    /// Response deadline of the given command, if it has one.
    fn deadline_of(&self, command: CommandTag) -> Option<Duration> {
        match command {
            CommandTag::Create | CommandTag::Remove | CommandTag::Status => Some(self.deadline),
            CommandTag::Upload | CommandTag::Logs => None,
        }
    }
}

/// Run a single command against the mesh.
///
/// Every decoded response carrying the command's response tag is passed to
/// `on_response` in arrival order. Both channels are released before this
/// function returns, regardless of the outcome.
pub(crate) async fn dispatch<T, M, F>(
    transport: &T,
    invocation: &Invocation,
    command: CommandTag,
    msg: &M,
    on_response: F,
) -> Result<SessionState, DispatchError>
where
    T: Transport,
    M: Serialize,
    F: FnMut(&Response),
{
    let request: Arc<[u8]> = serde_json::to_vec(&Request::new(
        &invocation.session_id,
        &invocation.tool,
        msg,
    ))?
    .into();

    let mut subscriber = transport
        .subscriber(&invocation.session_id, command.response_tag())
        .await
        .map_err(DispatchError::Connect)?;

    let publisher = match transport.publisher(&invocation.session_id).await {
        Ok(publisher) => Arc::new(publisher),
        Err(e) => {
            subscriber.close().await;
            return Err(DispatchError::Connect(e));
        }
    };

    debug!(session = %invocation.session_id, %command, "dispatching command");

    let result = exchange(
        &publisher,
        &mut subscriber,
        invocation,
        command,
        request,
        on_response,
    )
    .await;

    publisher.close().await;
    subscriber.close().await;

    result
}

/// Publish the request and consume responses until a terminal state.
async fn exchange<P, S, F>(
    publisher: &Arc<P>,
    subscriber: &mut S,
    invocation: &Invocation,
    command: CommandTag,
    request: Arc<[u8]>,
    mut on_response: F,
) -> Result<SessionState, DispatchError>
where
    P: Publisher + 'static,
    S: Subscriber,
    F: FnMut(&Response),
{
    let mut aggregator = Aggregator::new(
        TerminationPolicy::for_command(command, invocation.quorum),
        invocation.fail_fast,
    );

    publisher.publish(command.request_tag(), &request).await?;
    aggregator.start();

    let republisher = (command == CommandTag::Logs).then(|| {
        let token = invocation.cancel.child_token();

        let handle = tokio::spawn(republish(
            publisher.clone(),
            command.request_tag(),
            request.clone(),
            invocation.republish_interval,
            token.clone(),
        ));

        (handle, token.drop_guard())
    });

    let expiry = async {
        match invocation.deadline_of(command) {
            Some(deadline) => time::sleep(deadline).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(expiry);

    let response_tag = command.response_tag();

    loop {
        tokio::select! {
            biased;

            _ = invocation.cancel.cancelled() => {
                debug!(%command, "command interrupted");
                aggregator.interrupt();
                break;
            }
            _ = &mut expiry => {
                debug!(%command, "command deadline elapsed");
                aggregator.expire();
                break;
            }
            frame = subscriber.next_frame() => {
                let frame = match frame {
                    Some(frame) => frame?,
                    None => return Err(DispatchError::Disconnected),
                };

                if frame.tag != response_tag {
                    trace!(tag = frame.tag, source = %frame.source, "skipping unrelated frame");
                    continue;
                }

                let response: Response = match serde_json::from_slice(&frame.payload) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(%e, source = %frame.source, "skipping undecodable response");
                        continue;
                    }
                };

                on_response(&response);

                if let Some(state) = aggregator.observe(&response) {
                    debug!(%command, ?state, "command completed");
                    break;
                }
            }
        }
    }

    if let Some((handle, guard)) = republisher {
        drop(guard);

        if let Err(e) = handle.await {
            warn!(%e, "republishing task failed");
        }
    }

    Ok(aggregator.into_session())
}

/// Re-announce a request every `period` until cancelled.
async fn republish<P: Publisher>(
    publisher: Arc<P>,
    tag: u32,
    request: Arc<[u8]>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                trace!(tag, "republishing request");

                if let Err(e) = publisher.publish(tag, &request).await {
                    warn!(%e, "unable to republish request");
                    break;
                }
            }
        }
    }
}
