use common::protocol::{CommandTag, LogsMsg};

use crate::{
    commands::{run, CommandError, Logs},
    dispatch::Invocation,
    transport::Transport,
};

/// Logs flow entrypoint.
///
/// Follows the logs until the invocation is cancelled.
pub(crate) async fn logs<T: Transport>(
    transport: &T,
    invocation: &Invocation,
    Logs { tail }: Logs,
) -> Result<(), CommandError> {
    run(transport, invocation, CommandTag::Logs, &LogsMsg { tail }).await
}
