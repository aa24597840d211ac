use common::protocol::{CommandTag, StatusMsg};

use crate::{
    commands::{run, CommandError},
    dispatch::Invocation,
    transport::Transport,
};

/// Status flow entrypoint.
pub(crate) async fn status<T: Transport>(
    transport: &T,
    invocation: &Invocation,
) -> Result<(), CommandError> {
    run(transport, invocation, CommandTag::Status, &StatusMsg {}).await
}
