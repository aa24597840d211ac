use common::protocol::{CommandTag, RemoveMsg};

use crate::{
    commands::{run, CommandError},
    dispatch::Invocation,
    transport::Transport,
};

/// Remove flow entrypoint.
pub(crate) async fn remove<T: Transport>(
    transport: &T,
    invocation: &Invocation,
) -> Result<(), CommandError> {
    run(transport, invocation, CommandTag::Remove, &RemoveMsg {}).await
}
