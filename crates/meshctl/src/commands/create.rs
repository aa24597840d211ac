use common::protocol::{CommandTag, CreateMsg};

use crate::{
    commands::{run, CommandError, Create},
    dispatch::Invocation,
    transport::Transport,
};

/// Create flow entrypoint.
pub(crate) async fn create<T: Transport>(
    transport: &T,
    invocation: &Invocation,
    Create { envs }: Create,
) -> Result<(), CommandError> {
    run(transport, invocation, CommandTag::Create, &CreateMsg { envs }).await
}
