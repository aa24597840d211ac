use common::protocol::{CommandTag, CreateMsg, RemoveMsg};
use derive_more::{Display, Error};
use tracing::info;

use crate::{
    commands::{run, upload::upload_source, CommandError, Deploy},
    dispatch::Invocation,
    transport::Transport,
};

/// `deploy` subcommand errors.
#[derive(Debug, Display, Error)]
#[display(fmt = "deployment aborted at the {} step: {}", step, source)]
pub(crate) struct DeployError {
    /// Step that did not succeed.
    step: CommandTag,

    /// Failure of that step.
    source: CommandError,
}

/// Attach the failed step to a command error.
fn at(step: CommandTag) -> impl FnOnce(CommandError) -> DeployError {
    move |source| DeployError { step, source }
}

/// Deploy flow entrypoint.
///
/// Uploads the source code, removes the running deployment and creates a new
/// one. The first step that does not succeed stops the chain, completed steps
/// are not rolled back.
pub(crate) async fn deploy<T: Transport>(
    transport: &T,
    invocation: &Invocation,
    Deploy { src, envs }: Deploy,
) -> Result<(), DeployError> {
    info!(session = %invocation.session_id, src = %src.display(), "starting deployment");

    upload_source(transport, invocation, &src)
        .await
        .map_err(at(CommandTag::Upload))?;

    run(transport, invocation, CommandTag::Remove, &RemoveMsg {})
        .await
        .map_err(at(CommandTag::Remove))?;

    run(transport, invocation, CommandTag::Create, &CreateMsg { envs })
        .await
        .map_err(at(CommandTag::Create))?;

    println!("Successfully deployed.");

    Ok(())
}
