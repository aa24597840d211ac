/// `upload` subcommand.
mod upload;

/// `create` subcommand.
mod create;

/// `remove` subcommand.
mod remove;

/// `status` subcommand.
mod status;

/// `logs` subcommand.
mod logs;

/// `deploy` subcommand.
mod deploy;

/// `version` subcommand.
mod version;

pub(crate) use create::create;
pub(crate) use deploy::deploy;
pub(crate) use logs::logs;
pub(crate) use remove::remove;
pub(crate) use status::status;
pub(crate) use upload::upload;
pub(crate) use version::version;

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use common::protocol::{CommandTag, Response};
use derive_more::{Display, Error, From};
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::level_filters::LevelFilter;

use crate::{
    aggregator::{SessionState, State},
    archiver::ArchiverError,
    dispatch::{dispatch, DispatchError, Invocation},
    transport::Transport,
};

/// CLI configuration.
#[derive(Parser)]
#[command(about)]
pub(crate) struct Cli {
    /// Configuration file path. Defaults to `meshctl.toml` when present.
    #[arg(short, long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Log level, overrides the configured one.
    #[arg(long, global = true)]
    pub log_level: Option<LevelFilter>,

    /// Values overriding the configuration file and environment.
    #[command(flatten)]
    pub overrides: Overrides,

    /// Selected subcommand.
    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration values that can be given on the command line.
#[derive(Args, Serialize)]
pub(crate) struct Overrides {
    /// Mesh gateway address.
    #[arg(short, long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,

    /// Shared secret presented to the mesh gateway.
    #[arg(short, long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,

    /// Serverless tool name.
    #[arg(short, long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<String>,

    /// Number of mesh zones expected to answer.
    #[arg(short, long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    mesh: Option<u32>,
}

/// Supported subcommands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Upload and compile the source code.
    Upload(Upload),

    /// Create a deployment and start it.
    Create(Create),

    /// Remove the current deployment.
    Remove,

    /// Show the deployment status in every zone.
    Status,

    /// Follow deployment logs until interrupted.
    Logs(Logs),

    /// Upload the source code, then replace the running deployment.
    Deploy(Deploy),

    /// Print the client version.
    Version,
}

/// `upload` subcommand configuration.
#[derive(Args)]
pub struct Upload {
    /// Source directory, ZIP archive or single Go file.
    #[arg(default_value = ".")]
    src: PathBuf,
}

/// `create` subcommand configuration.
#[derive(Args)]
pub struct Create {
    /// Environment variable passed to the deployment, as `KEY=VALUE`.
    #[arg(long = "env", value_parser = parse_env)]
    envs: Vec<String>,
}

/// `logs` subcommand configuration.
#[derive(Args)]
pub struct Logs {
    /// Number of trailing lines to replay.
    #[arg(long, default_value_t = 20)]
    tail: u32,
}

/// `deploy` subcommand configuration.
#[derive(Args)]
pub struct Deploy {
    /// Source directory, ZIP archive or single Go file.
    #[arg(default_value = ".")]
    src: PathBuf,

    /// Environment variable passed to the deployment, as `KEY=VALUE`.
    #[arg(long = "env", value_parser = parse_env)]
    envs: Vec<String>,
}

/// Validate a `KEY=VALUE` pair.
fn parse_env(value: &str) -> Result<String, String> {
    match value.split_once('=') {
        Some((key, _)) if !key.trim().is_empty() => Ok(value.to_owned()),
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}

/// Command errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum CommandError {
    /// Mesh communication failed.
    Dispatch(DispatchError),

    /// Unable to package the source code.
    #[display(fmt = "unable to package source code: {}", _0)]
    Archiver(ArchiverError),

    /// A zone reported an error.
    #[display(fmt = "{}", _0)]
    #[from(ignore)]
    Remote(#[error(not(source))] String),

    /// Not enough zones answered in time.
    #[display(fmt = "{} timed out after {} response(s)", command, completed)]
    #[from(ignore)]
    TimedOut {
        /// Command that timed out.
        command: CommandTag,

        /// Number of zones that finished.
        completed: u32,
    },

    /// Cancelled by the user.
    #[display(fmt = "interrupted")]
    Interrupted,
}

/// Dispatch a command, printing every response as it arrives.
pub(crate) async fn run<T, M>(
    transport: &T,
    invocation: &Invocation,
    command: CommandTag,
    msg: &M,
) -> Result<(), CommandError>
where
    T: Transport,
    M: Serialize,
{
    let pg = ProgressBar::new_spinner();

    pg.enable_steady_tick(Duration::from_millis(150));
    pg.set_message(format!("Waiting for {command} responses..."));

    let session = dispatch(transport, invocation, command, msg, |response| {
        pg.suspend(|| println!("{}", render(response)));
    })
    .await;

    pg.finish_and_clear();

    outcome(command, &session?)
}

/// Single-line rendering of a zone response.
fn render(response: &Response) -> String {
    if response.error.is_empty() {
        format!("[{}] OK: {}", response.origin(), response.msg)
    } else {
        format!("[{}] ERROR: {}", response.origin(), response.error)
    }
}

/// Map a final session state to the command result.
fn outcome(command: CommandTag, session: &SessionState) -> Result<(), CommandError> {
    match session.state() {
        State::Succeeded => Ok(()),
        State::Failed(error) => Err(CommandError::Remote(error.clone())),
        State::TimedOut => Err(CommandError::TimedOut {
            command,
            completed: session.completed(),
        }),

        // Interrupting `logs` is the regular way to stop following.
        State::Interrupted if command == CommandTag::Logs => match session.last_error() {
            Some(error) => Err(CommandError::Remote(error.to_owned())),
            None => Ok(()),
        },

        // Dispatch only returns terminal states.
        State::Interrupted | State::Pending | State::Running => Err(CommandError::Interrupted),
    }
}
