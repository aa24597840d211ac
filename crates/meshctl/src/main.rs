//! # meshctl
//!
//! Command-line client deploying serverless tools onto a pub/sub mesh.
//!
//! Every command is published once to the whole mesh and answered by each
//! zone that handles it. Responses are printed as they arrive, while an
//! aggregator decides when enough zones finished, an error was reported,
//! or the deadline elapsed.
//!
//! Source code is packaged into a ZIP archive before upload. Paths matching
//! the built-in ignore patterns or the project `.gitignore` are left out.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

use clap::Parser;
use commands::{Cli, Commands};
use common::{config::Config, logging};
use dispatch::Invocation;
use figment::providers::Serialized;
use tracing::debug;
use transport::WsTransport;

/// Response aggregation state machine.
mod aggregator;

/// Source code archiving utilities.
mod archiver;

/// CLI subcommands.
mod commands;

/// Command dispatching over the mesh.
mod dispatch;

/// Ignore pattern matching.
mod ignore;

/// Mesh transport abstraction.
mod transport;

/// CLI entrypoint.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        commands::version();
        return Ok(());
    }

    let mut config = Config::new(
        cli.config_file.as_deref(),
        Serialized::defaults(&cli.overrides),
    )?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    logging::init(&config);

    let invocation = Invocation::new(&config);
    let transport = WsTransport::new(config.endpoint_url(), config.secret.clone());

    debug!(
        session = %invocation.session_id,
        endpoint = %config.endpoint_url(),
        tool = %invocation.tool,
        "invocation started"
    );

    let cancel = invocation.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Upload(args) => commands::upload(&transport, &invocation, args).await?,
        Commands::Create(args) => commands::create(&transport, &invocation, args).await?,
        Commands::Remove => commands::remove(&transport, &invocation).await?,
        Commands::Status => commands::status(&transport, &invocation).await?,
        Commands::Logs(args) => commands::logs(&transport, &invocation, args).await?,
        Commands::Deploy(args) => commands::deploy(&transport, &invocation, args).await?,
        Commands::Version => commands::version(),
    }

    Ok(())
}
