//! medcontent CLI - edit shared content collections from the terminal
//!
//! Every command works against the local replica first; the content service
//! and the broadcast relay are reached through the sync client.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{open_session, SessionOptions};
use crate::commands::hydrate::run_hydrate;
use crate::commands::list::run_list;
use crate::commands::mutate::{run_add, run_delete, run_increment, run_update};
use crate::commands::pending::{run_pending, run_retry};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medcontent=warn".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = open_session(SessionOptions {
        snapshot_path: cli.snapshot_path,
        broadcast: !cli.no_broadcast && matches!(
            cli.command,
            Commands::Add { .. }
                | Commands::Update { .. }
                | Commands::Delete { .. }
                | Commands::Increment { .. }
                | Commands::Retry
                | Commands::Watch
        ),
    })
    .await?;

    let result = match cli.command {
        Commands::Hydrate => run_hydrate(&session).await,
        Commands::List {
            collection,
            refresh,
            json,
        } => run_list(&session, &collection, refresh, json).await,
        Commands::Add { collection, fields } => run_add(&session, &collection, &fields).await,
        Commands::Update {
            collection,
            id,
            fields,
        } => run_update(&session, &collection, &id, &fields).await,
        Commands::Delete { collection, id } => run_delete(&session, &collection, &id).await,
        Commands::Increment {
            collection,
            id,
            field,
        } => run_increment(&session, &collection, &id, field.as_deref()).await,
        Commands::Pending { json } => run_pending(&session, json),
        Commands::Retry => run_retry(&session).await,
        Commands::Watch => run_watch(&session).await,
    };

    session.close()?;
    result
}
