use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "medcontent")]
#[command(about = "Edit shared content collections and keep them in sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path of the local snapshot file
    #[arg(long, global = true, value_name = "PATH")]
    pub snapshot_path: Option<PathBuf>,

    /// Do not connect to the broadcast relay
    #[arg(long, global = true)]
    pub no_broadcast: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replace local collections with the content service's copy
    Hydrate,
    /// List items of a collection from the local replica
    List {
        /// Collection name, e.g. offices
        collection: String,
        /// Hydrate before listing
        #[arg(long)]
        refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create an item
    Add {
        collection: String,
        /// Field assignment KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Change fields of an existing item
    Update {
        collection: String,
        id: String,
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Delete an item
    Delete { collection: String, id: String },
    /// Bump a counter field of an item
    Increment {
        collection: String,
        id: String,
        /// Counter field (defaults to downloadCount)
        #[arg(long)]
        field: Option<String>,
    },
    /// Show changes that have not reached the content service
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry pending changes
    Retry,
    /// Stay connected and apply changes from other clients until Ctrl-C
    Watch,
}
