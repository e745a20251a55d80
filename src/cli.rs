use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fixed-point ledger engine — deposit and loan accounting with a
/// transactional outbox for downstream delivery.
#[derive(Parser)]
#[command(name = "fintech-ledger", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "8080")]
        port: u16,

        /// Directory holding the sqlite database file.
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Run one outbox dispatch cycle against the database and exit.
    Dispatch {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        #[arg(long, default_value = "100")]
        max_messages: i64,
    },

    /// Reset matching outbox rows back to PENDING for redelivery.
    Replay {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        #[arg(long)]
        aggregate_type: Option<String>,

        #[arg(long)]
        aggregate_id: Option<String>,

        #[arg(long)]
        destination: Option<String>,
    },
}
