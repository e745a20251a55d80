use std::path::Path;

use clap::Parser;
use fintech_ledger::{api, outbox, store};

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Serve {
            host,
            port,
            data_dir,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(api::serve(&host, port, &data_dir))
        }
        cli::Command::Dispatch {
            data_dir,
            max_messages,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_dispatch(&data_dir, max_messages))
        }
        cli::Command::Replay {
            data_dir,
            aggregate_type,
            aggregate_id,
            destination,
        } => run_replay(&data_dir, aggregate_type, aggregate_id, destination),
    }
}

async fn run_dispatch(data_dir: &Path, max_messages: i64) -> anyhow::Result<()> {
    let db_path = store::resolve_db_path(data_dir);
    let db = store::open(&db_path)?;
    let conn = db.lock().await;
    let client = reqwest::Client::new();

    let report = outbox::dispatch_cycle(&conn, &client, max_messages).await?;
    println!(
        "[outbox] dispatched {} message(s): {}",
        report.processed,
        serde_json::to_string(&report)?
    );
    Ok(())
}

fn run_replay(
    data_dir: &Path,
    aggregate_type: Option<String>,
    aggregate_id: Option<String>,
    destination: Option<String>,
) -> anyhow::Result<()> {
    let db_path = store::resolve_db_path(data_dir);
    let db = store::open(&db_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    let conn = rt.block_on(db.lock());

    let filter = outbox::ReplayFilter {
        aggregate_type,
        aggregate_id,
        destination,
    };
    let tx = conn.unchecked_transaction()?;
    let requeued = outbox::replay(&tx, &filter)?;
    tx.commit()?;

    println!("[replay] requeued {requeued} outbox message(s)");
    Ok(())
}
