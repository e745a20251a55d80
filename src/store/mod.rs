//! Persistence: schema migration and connection handle.
//!
//! Mirrors the teacher's `api::db` module — a single `rusqlite::Connection`
//! behind a `tokio::sync::Mutex`, migrated with one `execute_batch` on open.
//! Every command in this crate opens one transaction against this connection
//! and commits once, so the aggregate mutation, ledger rows, domain event,
//! and outbox rows are all-or-nothing (spec §4.3).

pub mod events;
pub mod ledger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;

pub type Db = Arc<Mutex<Connection>>;

/// Resolves the sqlite file path for a command invocation: `DATABASE_URL`
/// (spec §6's one recognized setting, default `sqlite:///./fintech.db`)
/// takes precedence when set; otherwise falls back to `<data_dir>/ledger.db`.
pub fn resolve_db_path(data_dir: &Path) -> PathBuf {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(&url);
            PathBuf::from(path)
        }
        Err(_) => data_dir.join("ledger.db"),
    }
}

/// Opens (creating if necessary) the sqlite store at `path` and runs the
/// schema migration.
pub fn open(path: &Path) -> Result<Db> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating database directory")?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("opening sqlite at {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// Opens an in-memory store, used by tests.
pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory().context("opening in-memory sqlite")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS deposit_accounts (
            id                    TEXT PRIMARY KEY,
            opened_on             TEXT NOT NULL,
            status                TEXT NOT NULL DEFAULT 'OPEN',
            annual_interest_rate  TEXT NOT NULL,
            day_count_basis       INTEGER NOT NULL,
            current_balance       TEXT NOT NULL,
            accrued_interest      TEXT NOT NULL,
            last_accrual_date     TEXT NOT NULL,
            created_at            TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS loan_accounts (
            id                     TEXT PRIMARY KEY,
            opened_on              TEXT NOT NULL,
            status                 TEXT NOT NULL DEFAULT 'OPEN',
            principal              TEXT NOT NULL,
            annual_interest_rate   TEXT NOT NULL,
            day_count_basis        INTEGER NOT NULL,
            outstanding_principal  TEXT NOT NULL,
            accrued_interest       TEXT NOT NULL,
            last_accrual_date      TEXT NOT NULL,
            created_at             TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ledger_entries (
            id             TEXT PRIMARY KEY,
            created_at     TEXT NOT NULL DEFAULT (datetime('now')),
            effective_date TEXT NOT NULL,
            account_type   TEXT NOT NULL,
            account_id     TEXT NOT NULL,
            txn_id         TEXT NOT NULL,
            description    TEXT NOT NULL,
            debit_account  TEXT NOT NULL,
            credit_account TEXT NOT NULL,
            amount         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS domain_events (
            id               TEXT PRIMARY KEY,
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            aggregate_type   TEXT NOT NULL,
            aggregate_id     TEXT NOT NULL,
            event_type       TEXT NOT NULL,
            event_time       TEXT NOT NULL,
            payload          TEXT NOT NULL,
            idempotency_key  TEXT
        );

        CREATE TABLE IF NOT EXISTS outbox_messages (
            id               TEXT PRIMARY KEY,
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            event_id         TEXT NOT NULL REFERENCES domain_events(id),
            destination      TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'PENDING',
            attempts         INTEGER NOT NULL DEFAULT 0,
            max_attempts     INTEGER NOT NULL DEFAULT 10,
            next_attempt_at  TEXT,
            last_error       TEXT
        );

        CREATE TABLE IF NOT EXISTS webhook_subscriptions (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            target_url  TEXT NOT NULL,
            enabled     INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS queue_messages (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            topic       TEXT NOT NULL DEFAULT 'domain_events',
            payload     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_domain_events_idem
            ON domain_events (aggregate_type, idempotency_key);
        CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_messages (status, next_attempt_at);
        CREATE INDEX IF NOT EXISTS idx_ledger_account
            ON ledger_entries (account_type, account_id);
        ",
    )?;
    Ok(())
}
