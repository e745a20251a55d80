//! The append-only double-entry journal (spec §4.2). No update or delete is
//! exposed anywhere in this module — entries are immutable once written.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::money::Money;

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub account_type: String,
    pub account_id: String,
    pub txn_id: String,
    pub description: String,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Money,
}

/// What to append. `id`/`created_at` are assigned by `append`.
pub struct NewLedgerEntry {
    pub effective_date: NaiveDate,
    pub account_type: String,
    pub account_id: String,
    pub txn_id: String,
    pub description: String,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Money,
}

/// Appends one entry as part of the caller's transaction. `amount` must
/// already be positive and quantized by the caller.
pub fn append(conn: &Connection, entry: NewLedgerEntry) -> Result<LedgerEntry, CoreError> {
    if entry.amount.is_zero() || entry.amount.minor_units() < 0 {
        return Err(CoreError::InvalidAmount(
            "ledger entry amount must be positive".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO ledger_entries
            (id, created_at, effective_date, account_type, account_id, txn_id,
             description, debit_account, credit_account, amount)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            created_at.to_rfc3339(),
            entry.effective_date.to_string(),
            entry.account_type,
            entry.account_id,
            entry.txn_id,
            entry.description,
            entry.debit_account,
            entry.credit_account,
            entry.amount.to_string(),
        ],
    )?;

    Ok(LedgerEntry {
        id,
        created_at,
        effective_date: entry.effective_date,
        account_type: entry.account_type,
        account_id: entry.account_id,
        txn_id: entry.txn_id,
        description: entry.description,
        debit_account: entry.debit_account,
        credit_account: entry.credit_account,
        amount: entry.amount,
    })
}

#[derive(Debug, Default, Clone)]
pub struct LedgerFilter {
    pub account_type: Option<String>,
    pub account_id: Option<String>,
    pub txn_id: Option<String>,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
}

/// Queries entries matching `filter`, ordered by `created_at` descending,
/// paginated by `limit`/`offset`.
pub fn query(
    conn: &Connection,
    filter: &LedgerFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<LedgerEntry>, CoreError> {
    let mut sql = String::from(
        "SELECT id, created_at, effective_date, account_type, account_id, txn_id,
                description, debit_account, credit_account, amount
         FROM ledger_entries WHERE 1 = 1",
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref v) = filter.account_type {
        sql.push_str(&format!(" AND account_type = ?{}", params.len() + 1));
        params.push(Box::new(v.clone()));
    }
    if let Some(ref v) = filter.account_id {
        sql.push_str(&format!(" AND account_id = ?{}", params.len() + 1));
        params.push(Box::new(v.clone()));
    }
    if let Some(ref v) = filter.txn_id {
        sql.push_str(&format!(" AND txn_id = ?{}", params.len() + 1));
        params.push(Box::new(v.clone()));
    }
    if let Some(from) = filter.effective_from {
        sql.push_str(&format!(" AND effective_date >= ?{}", params.len() + 1));
        params.push(Box::new(from.to_string()));
    }
    if let Some(to) = filter.effective_to {
        sql.push_str(&format!(" AND effective_date <= ?{}", params.len() + 1));
        params.push(Box::new(to.to_string()));
    }

    sql.push_str(&format!(
        " ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
        params.len() + 1,
        params.len() + 2
    ));
    params.push(Box::new(limit));
    params.push(Box::new(offset));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_entry)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Fetches a single entry by `txn_id`, used by idempotency-adjacent tests.
pub fn find_by_txn_id(conn: &Connection, txn_id: &str) -> Result<Option<LedgerEntry>, CoreError> {
    conn.query_row(
        "SELECT id, created_at, effective_date, account_type, account_id, txn_id,
                description, debit_account, credit_account, amount
         FROM ledger_entries WHERE txn_id = ?1 ORDER BY created_at DESC LIMIT 1",
        params![txn_id],
        row_to_entry,
    )
    .optional()
    .map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::store::migrate(&conn).unwrap();
        conn
    }

    fn entry(account_id: &str, txn_id: &str, amount: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            effective_date: "2026-01-01".parse().unwrap(),
            account_type: "deposit_account".into(),
            account_id: account_id.into(),
            txn_id: txn_id.into(),
            description: "test entry".into(),
            debit_account: "cash".into(),
            credit_account: "customer_deposits".into(),
            amount: amount.parse().unwrap(),
        }
    }

    #[test]
    fn rejects_non_positive_amount() {
        let conn = conn();
        let err = append(&conn, entry("acc-1", "txn-1", "0.00")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidAmount(_)));
    }

    #[test]
    fn query_filters_by_account() {
        let conn = conn();
        append(&conn, entry("acc-1", "txn-1", "10.00")).unwrap();
        append(&conn, entry("acc-2", "txn-2", "20.00")).unwrap();

        let filter = LedgerFilter {
            account_id: Some("acc-1".into()),
            ..Default::default()
        };
        let rows = query(&conn, &filter, 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].account_id, "acc-1");
    }

    #[test]
    fn find_by_txn_id_returns_most_recent() {
        let conn = conn();
        append(&conn, entry("acc-1", "txn-1", "10.00")).unwrap();
        let found = find_by_txn_id(&conn, "txn-1").unwrap().unwrap();
        assert_eq!(found.amount.to_string(), "10.00");
        assert!(find_by_txn_id(&conn, "missing").unwrap().is_none());
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let created_at: String = row.get(1)?;
    let effective_date: String = row.get(2)?;
    let amount: String = row.get(9)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        effective_date: effective_date.parse().unwrap(),
        account_type: row.get(3)?,
        account_id: row.get(4)?,
        txn_id: row.get(5)?,
        description: row.get(6)?,
        debit_account: row.get(7)?,
        credit_account: row.get(8)?,
        amount: amount.parse().unwrap(),
    })
}
