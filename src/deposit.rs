//! Deposit aggregate service (spec §4.5, C5): open, deposit, withdraw,
//! accrue, month-end posting.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::money::{Money, Rate, accrual_interest};
use crate::payload::EventPayload;
use crate::store::events::{append_event, find_event_by_idempotency_key};
use crate::store::ledger::{NewLedgerEntry, append as append_ledger};

pub const AGGREGATE_TYPE: &str = "deposit_account";

#[derive(Debug, Clone, Serialize)]
pub struct DepositAccount {
    pub id: String,
    pub opened_on: NaiveDate,
    pub status: String,
    pub annual_interest_rate: Rate,
    pub day_count_basis: i64,
    pub current_balance: Money,
    pub accrued_interest: Money,
    pub last_accrual_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::store::migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn rejects_basis_below_360() {
        let conn = conn();
        let err = open_account(&conn, "2026-01-01".parse().unwrap(), Rate::ZERO, 30, None)
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidBasis(30));
    }

    #[test]
    fn deposit_is_idempotent_on_repeated_key() {
        let conn = conn();
        let account = open_account(
            &conn,
            "2026-01-01".parse().unwrap(),
            "0.100000".parse().unwrap(),
            365,
            None,
        )
        .unwrap();

        let amount: Money = "50.00".parse().unwrap();
        let date = "2026-01-01".parse().unwrap();
        post_deposit(&conn, &account.id, amount, date, Some("k1")).unwrap();
        let second = post_deposit(&conn, &account.id, amount, date, Some("k1")).unwrap();

        assert_eq!(second.current_balance, amount);
    }

    #[test]
    fn withdraw_more_than_balance_fails() {
        let conn = conn();
        let account = open_account(
            &conn,
            "2026-01-01".parse().unwrap(),
            "0.100000".parse().unwrap(),
            365,
            None,
        )
        .unwrap();
        let err = post_withdrawal(
            &conn,
            &account.id,
            "1.00".parse().unwrap(),
            "2026-01-01".parse().unwrap(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, CoreError::InsufficientFunds);
    }

    #[test]
    fn month_end_is_noop_when_nothing_accrued() {
        let conn = conn();
        let account = open_account(
            &conn,
            "2026-01-01".parse().unwrap(),
            "0.100000".parse().unwrap(),
            365,
            None,
        )
        .unwrap();
        let after = apply_month_end(&conn, &account.id, "2026-01-31".parse().unwrap()).unwrap();
        assert_eq!(after.current_balance, account.current_balance);
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<DepositAccount> {
    let opened_on: String = row.get(1)?;
    let rate: String = row.get(3)?;
    let current_balance: String = row.get(5)?;
    let accrued_interest: String = row.get(6)?;
    let last_accrual_date: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(DepositAccount {
        id: row.get(0)?,
        opened_on: opened_on.parse().unwrap(),
        status: row.get(2)?,
        annual_interest_rate: rate.parse().unwrap(),
        day_count_basis: row.get(4)?,
        current_balance: current_balance.parse().unwrap(),
        accrued_interest: accrued_interest.parse().unwrap(),
        last_accrual_date: last_accrual_date.parse().unwrap(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
    })
}

pub fn get(conn: &Connection, account_id: &str) -> Result<DepositAccount, CoreError> {
    conn.query_row(
        "SELECT id, opened_on, status, annual_interest_rate, day_count_basis,
                current_balance, accrued_interest, last_accrual_date, created_at
         FROM deposit_accounts WHERE id = ?1",
        params![account_id],
        row_to_account,
    )
    .optional()?
    .ok_or(CoreError::AccountNotFound)
}

fn validate_basis(basis: i64) -> Result<(), CoreError> {
    if basis < 360 {
        return Err(CoreError::InvalidBasis(basis));
    }
    Ok(())
}

fn validate_rate(rate: Rate) -> Result<(), CoreError> {
    if rate.micro_units() < 0 {
        return Err(CoreError::InvalidRate(
            "annual_interest_rate must be >= 0".into(),
        ));
    }
    Ok(())
}

/// `open_account(opened_on, rate, basis, key?)` → create with zero balance.
pub fn open_account(
    conn: &Connection,
    opened_on: NaiveDate,
    annual_interest_rate: Rate,
    day_count_basis: i64,
    idempotency_key: Option<&str>,
) -> Result<DepositAccount, CoreError> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = find_event_by_idempotency_key(conn, AGGREGATE_TYPE, key)? {
            if existing.event_type == "DEPOSIT_ACCOUNT_OPENED" {
                return get(conn, &existing.aggregate_id);
            }
        }
    }

    validate_rate(annual_interest_rate)?;
    validate_basis(day_count_basis)?;

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let zero = Money::ZERO;

    conn.execute(
        "INSERT INTO deposit_accounts
            (id, opened_on, status, annual_interest_rate, day_count_basis,
             current_balance, accrued_interest, last_accrual_date, created_at)
         VALUES (?1, ?2, 'OPEN', ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            opened_on.to_string(),
            annual_interest_rate.to_string(),
            day_count_basis,
            zero.to_string(),
            zero.to_string(),
            opened_on.to_string(),
            created_at.to_rfc3339(),
        ],
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        &id,
        EventPayload::DepositAccountOpened {
            opened_on,
            annual_interest_rate,
            day_count_basis,
        },
        Utc::now(),
        idempotency_key,
    )?;

    get(conn, &id)
}

/// `post_deposit(account, amount>0, effective_date, key?)`.
pub fn post_deposit(
    conn: &Connection,
    account_id: &str,
    amount: Money,
    effective_date: NaiveDate,
    idempotency_key: Option<&str>,
) -> Result<DepositAccount, CoreError> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = find_event_by_idempotency_key(conn, AGGREGATE_TYPE, key)? {
            if existing.event_type == "DEPOSIT_POSTED" && existing.aggregate_id == account_id {
                return get(conn, account_id);
            }
        }
    }

    if amount.minor_units() <= 0 {
        return Err(CoreError::InvalidAmount("amount must be > 0".into()));
    }

    let account = get(conn, account_id)?;

    let new_balance = account
        .current_balance
        .checked_add(amount)
        .ok_or_else(|| CoreError::InvalidAmount("balance overflow".into()))?;

    conn.execute(
        "UPDATE deposit_accounts SET current_balance = ?1 WHERE id = ?2",
        params![new_balance.to_string(), account_id],
    )?;

    let txn_id = format!(
        "deposit:{}",
        idempotency_key
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339())
    );
    append_ledger(
        conn,
        NewLedgerEntry {
            effective_date,
            account_type: AGGREGATE_TYPE.to_string(),
            account_id: account_id.to_string(),
            txn_id,
            description: "Customer deposit".to_string(),
            debit_account: "cash".to_string(),
            credit_account: "customer_deposits".to_string(),
            amount,
        },
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        account_id,
        EventPayload::DepositPosted {
            amount,
            effective_date,
        },
        Utc::now(),
        idempotency_key,
    )?;

    get(conn, account_id)
}

/// `post_withdrawal(account, amount>0, effective_date, key?)`.
pub fn post_withdrawal(
    conn: &Connection,
    account_id: &str,
    amount: Money,
    effective_date: NaiveDate,
    idempotency_key: Option<&str>,
) -> Result<DepositAccount, CoreError> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = find_event_by_idempotency_key(conn, AGGREGATE_TYPE, key)? {
            if existing.event_type == "WITHDRAWAL_POSTED" && existing.aggregate_id == account_id {
                return get(conn, account_id);
            }
        }
    }

    if amount.minor_units() <= 0 {
        return Err(CoreError::InvalidAmount("amount must be > 0".into()));
    }

    let account = get(conn, account_id)?;

    if account.current_balance < amount {
        return Err(CoreError::InsufficientFunds);
    }

    let new_balance = account
        .current_balance
        .checked_sub(amount)
        .ok_or_else(|| CoreError::InvalidAmount("balance underflow".into()))?;

    conn.execute(
        "UPDATE deposit_accounts SET current_balance = ?1 WHERE id = ?2",
        params![new_balance.to_string(), account_id],
    )?;

    let txn_id = format!(
        "withdrawal:{}",
        idempotency_key
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339())
    );
    append_ledger(
        conn,
        NewLedgerEntry {
            effective_date,
            account_type: AGGREGATE_TYPE.to_string(),
            account_id: account_id.to_string(),
            txn_id,
            description: "Customer withdrawal".to_string(),
            debit_account: "customer_deposits".to_string(),
            credit_account: "cash".to_string(),
            amount,
        },
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        account_id,
        EventPayload::WithdrawalPosted {
            amount,
            effective_date,
        },
        Utc::now(),
        idempotency_key,
    )?;

    get(conn, account_id)
}

/// `accrue_interest(account, as_of_date)`. No-op (no event) when
/// `as_of_date <= last_accrual_date`.
pub fn accrue_interest(
    conn: &Connection,
    account_id: &str,
    as_of_date: NaiveDate,
) -> Result<DepositAccount, CoreError> {
    let account = get(conn, account_id)?;
    let start = account.last_accrual_date;

    if as_of_date <= start {
        return Ok(account);
    }

    let days = (as_of_date - start).num_days();
    let interest = accrual_interest(
        account.current_balance,
        account.annual_interest_rate,
        days,
        account.day_count_basis,
    );
    let new_accrued = account
        .accrued_interest
        .checked_add(interest)
        .ok_or_else(|| CoreError::InvalidAmount("accrued interest overflow".into()))?;

    conn.execute(
        "UPDATE deposit_accounts SET accrued_interest = ?1, last_accrual_date = ?2 WHERE id = ?3",
        params![new_accrued.to_string(), as_of_date.to_string(), account_id],
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        account_id,
        EventPayload::InterestAccrued {
            from_date: start,
            to_date: as_of_date,
            days,
            interest,
        },
        Utc::now(),
        None,
    )?;

    get(conn, account_id)
}

/// `apply_month_end(account, effective_date)`. No-op when accrued interest
/// is zero.
pub fn apply_month_end(
    conn: &Connection,
    account_id: &str,
    effective_date: NaiveDate,
) -> Result<DepositAccount, CoreError> {
    let account = get(conn, account_id)?;

    if account.accrued_interest.is_zero() {
        return Ok(account);
    }

    let accrued = account.accrued_interest;
    let new_balance = account
        .current_balance
        .checked_add(accrued)
        .ok_or_else(|| CoreError::InvalidAmount("balance overflow".into()))?;

    conn.execute(
        "UPDATE deposit_accounts SET current_balance = ?1, accrued_interest = ?2 WHERE id = ?3",
        params![new_balance.to_string(), Money::ZERO.to_string(), account_id],
    )?;

    let txn_id = format!("interest_post:{effective_date}:{account_id}");
    append_ledger(
        conn,
        NewLedgerEntry {
            effective_date,
            account_type: AGGREGATE_TYPE.to_string(),
            account_id: account_id.to_string(),
            txn_id,
            description: "Month-end interest posting".to_string(),
            debit_account: "interest_expense".to_string(),
            credit_account: "customer_deposits".to_string(),
            amount: accrued,
        },
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        account_id,
        EventPayload::MonthEndApplied {
            effective_date,
            interest_posted: accrued,
        },
        Utc::now(),
        None,
    )?;

    get(conn, account_id)
}
