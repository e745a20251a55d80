//! Loan aggregate service (spec §4.6, C6): open/disburse, accrue, repayment
//! with interest-first allocation.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::money::{Money, Rate, accrual_interest};
use crate::payload::EventPayload;
use crate::store::events::{append_event, find_event_by_idempotency_key};
use crate::store::ledger::{NewLedgerEntry, append as append_ledger};

pub const AGGREGATE_TYPE: &str = "loan_account";

#[derive(Debug, Clone, Serialize)]
pub struct LoanAccount {
    pub id: String,
    pub opened_on: NaiveDate,
    pub status: String,
    pub principal: Money,
    pub annual_interest_rate: Rate,
    pub day_count_basis: i64,
    pub outstanding_principal: Money,
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
    fn rejects_non_positive_principal() {
        let conn = conn();
        let err = open_loan(
            &conn,
            "2026-01-01".parse().unwrap(),
            Money::ZERO,
            Rate::ZERO,
            365,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAmount(_)));
    }

    #[test]
    fn repayment_allocates_interest_before_principal() {
        let conn = conn();
        let account = open_loan(
            &conn,
            "2026-01-01".parse().unwrap(),
            "1000.00".parse().unwrap(),
            "0.120000".parse().unwrap(),
            365,
            None,
        )
        .unwrap();
        accrue_interest(&conn, &account.id, "2026-01-31".parse().unwrap()).unwrap();

        let after = post_repayment(
            &conn,
            &account.id,
            "50.00".parse().unwrap(),
            "2026-01-31".parse().unwrap(),
            None,
        )
        .unwrap();

        // interest due (9.86) is paid first, remainder goes to principal.
        assert_eq!(after.accrued_interest, Money::ZERO);
        assert_eq!(after.outstanding_principal, "959.86".parse().unwrap());
    }

    #[test]
    fn overpayment_beyond_total_due_is_dropped() {
        let conn = conn();
        let account = open_loan(
            &conn,
            "2026-01-01".parse().unwrap(),
            "100.00".parse().unwrap(),
            Rate::ZERO,
            365,
            None,
        )
        .unwrap();

        let after = post_repayment(
            &conn,
            &account.id,
            "150.00".parse().unwrap(),
            "2026-01-01".parse().unwrap(),
            None,
        )
        .unwrap();

        assert_eq!(after.outstanding_principal, Money::ZERO);
        assert_eq!(after.accrued_interest, Money::ZERO);
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoanAccount> {
    let opened_on: String = row.get(1)?;
    let principal: String = row.get(3)?;
    let rate: String = row.get(4)?;
    let outstanding: String = row.get(6)?;
    let accrued: String = row.get(7)?;
    let last_accrual_date: String = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(LoanAccount {
        id: row.get(0)?,
        opened_on: opened_on.parse().unwrap(),
        status: row.get(2)?,
        principal: principal.parse().unwrap(),
        annual_interest_rate: rate.parse().unwrap(),
        day_count_basis: row.get(5)?,
        outstanding_principal: outstanding.parse().unwrap(),
        accrued_interest: accrued.parse().unwrap(),
        last_accrual_date: last_accrual_date.parse().unwrap(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
    })
}

pub fn get(conn: &Connection, account_id: &str) -> Result<LoanAccount, CoreError> {
    conn.query_row(
        "SELECT id, opened_on, status, principal, annual_interest_rate, day_count_basis,
                outstanding_principal, accrued_interest, last_accrual_date, created_at
         FROM loan_accounts WHERE id = ?1",
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

/// `open_loan(opened_on, principal>0, rate, basis, key?)` → disburse
/// ledger row `debit=loan_receivable, credit=cash`.
pub fn open_loan(
    conn: &Connection,
    opened_on: NaiveDate,
    principal: Money,
    annual_interest_rate: Rate,
    day_count_basis: i64,
    idempotency_key: Option<&str>,
) -> Result<LoanAccount, CoreError> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = find_event_by_idempotency_key(conn, AGGREGATE_TYPE, key)? {
            if existing.event_type == "LOAN_OPENED" {
                return get(conn, &existing.aggregate_id);
            }
        }
    }

    if principal.minor_units() <= 0 {
        return Err(CoreError::InvalidAmount("principal must be > 0".into()));
    }
    validate_rate(annual_interest_rate)?;
    validate_basis(day_count_basis)?;

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO loan_accounts
            (id, opened_on, status, principal, annual_interest_rate, day_count_basis,
             outstanding_principal, accrued_interest, last_accrual_date, created_at)
         VALUES (?1, ?2, 'OPEN', ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            opened_on.to_string(),
            principal.to_string(),
            annual_interest_rate.to_string(),
            day_count_basis,
            principal.to_string(),
            Money::ZERO.to_string(),
            opened_on.to_string(),
            created_at.to_rfc3339(),
        ],
    )?;

    let txn_id = format!(
        "loan_disburse:{}",
        idempotency_key
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339())
    );
    append_ledger(
        conn,
        NewLedgerEntry {
            effective_date: opened_on,
            account_type: AGGREGATE_TYPE.to_string(),
            account_id: id.clone(),
            txn_id,
            description: "Loan disbursement".to_string(),
            debit_account: "loan_receivable".to_string(),
            credit_account: "cash".to_string(),
            amount: principal,
        },
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        &id,
        EventPayload::LoanOpened {
            opened_on,
            principal,
            annual_interest_rate,
            day_count_basis,
        },
        Utc::now(),
        idempotency_key,
    )?;

    get(conn, &id)
}

/// `accrue_interest(account, as_of_date)` — same shape as deposit accrual
/// but against `outstanding_principal`.
pub fn accrue_interest(
    conn: &Connection,
    account_id: &str,
    as_of_date: NaiveDate,
) -> Result<LoanAccount, CoreError> {
    let account = get(conn, account_id)?;
    let start = account.last_accrual_date;

    if as_of_date <= start {
        return Ok(account);
    }

    let days = (as_of_date - start).num_days();
    let interest = accrual_interest(
        account.outstanding_principal,
        account.annual_interest_rate,
        days,
        account.day_count_basis,
    );
    let new_accrued = account
        .accrued_interest
        .checked_add(interest)
        .ok_or_else(|| CoreError::InvalidAmount("accrued interest overflow".into()))?;

    conn.execute(
        "UPDATE loan_accounts SET accrued_interest = ?1, last_accrual_date = ?2 WHERE id = ?3",
        params![new_accrued.to_string(), as_of_date.to_string(), account_id],
    )?;

    append_event(
        conn,
        AGGREGATE_TYPE,
        account_id,
        EventPayload::LoanInterestAccrued {
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

/// `post_repayment(account, amount>0, effective_date, key?)` with
/// interest-first allocation. Any amount beyond `accrued_interest +
/// outstanding_principal` is dropped — see DESIGN.md's decision on the
/// overpayment open question.
pub fn post_repayment(
    conn: &Connection,
    account_id: &str,
    amount: Money,
    effective_date: NaiveDate,
    idempotency_key: Option<&str>,
) -> Result<LoanAccount, CoreError> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = find_event_by_idempotency_key(conn, AGGREGATE_TYPE, key)? {
            if existing.event_type == "LOAN_REPAYMENT_POSTED" && existing.aggregate_id == account_id
            {
                return get(conn, account_id);
            }
        }
    }

    if amount.minor_units() <= 0 {
        return Err(CoreError::InvalidAmount("amount must be > 0".into()));
    }

    let account = get(conn, account_id)?;

    let interest_due = account.accrued_interest;
    let principal_due = account.outstanding_principal;

    let pay_interest = amount.min(interest_due);
    let remaining = amount
        .checked_sub(pay_interest)
        .ok_or_else(|| CoreError::InvalidAmount("repayment underflow".into()))?;
    let pay_principal = remaining.min(principal_due);

    let new_accrued = interest_due
        .checked_sub(pay_interest)
        .ok_or_else(|| CoreError::InvalidAmount("accrued interest underflow".into()))?;
    let new_outstanding = principal_due
        .checked_sub(pay_principal)
        .ok_or_else(|| CoreError::InvalidAmount("outstanding principal underflow".into()))?;

    conn.execute(
        "UPDATE loan_accounts SET accrued_interest = ?1, outstanding_principal = ?2 WHERE id = ?3",
        params![
            new_accrued.to_string(),
            new_outstanding.to_string(),
            account_id
        ],
    )?;

    let txn_base = idempotency_key
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    if !pay_interest.is_zero() {
        append_ledger(
            conn,
            NewLedgerEntry {
                effective_date,
                account_type: AGGREGATE_TYPE.to_string(),
                account_id: account_id.to_string(),
                txn_id: format!("loan_payment_interest:{txn_base}"),
                description: "Loan payment (interest)".to_string(),
                debit_account: "cash".to_string(),
                credit_account: "interest_income".to_string(),
                amount: pay_interest,
            },
        )?;
    }

    if !pay_principal.is_zero() {
        append_ledger(
            conn,
            NewLedgerEntry {
                effective_date,
                account_type: AGGREGATE_TYPE.to_string(),
                account_id: account_id.to_string(),
                txn_id: format!("loan_payment_principal:{txn_base}"),
                description: "Loan payment (principal)".to_string(),
                debit_account: "cash".to_string(),
                credit_account: "loan_receivable".to_string(),
                amount: pay_principal,
            },
        )?;
    }

    append_event(
        conn,
        AGGREGATE_TYPE,
        account_id,
        EventPayload::LoanRepaymentPosted {
            amount,
            interest_paid: pay_interest,
            principal_paid: pay_principal,
            effective_date,
        },
        Utc::now(),
        idempotency_key,
    )?;

    get(conn, account_id)
}
