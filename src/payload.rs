//! Typed domain event payloads.
//!
//! The source this core was distilled from treats payloads as a schemaless
//! JSON tree; §9's Design Notes invite a tagged union per `event_type` for a
//! systems-language port, so each `DomainEvent` carries one of these instead
//! of a loose `serde_json::Value` tree. The serialized JSON (via `#[serde(tag
//! = "type")]`) is still what lands in the `payload` column, keeping the
//! on-disk shape compatible with the untyped original.

use serde::{Deserialize, Serialize};

use crate::money::{Money, Rate};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    DepositAccountOpened {
        opened_on: chrono::NaiveDate,
        annual_interest_rate: Rate,
        day_count_basis: i64,
    },
    DepositPosted {
        amount: Money,
        effective_date: chrono::NaiveDate,
    },
    WithdrawalPosted {
        amount: Money,
        effective_date: chrono::NaiveDate,
    },
    InterestAccrued {
        from_date: chrono::NaiveDate,
        to_date: chrono::NaiveDate,
        days: i64,
        interest: Money,
    },
    MonthEndApplied {
        effective_date: chrono::NaiveDate,
        interest_posted: Money,
    },
    LoanOpened {
        opened_on: chrono::NaiveDate,
        principal: Money,
        annual_interest_rate: Rate,
        day_count_basis: i64,
    },
    LoanInterestAccrued {
        from_date: chrono::NaiveDate,
        to_date: chrono::NaiveDate,
        days: i64,
        interest: Money,
    },
    LoanRepaymentPosted {
        amount: Money,
        interest_paid: Money,
        principal_paid: Money,
        effective_date: chrono::NaiveDate,
    },
}

impl EventPayload {
    /// The `event_type` string stored alongside this payload and used for
    /// idempotency lookups.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::DepositAccountOpened { .. } => "DEPOSIT_ACCOUNT_OPENED",
            EventPayload::DepositPosted { .. } => "DEPOSIT_POSTED",
            EventPayload::WithdrawalPosted { .. } => "WITHDRAWAL_POSTED",
            EventPayload::InterestAccrued { .. } => "INTEREST_ACCRUED",
            EventPayload::MonthEndApplied { .. } => "MONTH_END_APPLIED",
            EventPayload::LoanOpened { .. } => "LOAN_OPENED",
            EventPayload::LoanInterestAccrued { .. } => "LOAN_INTEREST_ACCRUED",
            EventPayload::LoanRepaymentPosted { .. } => "LOAN_REPAYMENT_POSTED",
        }
    }
}
