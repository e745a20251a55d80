//! Request/response DTOs shared across handlers. Monetary and rate fields
//! deserialize straight from decimal strings via `Money`/`Rate`'s own
//! `Deserialize` impls.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::money::{Money, Rate};

#[derive(Debug, Deserialize)]
pub struct OpenDepositRequest {
    pub opened_on: NaiveDate,
    pub annual_interest_rate: Rate,
    pub day_count_basis: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: Money,
    pub effective_date: NaiveDate,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Money,
    pub effective_date: NaiveDate,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccrueRequest {
    pub as_of_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct MonthEndRequest {
    pub effective_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct OpenLoanRequest {
    pub opened_on: NaiveDate,
    pub principal: Money,
    pub annual_interest_rate: Rate,
    pub day_count_basis: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RepayLoanRequest {
    pub amount: Money,
    pub effective_date: NaiveDate,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DispatchOutboxRequest {
    pub max_messages: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReplayOutboxRequest {
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookSubscriptionRequest {
    pub target_url: String,
}
