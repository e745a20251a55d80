use axum::Json;
use axum::extract::{Path, State};

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{AccrueRequest, OpenLoanRequest, RepayLoanRequest};
use crate::error::CoreError;
use crate::loan::{self, LoanAccount};

pub async fn open(
    State(state): State<AppState>,
    Json(req): Json<OpenLoanRequest>,
) -> Result<Json<LoanAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = loan::open_loan(
        &tx,
        req.opened_on,
        req.principal,
        req.annual_interest_rate,
        req.day_count_basis,
        req.idempotency_key.as_deref(),
    )?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}

pub async fn get(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<LoanAccount>, ApiError> {
    let conn = state.db.lock().await;
    Ok(Json(loan::get(&conn, &account_id)?))
}

pub async fn accrue(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<AccrueRequest>,
) -> Result<Json<LoanAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = loan::accrue_interest(&tx, &account_id, req.as_of_date)?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}

pub async fn repay(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<RepayLoanRequest>,
) -> Result<Json<LoanAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = loan::post_repayment(
        &tx,
        &account_id,
        req.amount,
        req.effective_date,
        req.idempotency_key.as_deref(),
    )?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}
