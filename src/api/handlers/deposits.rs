use axum::Json;
use axum::extract::{Path, State};

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{
    AccrueRequest, DepositRequest, MonthEndRequest, OpenDepositRequest, WithdrawRequest,
};
use crate::deposit::{self, DepositAccount};
use crate::error::CoreError;

pub async fn open(
    State(state): State<AppState>,
    Json(req): Json<OpenDepositRequest>,
) -> Result<Json<DepositAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = deposit::open_account(
        &tx,
        req.opened_on,
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
) -> Result<Json<DepositAccount>, ApiError> {
    let conn = state.db.lock().await;
    Ok(Json(deposit::get(&conn, &account_id)?))
}

pub async fn deposit_funds(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<DepositAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = deposit::post_deposit(
        &tx,
        &account_id,
        req.amount,
        req.effective_date,
        req.idempotency_key.as_deref(),
    )?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<DepositAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = deposit::post_withdrawal(
        &tx,
        &account_id,
        req.amount,
        req.effective_date,
        req.idempotency_key.as_deref(),
    )?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}

pub async fn accrue(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<AccrueRequest>,
) -> Result<Json<DepositAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = deposit::accrue_interest(&tx, &account_id, req.as_of_date)?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}

pub async fn month_end(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<MonthEndRequest>,
) -> Result<Json<DepositAccount>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let account = deposit::apply_month_end(&tx, &account_id, req.effective_date)?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(account))
}
