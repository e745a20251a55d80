use axum::Json;
use axum::extract::State;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::{DispatchOutboxRequest, ReplayOutboxRequest};
use crate::error::CoreError;
use crate::outbox::{self, DispatchReport, ReplayFilter};

pub async fn dispatch(
    State(state): State<AppState>,
    Json(req): Json<DispatchOutboxRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    if !(1..=500).contains(&req.max_messages) {
        return Err(ApiError::BadRequest(
            "max_messages must be between 1 and 500".into(),
        ));
    }

    let conn = state.db.lock().await;
    let report = outbox::dispatch_cycle(&conn, &state.http, req.max_messages).await?;
    Ok(Json(report))
}

#[derive(Debug, serde::Serialize)]
pub struct ReplayResponse {
    pub requeued: usize,
}

pub async fn replay(
    State(state): State<AppState>,
    Json(req): Json<ReplayOutboxRequest>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let filter = ReplayFilter {
        aggregate_type: req.aggregate_type,
        aggregate_id: req.aggregate_id,
        destination: req.destination,
    };
    let requeued = outbox::replay(&tx, &filter)?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(ReplayResponse { requeued }))
}
