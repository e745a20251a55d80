use axum::Json;
use axum::extract::State;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::CreateWebhookSubscriptionRequest;
use crate::error::CoreError;
use crate::store::events::{self, WebhookSubscription};

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateWebhookSubscriptionRequest>,
) -> Result<Json<WebhookSubscription>, ApiError> {
    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(CoreError::from)?;

    let sub = events::create_webhook_subscription(&tx, &req.target_url)?;

    tx.commit().map_err(CoreError::from)?;
    Ok(Json(sub))
}
