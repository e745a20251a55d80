//! Event log and outbox staging (spec §4.3, §4.4).

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::payload::EventPayload;

#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub payload: EventPayload,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Skipped,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Skipped => "SKIPPED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
        }
    }

    pub fn parse(s: &str) -> OutboxStatus {
        match s {
            "SENT" => OutboxStatus::Sent,
            "SKIPPED" => OutboxStatus::Skipped,
            "FAILED" => OutboxStatus::Failed,
            "DEAD" => OutboxStatus::Dead,
            _ => OutboxStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub event_id: String,
    pub destination: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub target_url: String,
    pub enabled: bool,
}

/// Inserts a `DomainEvent` and stages one `OutboxMessage` per enabled
/// `WebhookSubscription` plus one for `queue:domain_events`, all within the
/// caller's transaction (spec §4.3). Returns the inserted event.
pub fn append_event(
    conn: &Connection,
    aggregate_type: &str,
    aggregate_id: &str,
    payload: EventPayload,
    event_time: DateTime<Utc>,
    idempotency_key: Option<&str>,
) -> Result<DomainEvent, CoreError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let event_type = payload.event_type();
    let payload_json = serde_json::to_string(&payload)
        .map_err(|e| CoreError::Storage(format!("serializing event payload: {e}")))?;

    conn.execute(
        "INSERT INTO domain_events
            (id, created_at, aggregate_type, aggregate_id, event_type, event_time,
             payload, idempotency_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            created_at.to_rfc3339(),
            aggregate_type,
            aggregate_id,
            event_type,
            event_time.to_rfc3339(),
            payload_json,
            idempotency_key,
        ],
    )?;

    let now = Utc::now();
    let subs = list_enabled_webhook_subscriptions(conn)?;
    for sub in subs {
        stage_outbox_message(conn, &id, &format!("webhook:{}", sub.id), now)?;
    }
    stage_outbox_message(conn, &id, "queue:domain_events", now)?;

    Ok(DomainEvent {
        id,
        created_at,
        aggregate_type: aggregate_type.to_string(),
        aggregate_id: aggregate_id.to_string(),
        event_type: event_type.to_string(),
        event_time,
        payload,
        idempotency_key: idempotency_key.map(str::to_string),
    })
}

fn stage_outbox_message(
    conn: &Connection,
    event_id: &str,
    destination: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO outbox_messages
            (id, created_at, event_id, destination, status, attempts, max_attempts, next_attempt_at)
         VALUES (?1, ?2, ?3, ?4, 'PENDING', 0, 10, ?5)",
        params![
            Uuid::new_v4().to_string(),
            Utc::now().to_rfc3339(),
            event_id,
            destination,
            next_attempt_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Returns the most-recently-created `DomainEvent` matching
/// `(aggregate_type, idempotency_key)`, or `None`.
pub fn find_event_by_idempotency_key(
    conn: &Connection,
    aggregate_type: &str,
    idempotency_key: &str,
) -> Result<Option<DomainEvent>, CoreError> {
    conn.query_row(
        "SELECT id, created_at, aggregate_type, aggregate_id, event_type, event_time,
                payload, idempotency_key
         FROM domain_events
         WHERE aggregate_type = ?1 AND idempotency_key = ?2
         ORDER BY created_at DESC LIMIT 1",
        params![aggregate_type, idempotency_key],
        row_to_event,
    )
    .optional()
    .map_err(CoreError::from)
}


fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<DomainEvent> {
    let created_at: String = row.get(1)?;
    let event_time: String = row.get(5)?;
    let payload_json: String = row.get(6)?;

    Ok(DomainEvent {
        id: row.get(0)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        aggregate_type: row.get(2)?,
        aggregate_id: row.get(3)?,
        event_type: row.get(4)?,
        event_time: DateTime::parse_from_rfc3339(&event_time)
            .unwrap()
            .with_timezone(&Utc),
        payload: serde_json::from_str(&payload_json).unwrap(),
        idempotency_key: row.get(7)?,
    })
}

pub fn create_webhook_subscription(
    conn: &Connection,
    target_url: &str,
) -> Result<WebhookSubscription, CoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO webhook_subscriptions (id, created_at, target_url, enabled)
         VALUES (?1, ?2, ?3, 1)",
        params![id, Utc::now().to_rfc3339(), target_url],
    )?;
    Ok(WebhookSubscription {
        id,
        target_url: target_url.to_string(),
        enabled: true,
    })
}

pub fn list_enabled_webhook_subscriptions(
    conn: &Connection,
) -> Result<Vec<WebhookSubscription>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, target_url, enabled FROM webhook_subscriptions WHERE enabled = 1",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(WebhookSubscription {
                id: row.get(0)?,
                target_url: row.get(1)?,
                enabled: row.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_webhook_subscription(
    conn: &Connection,
    id: &str,
) -> Result<Option<WebhookSubscription>, CoreError> {
    conn.query_row(
        "SELECT id, target_url, enabled FROM webhook_subscriptions WHERE id = ?1",
        params![id],
        |row| {
            Ok(WebhookSubscription {
                id: row.get(0)?,
                target_url: row.get(1)?,
                enabled: row.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(CoreError::from)
}
