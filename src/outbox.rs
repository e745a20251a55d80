//! Outbox dispatcher (spec §4.7, C7) and replay tool (spec §4.8, C8).

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::store::events::{OutboxMessage, OutboxStatus, get_webhook_subscription};

/// A parsed `destination` string (spec §3: `queue:<topic>` or
/// `webhook:<subscription_id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Queue(String),
    Webhook(String),
    Unknown(String),
}

impl Destination {
    pub fn parse(raw: &str) -> Destination {
        if let Some(topic) = raw.strip_prefix("queue:") {
            Destination::Queue(topic.to_string())
        } else if let Some(id) = raw.strip_prefix("webhook:") {
            Destination::Webhook(id.to_string())
        } else {
            Destination::Unknown(raw.to_string())
        }
    }
}

/// The JSON body sent to both `queue:` sinks and `webhook:` destinations.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRowResult {
    pub id: String,
    pub destination: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub processed: usize,
    pub results: Vec<DispatchRowResult>,
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxMessage> {
    let created_at: String = row.get(1)?;
    let status: String = row.get(4)?;
    let next_attempt_at: Option<String> = row.get(7)?;

    Ok(OutboxMessage {
        id: row.get(0)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        event_id: row.get(2)?,
        destination: row.get(3)?,
        status: OutboxStatus::parse(&status),
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        next_attempt_at: next_attempt_at
            .map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
        last_error: row.get(8)?,
    })
}

fn select_pending(
    conn: &Connection,
    now: DateTime<Utc>,
    max_messages: i64,
) -> Result<Vec<OutboxMessage>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, created_at, event_id, destination, status, attempts, max_attempts,
                next_attempt_at, last_error
         FROM outbox_messages
         WHERE status = 'PENDING' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
         ORDER BY created_at ASC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![now.to_rfc3339(), max_messages], row_to_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_envelope(conn: &Connection, event_id: &str) -> Result<EventEnvelope, CoreError> {
    conn.query_row(
        "SELECT id, aggregate_type, aggregate_id, event_type, event_time, payload
         FROM domain_events WHERE id = ?1",
        params![event_id],
        |row| {
            let event_time: String = row.get(4)?;
            let payload_json: String = row.get(5)?;
            Ok(EventEnvelope {
                event_id: row.get(0)?,
                aggregate_type: row.get(1)?,
                aggregate_id: row.get(2)?,
                event_type: row.get(3)?,
                event_time: DateTime::parse_from_rfc3339(&event_time)
                    .unwrap()
                    .with_timezone(&Utc),
                payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
            })
        },
    )
    .map_err(CoreError::from)
}

fn mark(
    conn: &Connection,
    id: &str,
    status: OutboxStatus,
    attempts: i64,
    last_error: Option<&str>,
    next_attempt_at: Option<DateTime<Utc>>,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE outbox_messages
         SET status = ?1, attempts = ?2, last_error = ?3, next_attempt_at = ?4
         WHERE id = ?5",
        params![
            status.as_str(),
            attempts,
            last_error,
            next_attempt_at.map(|t| t.to_rfc3339()),
            id,
        ],
    )?;
    Ok(())
}

fn insert_queue_message(
    conn: &Connection,
    topic: &str,
    envelope: &EventEnvelope,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO queue_messages (id, created_at, topic, payload) VALUES (?1, ?2, ?3, ?4)",
        params![
            Uuid::new_v4().to_string(),
            Utc::now().to_rfc3339(),
            topic,
            serde_json::to_string(envelope)
                .map_err(|e| CoreError::Storage(format!("serializing envelope: {e}")))?,
        ],
    )?;
    Ok(())
}

/// `backoff = min(300, 2^(attempts-1))` seconds.
fn backoff_seconds(attempts: i64) -> i64 {
    300.min(1i64 << (attempts - 1).max(0).min(62))
}

/// Runs one dispatch cycle over at most `max_messages` due rows, driving
/// each to a terminal or rescheduled state (spec §4.7). The whole batch
/// runs inside one transaction, committed once at the end, matching the
/// rest of the crate's per-command transactional convention — a crash
/// mid-cycle leaves every row exactly as it was before the cycle started.
pub async fn dispatch_cycle(
    conn: &Connection,
    client: &reqwest::Client,
    max_messages: i64,
) -> Result<DispatchReport, CoreError> {
    let tx = conn.unchecked_transaction()?;

    let now = Utc::now();
    let pending = select_pending(&tx, now, max_messages)?;

    let mut results = Vec::with_capacity(pending.len());

    for msg in pending {
        if msg.attempts >= msg.max_attempts {
            mark(&tx, &msg.id, OutboxStatus::Dead, msg.attempts, None, None)?;
            results.push(DispatchRowResult {
                id: msg.id,
                destination: msg.destination,
                status: "DEAD",
                error: None,
                next_attempt_at: None,
            });
            continue;
        }

        let attempts = msg.attempts + 1;
        let destination = Destination::parse(&msg.destination);

        let outcome: Result<(), RowError> = match &destination {
            Destination::Queue(topic) => {
                let envelope = load_envelope(&tx, &msg.event_id)?;
                insert_queue_message(&tx, topic, &envelope)?;
                Ok(())
            }
            Destination::Webhook(sub_id) => match get_webhook_subscription(&tx, sub_id)? {
                None => Err(RowError::Terminal("subscription_disabled_or_missing".into())),
                Some(sub) if !sub.enabled => {
                    Err(RowError::Terminal("subscription_disabled_or_missing".into()))
                }
                Some(sub) => {
                    let envelope = load_envelope(&tx, &msg.event_id)?;
                    deliver_webhook(client, &sub.target_url, &envelope)
                        .await
                        .map_err(RowError::Transient)
                }
            },
            Destination::Unknown(dest) => {
                Err(RowError::Terminal(format!("unknown_destination:{dest}")))
            }
        };

        match outcome {
            Ok(_) => {
                mark(&tx, &msg.id, OutboxStatus::Sent, attempts, None, None)?;
                results.push(DispatchRowResult {
                    id: msg.id,
                    destination: msg.destination,
                    status: "SENT",
                    error: None,
                    next_attempt_at: None,
                });
            }
            Err(RowError::Terminal(reason)) if matches!(destination, Destination::Webhook(_)) => {
                mark(
                    &tx,
                    &msg.id,
                    OutboxStatus::Skipped,
                    attempts,
                    Some(&reason),
                    None,
                )?;
                results.push(DispatchRowResult {
                    id: msg.id,
                    destination: msg.destination,
                    status: "SKIPPED",
                    error: Some(reason),
                    next_attempt_at: None,
                });
            }
            Err(RowError::Terminal(reason)) => {
                mark(
                    &tx,
                    &msg.id,
                    OutboxStatus::Failed,
                    attempts,
                    Some(&reason),
                    None,
                )?;
                results.push(DispatchRowResult {
                    id: msg.id,
                    destination: msg.destination,
                    status: "FAILED",
                    error: Some(reason),
                    next_attempt_at: None,
                });
            }
            Err(RowError::Transient(reason)) => {
                if attempts >= msg.max_attempts {
                    mark(
                        &tx,
                        &msg.id,
                        OutboxStatus::Dead,
                        attempts,
                        Some(&reason),
                        None,
                    )?;
                    results.push(DispatchRowResult {
                        id: msg.id,
                        destination: msg.destination,
                        status: "DEAD",
                        error: Some(reason),
                        next_attempt_at: None,
                    });
                } else {
                    let delay = backoff_seconds(attempts);
                    let next_attempt_at = now + chrono::Duration::seconds(delay);
                    mark(
                        &tx,
                        &msg.id,
                        OutboxStatus::Pending,
                        attempts,
                        Some(&reason),
                        Some(next_attempt_at),
                    )?;
                    results.push(DispatchRowResult {
                        id: msg.id,
                        destination: msg.destination,
                        status: "PENDING",
                        error: Some(reason),
                        next_attempt_at: Some(next_attempt_at),
                    });
                }
            }
        }
    }

    tx.commit()?;

    Ok(DispatchReport {
        processed: results.len(),
        results,
    })
}

enum RowError {
    /// Terminal per-row failure: not retried (unknown scheme, disabled
    /// subscription).
    Terminal(String),
    /// Transient failure: rescheduled with backoff until attempts exhaust.
    Transient(String),
}

async fn deliver_webhook(
    client: &reqwest::Client,
    target_url: &str,
    envelope: &EventEnvelope,
) -> Result<(), String> {
    let response = client
        .post(target_url)
        .timeout(Duration::from_secs(5))
        .json(envelope)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("http_status:{}", response.status().as_u16()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parses_known_schemes() {
        assert_eq!(
            Destination::parse("queue:domain_events"),
            Destination::Queue("domain_events".into())
        );
        assert_eq!(
            Destination::parse("webhook:sub-1"),
            Destination::Webhook("sub-1".into())
        );
        assert_eq!(
            Destination::parse("carrier-pigeon:nest"),
            Destination::Unknown("carrier-pigeon:nest".into())
        );
    }

    #[test]
    fn backoff_doubles_and_caps_at_300() {
        assert_eq!(backoff_seconds(1), 1);
        assert_eq!(backoff_seconds(2), 2);
        assert_eq!(backoff_seconds(3), 4);
        assert_eq!(backoff_seconds(10), 300);
    }

    #[tokio::test]
    async fn unknown_destination_is_terminal_failed() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::store::migrate(&conn).unwrap();

        crate::deposit::open_account(
            &conn,
            "2026-01-01".parse().unwrap(),
            "0.050000".parse().unwrap(),
            365,
            None,
        )
        .unwrap();
        conn.execute(
            "UPDATE outbox_messages SET destination = 'carrier-pigeon:nest'",
            [],
        )
        .unwrap();

        let client = reqwest::Client::new();
        let report = dispatch_cycle(&conn, &client, 10).await.unwrap();

        assert!(report.results.iter().all(|r| r.status == "FAILED"));
    }
}

/// Fields to match on when resetting outbox rows; unfiltered fields are
/// ignored.
#[derive(Debug, Default, Clone)]
pub struct ReplayFilter {
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<String>,
    pub destination: Option<String>,
}

/// Resets every `OutboxMessage` matching `filter` (terminal or not) back to
/// `PENDING`, `attempts=0`, `last_error=None`, `next_attempt_at=now`.
/// Returns the count updated (spec §4.8).
pub fn replay(conn: &Connection, filter: &ReplayFilter) -> Result<usize, CoreError> {
    let mut sql = String::from(
        "SELECT m.id FROM outbox_messages m JOIN domain_events e ON m.event_id = e.id WHERE 1 = 1",
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref v) = filter.aggregate_type {
        sql.push_str(&format!(" AND e.aggregate_type = ?{}", params.len() + 1));
        params.push(Box::new(v.clone()));
    }
    if let Some(ref v) = filter.aggregate_id {
        sql.push_str(&format!(" AND e.aggregate_id = ?{}", params.len() + 1));
        params.push(Box::new(v.clone()));
    }
    if let Some(ref v) = filter.destination {
        sql.push_str(&format!(" AND m.destination = ?{}", params.len() + 1));
        params.push(Box::new(v.clone()));
    }

    let ids: Vec<String> = {
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        stmt.query_map(param_refs.as_slice(), |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?
    };

    let now = Utc::now().to_rfc3339();
    for id in &ids {
        conn.execute(
            "UPDATE outbox_messages
             SET status = 'PENDING', attempts = 0, last_error = NULL, next_attempt_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
    }

    Ok(ids.len())
}
