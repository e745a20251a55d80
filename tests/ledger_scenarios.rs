use chrono::NaiveDate;
use fintech_ledger::money::Money;
use fintech_ledger::store::{self, events, ledger};
use fintech_ledger::{deposit, loan, outbox};

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

/// S1: deposit opened, two idempotent deposits collapse to one, accrual and
/// month-end match the spec's literal numbers.
#[tokio::test]
async fn scenario_s1_deposit_lifecycle() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    let account = deposit::open_account(
        &conn,
        date("2026-01-01"),
        "0.100000".parse().unwrap(),
        365,
        None,
    )
    .unwrap();

    deposit::post_deposit(
        &conn,
        &account.id,
        money("100.00"),
        date("2026-01-01"),
        Some("dep-1"),
    )
    .unwrap();
    let account = deposit::post_deposit(
        &conn,
        &account.id,
        money("100.00"),
        date("2026-01-01"),
        Some("dep-1"),
    )
    .unwrap();
    assert_eq!(account.current_balance, money("100.00"));

    let account = deposit::accrue_interest(&conn, &account.id, date("2026-01-11")).unwrap();
    assert_eq!(account.accrued_interest, money("0.27"));

    let account = deposit::apply_month_end(&conn, &account.id, date("2026-01-31")).unwrap();
    assert_eq!(account.accrued_interest, money("0.00"));
    assert_eq!(account.current_balance, money("100.27"));
}

/// S2: loan disbursement, accrual, repayment with interest-first allocation,
/// and idempotent replay of the same repayment key.
#[tokio::test]
async fn scenario_s2_loan_repayment() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    let account = loan::open_loan(
        &conn,
        date("2026-01-01"),
        money("1000.00"),
        "0.120000".parse().unwrap(),
        365,
        None,
    )
    .unwrap();

    let account = loan::accrue_interest(&conn, &account.id, date("2026-01-31")).unwrap();
    assert_eq!(account.accrued_interest, money("9.86"));

    let account = loan::post_repayment(
        &conn,
        &account.id,
        money("200.00"),
        date("2026-01-31"),
        Some("pay-1"),
    )
    .unwrap();
    assert_eq!(account.accrued_interest, money("0.00"));
    assert_eq!(account.outstanding_principal, money("809.86"));

    let replayed = loan::post_repayment(
        &conn,
        &account.id,
        money("200.00"),
        date("2026-01-31"),
        Some("pay-1"),
    )
    .unwrap();
    assert_eq!(replayed.outstanding_principal, money("809.86"));
}

/// S3: every mutating command stages exactly one domain event and one
/// outbox row per enabled subscription plus one queue row.
#[tokio::test]
async fn scenario_s3_staging_fanout() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    events::create_webhook_subscription(&conn, "https://example.com/hook").unwrap();

    let account =
        deposit::open_account(&conn, date("2026-01-01"), "0.050000".parse().unwrap(), 365, None)
            .unwrap();

    let entries = ledger::query(&conn, &ledger::LedgerFilter::default(), 10, 0).unwrap();
    assert!(entries.is_empty());

    let mut stmt = conn
        .prepare("SELECT COUNT(*) FROM outbox_messages")
        .unwrap();
    let count: i64 = stmt.query_row([], |r| r.get(0)).unwrap();
    assert_eq!(count, 2);

    let _ = account;
}

/// S4: a disabled subscription is SKIPPED on dispatch while the queue row
/// still succeeds.
#[tokio::test]
async fn scenario_s4_disabled_subscription_is_skipped() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    let sub = events::create_webhook_subscription(&conn, "https://example.com/hook").unwrap();
    conn.execute(
        "UPDATE webhook_subscriptions SET enabled = 0 WHERE id = ?1",
        [&sub.id],
    )
    .unwrap();

    deposit::open_account(&conn, date("2026-01-01"), "0.050000".parse().unwrap(), 365, None)
        .unwrap();

    let client = reqwest::Client::new();
    let report = outbox::dispatch_cycle(&conn, &client, 10).await.unwrap();

    let webhook_result = report
        .results
        .iter()
        .find(|r| r.destination.starts_with("webhook:"))
        .unwrap();
    assert_eq!(webhook_result.status, "SKIPPED");
    assert_eq!(
        webhook_result.error.as_deref(),
        Some("subscription_disabled_or_missing")
    );

    let queue_result = report
        .results
        .iter()
        .find(|r| r.destination == "queue:domain_events")
        .unwrap();
    assert_eq!(queue_result.status, "SENT");
}

/// S5: a webhook target fails with HTTP 500 three times, then returns 200.
/// Three dispatch cycles drive `attempts` 1 -> 4, `status` staying PENDING
/// with the backoff-scheduled `next_attempt_at` in between, and the row
/// ends SENT on the cycle that finally reaches the healthy response.
#[tokio::test]
async fn scenario_s5_webhook_retries_then_succeeds() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::routing::post;

    let hits = Arc::new(AtomicU32::new(0));
    let hits_for_handler = hits.clone();
    let app = Router::new().route(
        "/hook",
        post(move || {
            let hits = hits_for_handler.clone();
            async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 3 {
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    axum::http::StatusCode::OK
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    let sub = events::create_webhook_subscription(&conn, &format!("http://{addr}/hook")).unwrap();

    deposit::open_account(&conn, date("2026-01-01"), "0.050000".parse().unwrap(), 365, None)
        .unwrap();

    let client = reqwest::Client::new();
    let webhook_row = |report: &outbox::DispatchReport| {
        report
            .results
            .iter()
            .find(|r| r.destination == format!("webhook:{}", sub.id))
            .unwrap()
            .clone()
    };

    // Cycle 1: first 500 -> attempts=1, rescheduled ~1s out.
    let report = outbox::dispatch_cycle(&conn, &client, 10).await.unwrap();
    let row = webhook_row(&report);
    assert_eq!(row.status, "PENDING");
    assert!(row.next_attempt_at.is_some());
    conn.execute(
        "UPDATE outbox_messages SET next_attempt_at = NULL WHERE destination = ?1",
        [format!("webhook:{}", sub.id)],
    )
    .unwrap();

    // Cycle 2: second 500 -> attempts=2, rescheduled ~2s out.
    let report = outbox::dispatch_cycle(&conn, &client, 10).await.unwrap();
    let row = webhook_row(&report);
    assert_eq!(row.status, "PENDING");
    conn.execute(
        "UPDATE outbox_messages SET next_attempt_at = NULL WHERE destination = ?1",
        [format!("webhook:{}", sub.id)],
    )
    .unwrap();

    // Cycle 3: third 500 -> attempts=3, rescheduled ~4s out.
    let report = outbox::dispatch_cycle(&conn, &client, 10).await.unwrap();
    let row = webhook_row(&report);
    assert_eq!(row.status, "PENDING");
    conn.execute(
        "UPDATE outbox_messages SET next_attempt_at = NULL WHERE destination = ?1",
        [format!("webhook:{}", sub.id)],
    )
    .unwrap();

    // Cycle 4: hits the now-healthy target -> SENT, attempts=4.
    let report = outbox::dispatch_cycle(&conn, &client, 10).await.unwrap();
    let row = webhook_row(&report);
    assert_eq!(row.status, "SENT");
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    let mut stmt = conn
        .prepare("SELECT attempts FROM outbox_messages WHERE destination = ?1")
        .unwrap();
    let attempts: i64 = stmt
        .query_row([format!("webhook:{}", sub.id)], |r| r.get(0))
        .unwrap();
    assert_eq!(attempts, 4);
}

/// S6: a row already at max_attempts is transitioned straight to DEAD
/// without a delivery attempt.
#[tokio::test]
async fn scenario_s6_exhausted_attempts_go_dead() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    deposit::open_account(&conn, date("2026-01-01"), "0.050000".parse().unwrap(), 365, None)
        .unwrap();

    conn.execute(
        "UPDATE outbox_messages SET attempts = max_attempts",
        [],
    )
    .unwrap();

    let client = reqwest::Client::new();
    let report = outbox::dispatch_cycle(&conn, &client, 10).await.unwrap();

    assert!(report.results.iter().all(|r| r.status == "DEAD"));
}

/// Withdrawing exactly the balance is allowed and leaves 0.00; withdrawing
/// one cent more fails with insufficient_funds.
#[tokio::test]
async fn withdrawal_boundary() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    let account =
        deposit::open_account(&conn, date("2026-01-01"), "0.050000".parse().unwrap(), 365, None)
            .unwrap();
    deposit::post_deposit(&conn, &account.id, money("50.00"), date("2026-01-01"), None).unwrap();

    let account =
        deposit::post_withdrawal(&conn, &account.id, money("50.00"), date("2026-01-02"), None)
            .unwrap();
    assert_eq!(account.current_balance, money("0.00"));

    let err = deposit::post_withdrawal(&conn, &account.id, money("0.01"), date("2026-01-02"), None)
        .unwrap_err();
    assert_eq!(err, fintech_ledger::error::CoreError::InsufficientFunds);
}

/// Accruing twice for the same `as_of_date` is a no-op the second time.
#[tokio::test]
async fn accrual_is_idempotent_per_date() {
    let db = store::open_in_memory().unwrap();
    let conn = db.lock().await;

    let account =
        deposit::open_account(&conn, date("2026-01-01"), "0.100000".parse().unwrap(), 365, None)
            .unwrap();
    deposit::post_deposit(&conn, &account.id, money("100.00"), date("2026-01-01"), None).unwrap();

    let once = deposit::accrue_interest(&conn, &account.id, date("2026-01-11")).unwrap();
    let twice = deposit::accrue_interest(&conn, &account.id, date("2026-01-11")).unwrap();
    assert_eq!(once.accrued_interest, twice.accrued_interest);
}
