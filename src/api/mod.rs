pub mod error;
pub mod handlers;
pub mod state;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use state::AppState;

pub async fn serve(host: &str, port: u16, data_dir: &Path) -> Result<()> {
    let data_dir = if data_dir.starts_with("~") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        std::path::PathBuf::from(home).join(data_dir.strip_prefix("~").unwrap())
    } else {
        data_dir.to_path_buf()
    };

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db_path = crate::store::resolve_db_path(&data_dir);
    let db = crate::store::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let state = AppState::new(db);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/deposits",
            post(handlers::deposits::open),
        )
        .route(
            "/api/deposits/{id}",
            get(handlers::deposits::get),
        )
        .route(
            "/api/deposits/{id}/deposit",
            post(handlers::deposits::deposit_funds),
        )
        .route(
            "/api/deposits/{id}/withdraw",
            post(handlers::deposits::withdraw),
        )
        .route(
            "/api/deposits/{id}/accrue",
            post(handlers::deposits::accrue),
        )
        .route(
            "/api/deposits/{id}/month-end",
            post(handlers::deposits::month_end),
        )
        .route("/api/loans", post(handlers::loans::open))
        .route("/api/loans/{id}", get(handlers::loans::get))
        .route("/api/loans/{id}/accrue", post(handlers::loans::accrue))
        .route("/api/loans/{id}/repay", post(handlers::loans::repay))
        .route("/api/outbox/dispatch", post(handlers::outbox::dispatch))
        .route("/api/outbox/replay", post(handlers::outbox::replay))
        .route(
            "/api/webhook-subscriptions",
            post(handlers::webhooks::create),
        )
        .layer(cors)
        .with_state(state);

    let addr = format!("{host}:{port}");
    println!("fintech-ledger API server listening on {addr}");
    println!("  Health:        GET  http://{addr}/health");
    println!("  Deposits:      POST http://{addr}/api/deposits");
    println!("  Loans:         POST http://{addr}/api/loans");
    println!("  Outbox:        POST http://{addr}/api/outbox/dispatch");
    println!("  Outbox replay: POST http://{addr}/api/outbox/replay");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    axum::serve(listener, app).await.context("running server")?;

    Ok(())
}
