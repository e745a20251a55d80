pub mod deposits;
pub mod loans;
pub mod outbox;
pub mod webhooks;
