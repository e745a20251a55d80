use crate::store::Db;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
        }
    }
}
