use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::gateway::RoomRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(db: Pool<Sqlite>, config: Arc<Config>) -> Self {
        AppState {
            db,
            config,
            rooms: Arc::new(RoomRegistry::new()),
        }
    }
}
