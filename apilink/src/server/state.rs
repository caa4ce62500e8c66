//! Server state

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::link::manager::LinkManager;

/// Server state shared across handlers
pub struct ServerState {
    pub version: String,
    pub manager: Arc<LinkManager>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(version: String, manager: Arc<LinkManager>, started_at: DateTime<Utc>) -> Self {
        Self {
            version,
            manager,
            started_at,
        }
    }
}
