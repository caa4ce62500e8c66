//! Application state management

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::info;

use crate::errors::LinkError;
use crate::link::manager::LinkManager;
use crate::storage::images::ImageStore;
use crate::storage::layout::StorageLayout;
use crate::storage::links::TomlLinkStore;

/// Main application state
pub struct AppState {
    /// Service version
    pub version: String,

    /// Every loaded link
    pub manager: Arc<LinkManager>,

    /// When the service started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Initialize application state and load the link files
    pub async fn init(
        version: String,
        layout: &StorageLayout,
        request_timeout: Duration,
    ) -> Result<Self, LinkError> {
        info!("Initializing application state...");

        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("apilink/{}", version))
            .build()
            .map_err(|e| LinkError::Config(format!("failed to build HTTP client: {}", e)))?;

        let store = Arc::new(TomlLinkStore::new(layout.links_dir()));
        let images = ImageStore::new(layout.images_dir());
        let manager = Arc::new(LinkManager::new(store, images, http, request_timeout));
        manager.load_all().await?;

        Ok(Self {
            version,
            manager,
            started_at: Utc::now(),
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
