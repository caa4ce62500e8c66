//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::scheduler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable the management HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Scheduler worker options
    pub scheduler: scheduler::Options,

    /// Timeout for every source fetch and dial call
    pub request_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            enable_server: true,
            server: ServerOptions::default(),
            scheduler: scheduler::Options::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        let shutdown_grace = Duration::from_millis(settings.scheduler.shutdown_grace_ms);
        Self {
            lifecycle: LifecycleOptions {
                // leave room for the scheduler grace period plus the server
                max_shutdown_delay: shutdown_grace + Duration::from_secs(5),
            },
            layout,
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            scheduler: scheduler::Options {
                tick_interval: Duration::from_millis(settings.scheduler.tick_interval_ms.max(1)),
                shutdown_grace,
            },
            request_timeout: Duration::from_secs(settings.http.request_timeout_secs.max(1)),
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(8),
        }
    }
}

/// Management HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5341,
        }
    }
}
