//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::LinkError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::scheduler;

/// Run the link service until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), LinkError> {
    info!("Initializing API link service...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(version, &options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start the service: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    version: String,
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, LinkError> {
    let app_state = Arc::new(AppState::init(version, &options.layout, options.request_timeout).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_scheduler_worker(
        options.scheduler.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(app_state)
}

async fn init_scheduler_worker(
    options: scheduler::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LinkError> {
    info!("Initializing scheduler worker...");

    let manager = app_state.manager.clone();

    let scheduler_handle = tokio::spawn(async move {
        scheduler::run(
            &options,
            manager,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_scheduler_worker_handle(scheduler_handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LinkError> {
    info!("Initializing management HTTP server...");

    let server_state = ServerState::new(
        app_state.version.clone(),
        app_state.manager.clone(),
        app_state.started_at,
    );

    let (_addr, server_handle) = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), LinkError>>>,
    scheduler_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            scheduler_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), LinkError> {
        if self.app_state.is_some() {
            return Err(LinkError::Shutdown("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_scheduler_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), LinkError> {
        if self.scheduler_worker_handle.is_some() {
            return Err(LinkError::Shutdown("scheduler_handle already set".to_string()));
        }
        self.scheduler_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), LinkError>>,
    ) -> Result<(), LinkError> {
        if self.server_handle.is_some() {
            return Err(LinkError::Shutdown("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), LinkError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), LinkError> {
        info!("Shutting down API link service...");

        // 1. Scheduler, which waits out its grace period for running cycles
        if let Some(handle) = self.scheduler_worker_handle.take() {
            handle.await.map_err(|e| LinkError::Shutdown(e.to_string()))?;
        }

        // 2. Management server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| LinkError::Shutdown(e.to_string()))??;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
