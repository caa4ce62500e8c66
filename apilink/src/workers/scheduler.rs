//! Scheduler worker
//!
//! Wakes on a fixed tick, spawns one cycle per due link and keeps track of
//! the cycles still running so shutdown can wait for them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::link::manager::LinkManager;

/// Scheduler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between due checks
    pub tick_interval: Duration,

    /// How long shutdown waits for in-flight cycles before aborting them
    pub shutdown_grace: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// Run the scheduler worker
pub async fn run<S, F>(
    options: &Options,
    manager: Arc<LinkManager>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Scheduler worker starting...");
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Scheduler worker shutting down...");
                break;
            }
            _ = sleep_fn(options.tick_interval) => {}
        }

        reap(&mut in_flight);
        tick(&manager, &mut in_flight).await;
    }

    drain(in_flight, options.shutdown_grace).await;
}

/// Spawn a cycle for every due link. Returns how many were started.
pub async fn tick(manager: &Arc<LinkManager>, in_flight: &mut JoinSet<()>) -> usize {
    let now = Utc::now();
    let due = manager.claim_due(now).await;
    let started = due.len();

    for link in due {
        debug!("Link `{}` is due", link.id());
        let manager = manager.clone();
        in_flight.spawn(async move {
            // failures are logged by the manager and retried next tick
            let _ = manager.run_claimed(link, now).await;
        });
    }
    started
}

fn reap(in_flight: &mut JoinSet<()>) {
    while let Some(result) = in_flight.try_join_next() {
        if let Err(e) = result {
            error!("Link cycle task failed: {}", e);
        }
    }
}

async fn drain(mut in_flight: JoinSet<()>, grace: Duration) {
    if in_flight.is_empty() {
        return;
    }

    info!("Waiting up to {:?} for {} running cycle(s)...", grace, in_flight.len());
    let finished = tokio::time::timeout(grace, async {
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!("Link cycle task failed: {}", e);
            }
        }
    })
    .await;

    if finished.is_err() {
        warn!("Aborting {} cycle(s) still running after {:?}", in_flight.len(), grace);
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }
}
