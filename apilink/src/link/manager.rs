//! Link registry
//!
//! Keeps one runtime per link file and serializes every mutation of a link
//! through that runtime's mutex, so a management call and a scheduled cycle
//! never touch the same link at once. Status reads go through a watch
//! channel instead and never wait for a running cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::errors::LinkError;
use crate::link::runtime::{CycleReport, LinkRuntime, LinkStatus};
use crate::models::link::LinkDefinition;
use crate::storage::images::ImageStore;
use crate::storage::links::{is_valid_link_id, sanitize_link_name, LinkStore};

pub type SharedRuntime = Arc<Mutex<LinkRuntime>>;

#[derive(Clone)]
struct LinkEntry {
    runtime: SharedRuntime,
    status: watch::Receiver<LinkStatus>,
}

impl LinkEntry {
    fn new(runtime: LinkRuntime) -> Self {
        Self {
            status: runtime.status_feed(),
            runtime: Arc::new(Mutex::new(runtime)),
        }
    }

    fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }
}

/// A link whose cycle is about to run. Holding it keeps the link locked.
pub struct DueLink {
    id: String,
    runtime: SharedRuntime,
    guard: OwnedMutexGuard<LinkRuntime>,
}

impl DueLink {
    pub fn id(&self) -> &str {
        &self.id
    }
}

pub struct LinkManager {
    store: Arc<dyn LinkStore>,
    images: ImageStore,
    http: Client,
    request_timeout: Duration,
    links: RwLock<BTreeMap<String, LinkEntry>>,
}

impl LinkManager {
    pub fn new(
        store: Arc<dyn LinkStore>,
        images: ImageStore,
        http: Client,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            images,
            http,
            request_timeout,
            links: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    async fn build_runtime(&self, id: &str) -> Result<LinkRuntime, LinkError> {
        let definition = self.store.load_definition(id).await?;
        self.runtime_for(id, definition)
    }

    fn runtime_for(&self, id: &str, definition: LinkDefinition) -> Result<LinkRuntime, LinkError> {
        LinkRuntime::new(
            id,
            definition,
            self.http.clone(),
            self.images.clone(),
            self.request_timeout,
        )
    }

    async fn load_runtimes(&self) -> Result<BTreeMap<String, LinkRuntime>, LinkError> {
        let mut loaded = BTreeMap::new();
        for id in self.store.list_ids().await? {
            if !is_valid_link_id(&id) {
                warn!("Skipping link file `{}`: invalid name", id);
                continue;
            }
            match self.build_runtime(&id).await {
                Ok(runtime) => {
                    debug!("Loaded link `{}`", id);
                    loaded.insert(id, runtime);
                }
                Err(e) => error!("Link `{}` could not be loaded: {}", id, e),
            }
        }
        Ok(loaded)
    }

    fn register(&self, links: &mut BTreeMap<String, LinkEntry>, loaded: BTreeMap<String, LinkRuntime>) {
        for (id, runtime) in loaded {
            links.insert(id, LinkEntry::new(runtime));
        }
    }

    /// Load every link file in the store. Invalid files are logged and skipped.
    pub async fn load_all(&self) -> Result<usize, LinkError> {
        let loaded = self.load_runtimes().await?;
        let count = loaded.len();
        self.register(&mut *self.links.write().await, loaded);
        info!("Loaded {} link(s)", count);
        Ok(count)
    }

    /// Drop every runtime and load the store again.
    ///
    /// Links that survive the reload keep their next due time; everything
    /// else about them starts fresh, so the dial is pushed again.
    pub async fn reload_all(&self) -> Result<usize, LinkError> {
        let mut loaded = self.load_runtimes().await?;

        let mut links = self.links.write().await;
        for (id, entry) in std::mem::take(&mut *links) {
            let next_due = entry.status().next_due_time;
            if let (Some(fresh), Some(at)) = (loaded.get_mut(&id), next_due) {
                fresh.set_next_due_time(at);
            }
        }

        let count = loaded.len();
        self.register(&mut links, loaded);
        info!("Reloaded {} link(s)", count);
        Ok(count)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.links.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<SharedRuntime> {
        self.links.read().await.get(id).map(|entry| entry.runtime.clone())
    }

    async fn require(&self, id: &str) -> Result<SharedRuntime, LinkError> {
        self.get(id)
            .await
            .ok_or_else(|| LinkError::NotFound(format!("link `{}`", id)))
    }

    async fn is_attached(&self, id: &str, runtime: &SharedRuntime) -> bool {
        self.links
            .read()
            .await
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(&current.runtime, runtime))
    }

    async fn save(&self, runtime: &mut LinkRuntime) {
        let result = self
            .store
            .save_definition(runtime.id(), runtime.definition())
            .await;
        if let Err(e) = &result {
            error!("Could not save link `{}`: {}", runtime.id(), e);
        }
        runtime.mark_saved(result.is_ok());
    }

    /// Enable a link and make it due immediately
    pub async fn enable(&self, id: &str, now: DateTime<Utc>) -> Result<(), LinkError> {
        let runtime = self.require(id).await?;
        let mut runtime = runtime.lock().await;
        runtime.set_enabled(true, now);
        self.save(&mut runtime).await;
        info!("Link `{}` enabled", id);
        Ok(())
    }

    /// Disable a link and drive its dial to 0.
    ///
    /// The link stays disabled even if the dial cannot be reached; that dial
    /// error is handed back and recorded as the link's last error.
    pub async fn disable(&self, id: &str) -> Result<Option<LinkError>, LinkError> {
        let runtime = self.require(id).await?;
        let mut runtime = runtime.lock().await;
        runtime.set_enabled(false, Utc::now());
        self.save(&mut runtime).await;
        info!("Link `{}` disabled", id);

        Ok(runtime.drive_to(0).await.err())
    }

    /// Validate and store a new link file, then start running it
    pub async fn create(&self, name: &str, contents: &str) -> Result<String, LinkError> {
        let id = sanitize_link_name(name)?;
        if self.get(&id).await.is_some() || self.store.exists(&id).await {
            return Err(LinkError::Config(format!("link `{}` already exists", id)));
        }

        let definition = LinkDefinition::from_toml(contents)?;
        let runtime = self.runtime_for(&id, definition)?;
        self.store.write(&id, contents).await?;

        self.links
            .write()
            .await
            .insert(id.clone(), LinkEntry::new(runtime));
        info!("Link `{}` created", id);
        Ok(id)
    }

    /// Replace a link file. The link restarts with fresh runtime state.
    pub async fn update(&self, id: &str, contents: &str) -> Result<(), LinkError> {
        self.require(id).await?;

        let definition = LinkDefinition::from_toml(contents)?;
        let runtime = self.runtime_for(id, definition)?;
        self.store.write(id, contents).await?;

        self.links
            .write()
            .await
            .insert(id.to_string(), LinkEntry::new(runtime));
        info!("Link `{}` updated", id);
        Ok(())
    }

    /// Stop a link and remove its file
    pub async fn delete(&self, id: &str) -> Result<(), LinkError> {
        if self.links.write().await.remove(id).is_none() {
            return Err(LinkError::NotFound(format!("link `{}`", id)));
        }
        self.store.delete(id).await?;
        info!("Link `{}` deleted", id);
        Ok(())
    }

    /// Definition as currently held by the runtime
    pub async fn contents(&self, id: &str) -> Result<LinkDefinition, LinkError> {
        let runtime = self.require(id).await?;
        let definition = runtime.lock().await.definition().clone();
        Ok(definition)
    }

    /// Raw link file contents
    pub async fn raw_contents(&self, id: &str) -> Result<String, LinkError> {
        self.require(id).await?;
        self.store.read(id).await
    }

    /// Latest status of one link, as of its last state change
    pub async fn status(&self, id: &str) -> Result<LinkStatus, LinkError> {
        self.links
            .read()
            .await
            .get(id)
            .map(LinkEntry::status)
            .ok_or_else(|| LinkError::NotFound(format!("link `{}`", id)))
    }

    pub async fn statuses(&self) -> Vec<LinkStatus> {
        self.links.read().await.values().map(LinkEntry::status).collect()
    }

    /// Claim every enabled link that is due at `now` and not already running.
    ///
    /// A link whose previous cycle still holds its lock is skipped, which
    /// keeps at most one cycle in flight per link.
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Vec<DueLink> {
        let links = self.links.read().await;
        let mut due = Vec::new();

        for (id, entry) in links.iter() {
            let runtime = &entry.runtime;
            let Ok(guard) = runtime.clone().try_lock_owned() else {
                debug!("Link `{}` still running, skipping", id);
                continue;
            };
            if guard.is_enabled() && guard.is_due(now) {
                due.push(DueLink {
                    id: id.clone(),
                    runtime: runtime.clone(),
                    guard,
                });
            }
        }
        due
    }

    /// Run a claimed cycle.
    ///
    /// The definition is saved afterwards only when an earlier save failed
    /// and the runtime is still the one registered under its id.
    pub async fn run_claimed(&self, due: DueLink, now: DateTime<Utc>) -> Result<CycleReport, LinkError> {
        let DueLink {
            id,
            runtime,
            mut guard,
        } = due;

        let result = guard.run_cycle(now).await;
        match &result {
            Ok(report) => {
                debug!("Link `{}` cycle complete: {}%", id, report.final_value);
                if guard.is_unsaved() && self.is_attached(&id, &runtime).await {
                    self.save(&mut guard).await;
                }
            }
            Err(e) => warn!("Link `{}` cycle failed: {}", id, e),
        }
        result
    }

    /// Claim and run one cycle for `id` right away, if it is due
    pub async fn run_if_due(&self, id: &str, now: DateTime<Utc>) -> Option<Result<CycleReport, LinkError>> {
        let runtime = self.get(id).await?;
        let guard = runtime.clone().try_lock_owned().ok()?;
        if !guard.is_enabled() || !guard.is_due(now) {
            return None;
        }
        let due = DueLink {
            id: id.to_string(),
            runtime,
            guard,
        };
        Some(self.run_claimed(due, now).await)
    }
}
