//! Per-link runtime
//!
//! Owns one link definition plus everything that changes while it runs:
//! the last fetched value, what the dial has acknowledged, and when the link
//! is next due.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dial::{DialState, DialSyncClient, SyncReport, SyncRequest};
use crate::errors::LinkError;
use crate::models::link::LinkDefinition;
use crate::storage::images::ImageStore;
use crate::transform::{EvalContext, TransformChain, TransformValue};

/// Mutable state of a running link
#[derive(Debug, Clone)]
pub struct LinkRuntimeState {
    pub raw_value: Option<TransformValue>,
    pub final_value: Option<i64>,
    pub dial: DialState,
    pub next_due_time: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl LinkRuntimeState {
    fn new(has_image: bool) -> Self {
        Self {
            raw_value: None,
            final_value: None,
            dial: DialState {
                pending_image_upload: has_image,
                ..Default::default()
            },
            next_due_time: DateTime::<Utc>::MIN_UTC,
            last_error: None,
            last_success_time: None,
            consecutive_failures: 0,
        }
    }
}

/// Result of a successful cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub raw_value: String,
    pub final_value: i64,
    pub stopped_at: Option<String>,
    pub sync: SyncReport,
    pub next_due_time: DateTime<Utc>,
}

/// Status snapshot served by the management API
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStatus {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub dial_uid: String,
    pub update_period_seconds: u64,
    pub raw_value: Option<String>,
    pub final_value: Option<i64>,
    pub committed_percent: Option<i64>,
    pub pending_image_upload: bool,
    pub next_due_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

pub struct LinkRuntime {
    id: String,
    definition: LinkDefinition,
    chain: TransformChain,
    http: Client,
    request_timeout: Duration,
    dial: DialSyncClient,
    images: ImageStore,
    state: LinkRuntimeState,

    /// Latest status, readable without locking the runtime
    status: watch::Sender<LinkStatus>,

    /// The definition changed in memory but the last save did not land
    unsaved: bool,
}

impl LinkRuntime {
    pub fn new(
        id: impl Into<String>,
        definition: LinkDefinition,
        http: Client,
        images: ImageStore,
        request_timeout: Duration,
    ) -> Result<Self, LinkError> {
        definition.validate()?;
        let dial = DialSyncClient::new(
            http.clone(),
            definition.dial_target.clone(),
            request_timeout,
        )?;
        let chain = TransformChain::new(definition.source.transform_steps.clone());
        let state = LinkRuntimeState::new(definition.info.image.is_some());

        let runtime = Self {
            id: id.into(),
            definition,
            chain,
            http,
            request_timeout,
            dial,
            images,
            state,
            status: watch::Sender::new(LinkStatus::default()),
            unsaved: false,
        };
        runtime.publish();
        Ok(runtime)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition(&self) -> &LinkDefinition {
        &self.definition
    }

    pub fn state(&self) -> &LinkRuntimeState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.definition.is_enabled()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.state.next_due_time
    }

    pub fn next_due_time(&self) -> DateTime<Utc> {
        self.state.next_due_time
    }

    pub fn set_next_due_time(&mut self, at: DateTime<Utc>) {
        self.state.next_due_time = at;
        self.publish();
    }

    pub fn is_unsaved(&self) -> bool {
        self.unsaved
    }

    pub fn mark_saved(&mut self, saved: bool) {
        self.unsaved = !saved;
    }

    /// Flip the enabled flag. Enabling makes the link due at `now`.
    pub fn set_enabled(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.definition.info.enabled = enabled;
        self.unsaved = true;
        if enabled {
            self.state.next_due_time = now;
        }
        self.publish();
    }

    /// Fetch, extract, transform and push to the dial.
    ///
    /// `next_due_time` only advances when every step succeeds, so a failed
    /// link is retried on the next scheduler tick.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, LinkError> {
        debug!("Running cycle for link `{}`", self.id);

        let result = self.cycle(now).await;
        match &result {
            Ok(_) => {
                self.state.last_error = None;
                self.state.last_success_time = Some(now);
                self.state.consecutive_failures = 0;
            }
            Err(e) => {
                self.state.last_error = Some(e.to_string());
                self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
            }
        }
        self.publish();
        result
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, LinkError> {
        let document = self.fetch().await?;
        let raw = self.definition.source.field_path.extract(&document)?;
        self.state.raw_value = Some(raw.clone());

        let ctx = EvalContext::at(now.with_timezone(&Local));
        let output = self.chain.evaluate(raw.clone(), &ctx);
        self.state.final_value = Some(output.value);

        let request = SyncRequest {
            percent: output.value,
            backlight_map: self.definition.backlight_map.as_ref(),
            image: self.definition.info.image.as_deref(),
        };
        let sync = self.dial.sync(request, &mut self.state.dial, &self.images).await?;

        self.state.next_due_time = i64::try_from(self.definition.source.update_period_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|period| now.checked_add_signed(period))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        debug!(
            "Link `{}`: {} -> {}% ({} dial requests), next update at {}",
            self.id,
            raw,
            output.value,
            sync.requests(),
            self.state.next_due_time
        );

        Ok(CycleReport {
            raw_value: raw.to_string(),
            final_value: output.value,
            stopped_at: output.stopped_at,
            sync,
            next_due_time: self.state.next_due_time,
        })
    }

    async fn fetch(&self) -> Result<Value, LinkError> {
        let source = &self.definition.source;
        let mut request = self.http.get(&source.url).timeout(self.request_timeout);
        for (name, value) in &source.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| LinkError::Fetch(format!("{}: {}", source.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::Fetch(format!("{} answered {}", source.url, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LinkError::Fetch(format!("{}: {}", source.url, e)))?;

        serde_json::from_slice(&body)
            .map_err(|e| LinkError::JsonParse(format!("{}: {}", source.url, e)))
    }

    /// Drive the dial straight to `percent`, bypassing the source.
    ///
    /// Used when a link is disabled so the needle does not keep showing a
    /// stale reading. A failure is kept as the link's last error.
    pub async fn drive_to(&mut self, percent: i64) -> Result<SyncReport, LinkError> {
        let request = SyncRequest {
            percent,
            backlight_map: self.definition.backlight_map.as_ref(),
            image: None,
        };
        let pending_image = self.state.dial.pending_image_upload;
        self.state.dial.pending_image_upload = false;
        let result = self.dial.sync(request, &mut self.state.dial, &self.images).await;
        self.state.dial.pending_image_upload = pending_image;

        match &result {
            Ok(_) => info!("Dial `{}` driven to {}%", self.definition.dial_target.uid, percent),
            Err(e) => {
                warn!("Could not drive dial `{}` to {}%: {}", self.definition.dial_target.uid, percent, e);
                self.state.last_error = Some(e.to_string());
            }
        }
        self.publish();
        result
    }

    /// Receiver that always holds the latest status
    pub fn status_feed(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    fn publish(&self) {
        self.status.send_replace(self.status());
    }

    pub fn status(&self) -> LinkStatus {
        let info = &self.definition.info;
        LinkStatus {
            id: self.id.clone(),
            name: info.name.clone(),
            description: info.description.clone(),
            enabled: info.enabled,
            dial_uid: self.definition.dial_target.uid.clone(),
            update_period_seconds: self.definition.source.update_period_seconds,
            raw_value: self.state.raw_value.as_ref().map(|v| v.to_string()),
            final_value: self.state.final_value,
            committed_percent: self.state.dial.committed_percent,
            pending_image_upload: self.state.dial.pending_image_upload,
            next_due_time: (self.state.next_due_time != DateTime::<Utc>::MIN_UTC)
                .then_some(self.state.next_due_time),
            last_success_time: self.state.last_success_time,
            last_error: self.state.last_error.clone(),
            consecutive_failures: self.state.consecutive_failures,
        }
    }
}
