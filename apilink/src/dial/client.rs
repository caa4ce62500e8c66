//! Dial HTTP driver
//!
//! Converges one dial to a target in three ordered phases (value, backlight,
//! image) and stops at the first failing phase.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use crate::errors::LinkError;
use crate::filesys::file::File;
use crate::models::link::{BacklightMap, DialTarget, Rgb};
use crate::storage::images::ImageStore;

/// Dial side of a link's runtime state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DialState {
    /// Last percent the dial acknowledged, `None` until the first push
    pub committed_percent: Option<i64>,

    /// The configured face image still has to be pushed
    pub pending_image_upload: bool,

    /// Last backlight color the dial acknowledged
    pub current_backlight: Rgb,
}

/// What the dial should show after a sync
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub percent: i64,
    pub backlight_map: Option<&'a BacklightMap>,
    pub image: Option<&'a str>,
}

/// Outcome of one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// No request was made
    #[default]
    Skipped,
    /// The dial changed
    Applied,
    /// The dial reported it was already in that state
    AlreadyCurrent,
}

impl PhaseOutcome {
    pub fn attempted(&self) -> bool {
        !matches!(self, PhaseOutcome::Skipped)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub value: PhaseOutcome,
    pub backlight: PhaseOutcome,
    pub image: PhaseOutcome,
}

impl SyncReport {
    /// Number of dial requests this sync made
    pub fn requests(&self) -> usize {
        [self.value, self.backlight, self.image]
            .iter()
            .filter(|phase| phase.attempted())
            .count()
    }
}

/// HTTP driver for one dial
#[derive(Debug, Clone)]
pub struct DialSyncClient {
    http: Client,
    target: DialTarget,
    base_url: Url,
    timeout: Duration,
}

impl DialSyncClient {
    pub fn new(http: Client, target: DialTarget, timeout: Duration) -> Result<Self, LinkError> {
        let mut base_url = Url::parse(&format!("http://{}:{}/", target.host, target.port))
            .map_err(|e| {
                LinkError::ConfigValidation(format!(
                    "dial address {}:{} is invalid: {}",
                    target.host, target.port, e
                ))
            })?;
        base_url
            .path_segments_mut()
            .map_err(|_| LinkError::ConfigValidation("dial address cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["api", "v0", "dial", target.uid.as_str()]);

        Ok(Self {
            http,
            target,
            base_url,
            timeout,
        })
    }

    pub fn target(&self) -> &DialTarget {
        &self.target
    }

    /// Bring the dial to `request`, updating `state` as each phase succeeds.
    ///
    /// - value: skipped when `percent` is already committed, needs 200
    /// - backlight: only after a value push and with a map, needs 200 or 201
    /// - image: only while an upload is pending, needs 200 or 201
    pub async fn sync(
        &self,
        request: SyncRequest<'_>,
        state: &mut DialState,
        images: &ImageStore,
    ) -> Result<SyncReport, LinkError> {
        let mut report = SyncReport::default();

        if state.committed_percent != Some(request.percent) {
            self.set_value(request.percent).await?;
            state.committed_percent = Some(request.percent);
            report.value = PhaseOutcome::Applied;

            if let Some(map) = request.backlight_map {
                let color = map.resolve(request.percent, state.current_backlight);
                report.backlight = self.set_backlight(color).await?;
                state.current_backlight = color;
            }
        } else {
            debug!(
                "Dial `{}` already at {}%, skipping value push",
                self.target.uid, request.percent
            );
        }

        if state.pending_image_upload {
            let Some(name) = request.image else {
                state.pending_image_upload = false;
                return Ok(report);
            };
            let Some(file) = images.resolve(name).await else {
                state.pending_image_upload = false;
                let err = LinkError::ImageMissing(format!(
                    "`{}` is not in {}",
                    name,
                    images.dir().path().display()
                ));
                error!("Dial `{}`: {}", self.target.uid, err);
                return Err(err);
            };
            report.image = self.set_image(name, &file).await?;
            state.pending_image_upload = false;
        }

        Ok(report)
    }

    fn endpoint(&self, path: &[&str], params: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(path);
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.target.api_key);
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        url
    }

    async fn set_value(&self, percent: i64) -> Result<(), LinkError> {
        let url = self.endpoint(&["set"], &[("value", percent.to_string())]);
        let status = self.send(self.http.get(url), "value").await?;

        if status == StatusCode::OK {
            debug!("Dial `{}` updated to {}%", self.target.uid, percent);
            return Ok(());
        }
        Err(self.rejected("value", status))
    }

    async fn set_backlight(&self, color: Rgb) -> Result<PhaseOutcome, LinkError> {
        let url = self.endpoint(
            &["backlight"],
            &[
                ("red", color.red.to_string()),
                ("green", color.green.to_string()),
                ("blue", color.blue.to_string()),
            ],
        );
        let status = self.send(self.http.get(url), "backlight").await?;

        match status {
            StatusCode::CREATED => {
                debug!("Dial `{}` backlight updated to {}", self.target.uid, color);
                Ok(PhaseOutcome::Applied)
            }
            StatusCode::OK => {
                debug!("Dial `{}` backlight already at {}", self.target.uid, color);
                Ok(PhaseOutcome::AlreadyCurrent)
            }
            _ => Err(self.rejected("backlight", status)),
        }
    }

    async fn set_image(&self, name: &str, file: &File) -> Result<PhaseOutcome, LinkError> {
        let bytes = file.read_bytes().await.map_err(|e| {
            LinkError::DialUpdate(format!("image: cannot read {}: {}", file.path().display(), e))
        })?;
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")
            .map_err(|e| LinkError::DialUpdate(format!("image: {}", e)))?;
        let form = Form::new()
            .part("imgfile", part)
            .text("key", self.target.api_key.clone());

        let url = self.endpoint(&["image", "set"], &[]);
        let status = self.send(self.http.post(url).multipart(form), "image").await?;

        match status {
            StatusCode::CREATED => {
                debug!("Dial `{}` image updated to `{}`", self.target.uid, name);
                Ok(PhaseOutcome::Applied)
            }
            StatusCode::OK => {
                debug!("Dial `{}` already shows `{}`", self.target.uid, name);
                Ok(PhaseOutcome::AlreadyCurrent)
            }
            _ => Err(self.rejected("image", status)),
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        phase: &str,
    ) -> Result<StatusCode, LinkError> {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            // reqwest errors carry the URL, which includes the api key
            let err = LinkError::DialUpdate(format!(
                "{}: dial `{}` unreachable: {}",
                phase,
                self.target.uid,
                e.without_url()
            ));
            error!("{}", err);
            err
        })?;
        Ok(response.status())
    }

    fn rejected(&self, phase: &str, status: StatusCode) -> LinkError {
        let err = LinkError::DialUpdate(format!(
            "{}: dial `{}` answered {}",
            phase, self.target.uid, status
        ));
        error!("{}", err);
        err
    }
}
