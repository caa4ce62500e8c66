//! HTTP request handlers
//!
//! Every route answers with the same envelope:
//! `{"status": "ok" | "fail", "message": "...", "data": ...}`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::LinkError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            data,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail".to_string(),
            message: message.into(),
            data: None,
        }
    }
}

type Reply = Result<(String, Option<Value>), LinkError>;

fn respond(reply: Reply) -> (StatusCode, Json<ApiResponse>) {
    match reply {
        Ok((message, data)) => (StatusCode::OK, Json(ApiResponse::ok(message, data))),
        Err(e) => {
            let status = match &e {
                LinkError::NotFound(_) => StatusCode::NOT_FOUND,
                LinkError::ConfigValidation(_) | LinkError::Config(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Management request failed: {}", e);
            (status, Json(ApiResponse::fail(e.to_string())))
        }
    }
}

/// `?link=<id>&type=<toml>`
#[derive(Debug, Default, Deserialize)]
pub struct LinkQuery {
    pub link: Option<String>,

    #[serde(rename = "type")]
    pub format: Option<String>,
}

impl LinkQuery {
    fn link(&self) -> Result<&str, LinkError> {
        self.link
            .as_deref()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| LinkError::Config("missing `link` parameter".to_string()))
    }
}

/// Body of link write and update
#[derive(Debug, Deserialize)]
pub struct LinkFileRequest {
    pub link_filename: String,
    pub link_contents: String,
}

/// Service version and uptime
pub async fn server_status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    let links = state.manager.ids().await.len();

    respond(Ok((
        "API link service is running".to_string(),
        Some(json!({
            "version": state.version,
            "git_hash": version.git_hash,
            "build_time": version.build_time,
            "started_at": state.started_at,
            "uptime_secs": uptime,
            "links": links,
        })),
    )))
}

pub async fn list_links_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let ids = state.manager.ids().await;
    respond(Ok((format!("{} link(s)", ids.len()), Some(json!(ids)))))
}

pub async fn reload_links_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let reply = state
        .manager
        .reload_all()
        .await
        .map(|count| (format!("Reloaded {} link(s)", count), Some(json!(count))));
    respond(reply)
}

pub async fn enable_link_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    let reply: Reply = async {
        let id = query.link()?;
        state.manager.enable(id, Utc::now()).await?;
        Ok((format!("Link `{}` enabled", id), None))
    }
    .await;
    respond(reply)
}

pub async fn disable_link_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    let reply: Reply = async {
        let id = query.link()?;
        let message = match state.manager.disable(id).await? {
            None => format!("Link `{}` disabled", id),
            Some(e) => format!("Link `{}` disabled, dial not reset: {}", id, e),
        };
        Ok((message, None))
    }
    .await;
    respond(reply)
}

pub async fn delete_link_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    let reply: Reply = async {
        let id = query.link()?;
        state.manager.delete(id).await?;
        Ok((format!("Link `{}` deleted", id), None))
    }
    .await;
    respond(reply)
}

/// Link contents, structured by default or raw with `type=toml`
pub async fn read_link_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    let reply: Reply = async {
        let id = query.link()?;
        let data = match query.format.as_deref() {
            Some("toml") => Value::String(state.manager.raw_contents(id).await?),
            Some(other) => {
                return Err(LinkError::Config(format!("unsupported type `{}`", other)));
            }
            None => serde_json::to_value(state.manager.contents(id).await?)?,
        };
        Ok((format!("Link `{}`", id), Some(data)))
    }
    .await;
    respond(reply)
}

pub async fn write_link_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<LinkFileRequest>,
) -> impl IntoResponse {
    let reply = state
        .manager
        .create(&request.link_filename, &request.link_contents)
        .await
        .map(|id| (format!("Link `{}` created", id), Some(json!(id))));
    respond(reply)
}

pub async fn update_link_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<LinkFileRequest>,
) -> impl IntoResponse {
    let reply = state
        .manager
        .update(&request.link_filename, &request.link_contents)
        .await
        .map(|_| (format!("Link `{}` updated", request.link_filename), None));
    respond(reply)
}

/// Status of one link with `?link=`, otherwise of every link
pub async fn link_status_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    let reply: Reply = async {
        match query.link.as_deref() {
            Some(id) => {
                let status = state.manager.status(id).await?;
                Ok((format!("Link `{}`", id), Some(serde_json::to_value(status)?)))
            }
            None => {
                let statuses = state.manager.statuses().await;
                Ok((
                    format!("{} link(s)", statuses.len()),
                    Some(serde_json::to_value(statuses)?),
                ))
            }
        }
    }
    .await;
    respond(reply)
}

pub async fn list_images_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let reply = state
        .manager
        .images()
        .list()
        .await
        .map(|names| (format!("{} image(s)", names.len()), Some(json!(names))));
    respond(reply)
}

pub async fn unix_time_handler() -> impl IntoResponse {
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    respond(Ok(("Server unix time".to_string(), Some(json!(now)))))
}
