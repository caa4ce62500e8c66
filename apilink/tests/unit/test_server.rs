//! Management HTTP routes

use std::sync::Arc;

use apilink::app::options::ServerOptions;
use apilink::server::handlers::ApiResponse;
use apilink::server::serve::serve;
use apilink::server::state::ServerState;
use chrono::Utc;
use serde_json::json;
use tokio::sync::oneshot;

use crate::support::{FakeServer, Harness, LinkSpec};

struct Management {
    base: String,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Management {
    async fn start(harness: &Harness) -> Self {
        let options = ServerOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let state = Arc::new(ServerState::new(
            "test".to_string(),
            harness.manager.clone(),
            Utc::now(),
        ));
        let (tx, rx) = oneshot::channel::<()>();
        let (addr, _handle) = serve(&options, state, async move {
            let _ = rx.await;
        })
        .await
        .unwrap();

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            shutdown: Some(tx),
        }
    }

    async fn get(&self, path: &str) -> (u16, ApiResponse) {
        let response = self.client.get(format!("{}{}", self.base, path)).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> (u16, ApiResponse) {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

impl Drop for Management {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_server_status_and_time() {
    let harness = Harness::new().await;
    let api = Management::start(&harness).await;

    let (code, body) = api.get("/api/v0/server/status").await;
    assert_eq!(code, 200);
    assert_eq!(body.status, "ok");
    assert_eq!(body.data.unwrap()["version"], "test");

    let (_, body) = api.get("/api/v0/time/unix").await;
    let server_time = body.data.unwrap().as_f64().unwrap();
    assert!((server_time - Utc::now().timestamp() as f64).abs() < 5.0);
}

#[tokio::test]
async fn test_link_write_read_and_list() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    let api = Management::start(&harness).await;
    let contents = LinkSpec::new("Weather", "w", "D1").render(&server);

    let (code, body) = api
        .post(
            "/api/v0/link/write",
            json!({"link_filename": "Weather Station", "link_contents": contents}),
        )
        .await;
    assert_eq!(code, 200, "{}", body.message);
    assert_eq!(body.data, Some(json!("weather_station.toml")));

    let (_, body) = api.get("/api/v0/link/list").await;
    assert_eq!(body.data, Some(json!(["weather_station.toml"])));

    let (_, body) = api.get("/api/v0/link/read?link=weather_station.toml&type=toml").await;
    assert_eq!(body.data, Some(json!(contents)));

    let (_, body) = api.get("/api/v0/link/read?link=weather_station.toml").await;
    let data = body.data.unwrap();
    assert_eq!(data["info"]["name"], "Weather");
    assert_eq!(data["api"]["item"], "data.level");

    let (_, body) = api.get("/api/v0/link/status").await;
    let statuses = body.data.unwrap();
    assert_eq!(statuses.as_array().unwrap().len(), 1);
    assert_eq!(statuses[0]["enabled"], true);
}

#[tokio::test]
async fn test_link_errors_use_fail_envelope() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    let api = Management::start(&harness).await;

    let (code, body) = api.get("/api/v0/link/read?link=missing.toml").await;
    assert_eq!(code, 404);
    assert_eq!(body.status, "fail");

    let (code, body) = api.get("/api/v0/link/enable").await;
    assert_eq!(code, 400);
    assert_eq!(body.status, "fail");

    let (code, _) = api
        .post(
            "/api/v0/link/write",
            json!({"link_filename": "x", "link_contents": "[info]"}),
        )
        .await;
    assert_eq!(code, 400);

    let contents = LinkSpec::new("Weather", "w", "D1").render(&server);
    let (code, _) = api
        .post(
            "/api/v0/link/update",
            json!({"link_filename": "weather.toml", "link_contents": contents}),
        )
        .await;
    assert_eq!(code, 404);
}

#[tokio::test]
async fn test_enable_disable_delete_and_reload() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    let api = Management::start(&harness).await;
    harness.write_link_file("gauge.toml", &LinkSpec::new("Gauge", "g", "D1").render(&server));

    let (_, body) = api.get("/api/v0/link/reload").await;
    assert_eq!(body.data, Some(json!(1)));

    let (code, _) = api.get("/api/v0/link/disable?link=gauge.toml").await;
    assert_eq!(code, 200);
    let (_, body) = api.get("/api/v0/link/status?link=gauge.toml").await;
    assert_eq!(body.data.unwrap()["enabled"], false);

    let (code, _) = api.get("/api/v0/link/enable?link=gauge.toml").await;
    assert_eq!(code, 200);
    let (_, body) = api.get("/api/v0/link/status?link=gauge.toml").await;
    assert_eq!(body.data.unwrap()["enabled"], true);

    let (code, _) = api.get("/api/v0/link/delete?link=gauge.toml").await;
    assert_eq!(code, 200);
    assert!(harness.read_link_file("gauge.toml").is_none());
}

#[tokio::test]
async fn test_image_list() {
    let harness = Harness::new().await;
    harness.write_image("b.png", b"png");
    harness.write_image("a.PNG", b"png");
    harness.write_image("notes.txt", b"txt");
    let api = Management::start(&harness).await;

    let (_, body) = api.get("/api/v0/image/list").await;
    assert_eq!(body.data, Some(json!(["a.PNG", "b.png"])));
}
