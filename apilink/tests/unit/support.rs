//! In-process fake dial server and data source

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apilink::link::LinkManager;
use apilink::storage::images::ImageStore;
use apilink::storage::layout::StorageLayout;
use apilink::storage::links::TomlLinkStore;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialCall {
    Value { uid: String, value: i64 },
    Backlight { uid: String, rgb: (u8, u8, u8) },
    Image { uid: String, has_file: bool },
}

#[derive(Debug, Clone)]
struct Source {
    status: u16,
    body: String,
    delay: Duration,
    hits: usize,
}

pub struct FakeState {
    sources: Mutex<HashMap<String, Source>>,
    calls: Mutex<Vec<DialCall>>,
    pub value_status: AtomicU16,
    pub backlight_status: AtomicU16,
    pub image_status: AtomicU16,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            value_status: AtomicU16::new(200),
            backlight_status: AtomicU16::new(201),
            image_status: AtomicU16::new(201),
        }
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/source/{name}", get(source))
            .route("/api/v0/dial/{uid}/set", get(set_value))
            .route("/api/v0/dial/{uid}/backlight", get(set_backlight))
            .route("/api/v0/dial/{uid}/image/set", post(set_image))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn source_url(&self, name: &str) -> String {
        format!("http://{}/source/{}", self.addr, name)
    }

    pub fn set_source(&self, name: &str, body: Value) {
        self.set_source_raw(name, 200, &body.to_string(), Duration::ZERO);
    }

    pub fn set_source_raw(&self, name: &str, status: u16, body: &str, delay: Duration) {
        let mut sources = self.state.sources.lock().unwrap();
        let hits = sources.get(name).map(|s| s.hits).unwrap_or(0);
        sources.insert(
            name.to_string(),
            Source {
                status,
                body: body.to_string(),
                delay,
                hits,
            },
        );
    }

    pub fn source_hits(&self, name: &str) -> usize {
        self.state
            .sources
            .lock()
            .unwrap()
            .get(name)
            .map(|s| s.hits)
            .unwrap_or(0)
    }

    pub fn set_statuses(&self, value: u16, backlight: u16, image: u16) {
        self.state.value_status.store(value, Ordering::SeqCst);
        self.state.backlight_status.store(backlight, Ordering::SeqCst);
        self.state.image_status.store(image, Ordering::SeqCst);
    }

    pub fn dial_calls(&self) -> Vec<DialCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn take_dial_calls(&self) -> Vec<DialCall> {
        std::mem::take(&mut *self.state.calls.lock().unwrap())
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn source(State(state): State<Arc<FakeState>>, Path(name): Path<String>) -> (StatusCode, String) {
    let source = {
        let mut sources = state.sources.lock().unwrap();
        match sources.get_mut(&name) {
            Some(source) => {
                source.hits += 1;
                source.clone()
            }
            None => return (StatusCode::NOT_FOUND, "{}".to_string()),
        }
    };
    if !source.delay.is_zero() {
        tokio::time::sleep(source.delay).await;
    }
    (StatusCode::from_u16(source.status).unwrap(), source.body)
}

fn status(code: &AtomicU16) -> StatusCode {
    StatusCode::from_u16(code.load(Ordering::SeqCst)).unwrap()
}

async fn set_value(
    State(state): State<Arc<FakeState>>,
    Path(uid): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    let value = query["value"].parse().unwrap();
    state.calls.lock().unwrap().push(DialCall::Value { uid, value });
    status(&state.value_status)
}

async fn set_backlight(
    State(state): State<Arc<FakeState>>,
    Path(uid): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    let rgb = (
        query["red"].parse().unwrap(),
        query["green"].parse().unwrap(),
        query["blue"].parse().unwrap(),
    );
    state.calls.lock().unwrap().push(DialCall::Backlight { uid, rgb });
    status(&state.backlight_status)
}

async fn set_image(
    State(state): State<Arc<FakeState>>,
    Path(uid): Path<String>,
    body: Bytes,
) -> StatusCode {
    let text = String::from_utf8_lossy(&body);
    let has_file = text.contains("name=\"imgfile\"") && text.contains("name=\"key\"");
    state.calls.lock().unwrap().push(DialCall::Image { uid, has_file });
    status(&state.image_status)
}

/// Link file contents pointing at the fake server
pub struct LinkSpec<'a> {
    pub name: &'a str,
    pub source: &'a str,
    pub uid: &'a str,
    pub item: &'a str,
    pub update_period: u64,
    pub modifiers: &'a str,
    pub image: Option<&'a str>,
    pub backlight: &'a str,
}

impl<'a> LinkSpec<'a> {
    pub fn new(name: &'a str, source: &'a str, uid: &'a str) -> Self {
        Self {
            name,
            source,
            uid,
            item: "data.level",
            update_period: 60,
            modifiers: "",
            image: None,
            backlight: "",
        }
    }

    pub fn render(&self, server: &FakeServer) -> String {
        let image = self
            .image
            .map(|i| format!("image = \"{}\"\n", i))
            .unwrap_or_default();
        let modifiers = if self.modifiers.is_empty() {
            String::new()
        } else {
            format!("value_modifiers = [{}]\n", self.modifiers)
        };
        let backlight = if self.backlight.is_empty() {
            String::new()
        } else {
            format!("\n[backlight_map]\n{}\n", self.backlight)
        };
        format!(
            "[info]\nname = \"{name}\"\n{image}\n[api]\nurl = \"{url}\"\nitem = \"{item}\"\nupdate_period = {period}\n{modifiers}\n[dial]\nuid = \"{uid}\"\nhost = \"127.0.0.1\"\nport = {port}\napi_key = \"test-key\"\n{backlight}",
            name = self.name,
            image = image,
            url = server.source_url(self.source),
            item = self.item,
            period = self.update_period,
            modifiers = modifiers,
            uid = self.uid,
            port = server.port(),
            backlight = backlight,
        )
    }
}

/// A manager over a fresh temporary data directory
pub struct Harness {
    /// Removed on drop, so it has to live as long as the harness
    _dir: TempDir,
    pub layout: StorageLayout,
    pub manager: Arc<LinkManager>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();
        let manager = Arc::new(LinkManager::new(
            Arc::new(TomlLinkStore::new(layout.links_dir())),
            ImageStore::new(layout.images_dir()),
            reqwest::Client::new(),
            Duration::from_secs(5),
        ));
        Self {
            _dir: dir,
            layout,
            manager,
        }
    }

    pub fn write_link_file(&self, id: &str, contents: &str) {
        std::fs::write(self.layout.links_dir().path().join(id), contents).unwrap();
    }

    pub fn read_link_file(&self, id: &str) -> Option<String> {
        std::fs::read_to_string(self.layout.links_dir().path().join(id)).ok()
    }

    pub fn write_image(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.layout.images_dir().path().join(name), bytes).unwrap();
    }
}
