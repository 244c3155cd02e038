// Shared fixtures: a scripted upstream, a recording core and a recording UI.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::net::TcpListener;

use rom_boot_engine::config::LaunchConfig;
use rom_boot_engine::engine::cache::{ContentCache, DiskCache};
use rom_boot_engine::engine::emulator::{Button, CoreEventSink, EmulatorCore};
use rom_boot_engine::engine::progress::{ErrorDisplay, LoadingIndicator};
use rom_boot_engine::engine::session::EmulatorSession;
use rom_boot_engine::source::http_source::HttpSource;

/// Deterministic non-HTML payload.
pub fn rom_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Payload carrying a GBA header, accepted by the headless core.
pub fn gba_rom(len: usize) -> Vec<u8> {
    let mut data = rom_bytes(len);
    data[0xB2] = 0x96;
    data
}

/// How the upstream answers `GET /data/{name}`.
#[derive(Clone)]
pub enum Upstream {
    /// 200 with `Content-Length`.
    Sized(Vec<u8>),
    /// 200 with a chunked body and no size.
    Unsized(Vec<u8>),
    /// Bare status code with a short text body.
    Status(StatusCode),
    /// Advertises `advertised` bytes, sends `sent`, then aborts.
    Broken { advertised: u64, sent: Vec<u8> },
}

#[derive(Clone)]
struct UpstreamState {
    behavior: Upstream,
    hits: Arc<AtomicUsize>,
}

pub struct TestUpstream {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl TestUpstream {
    pub async fn start(behavior: Upstream) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = UpstreamState {
            behavior,
            hits: hits.clone(),
        };
        let app = Router::new()
            .route("/data/{name}", get(rom_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self {
            base_url: format!("http://{}/", addr),
            hits,
        }
    }

    /// Number of ROM requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn rom_handler(State(state): State<UpstreamState>, Path(_name): Path<String>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match state.behavior {
        Upstream::Sized(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (header::CONTENT_LENGTH, body.len().to_string()),
            ],
            body,
        )
            .into_response(),
        Upstream::Unsized(body) => {
            let chunks = vec![Ok::<_, std::io::Error>(Bytes::from(body))];
            (
                StatusCode::OK,
                Body::from_stream(futures::stream::iter(chunks)),
            )
                .into_response()
        }
        Upstream::Status(status) => (status, "nope").into_response(),
        Upstream::Broken { advertised, sent } => {
            let chunks = vec![
                Ok(Bytes::from(sent)),
                Err(std::io::Error::other("upstream reset")),
            ];
            (
                StatusCode::OK,
                [(header::CONTENT_LENGTH, advertised.to_string())],
                Body::from_stream(futures::stream::iter(chunks)),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreCall {
    Configure,
    InitFilesystem,
    ListSaves,
    WriteFile { path: String, len: usize },
    LoadGame(String),
    SyncFilesystem,
    AddCallbacks,
    Press(Button),
    Unpress(Button),
}

/// Core fake that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingCore {
    calls: Mutex<Vec<CoreCall>>,
    settings: Mutex<Map<String, Value>>,
    sink: Mutex<Option<CoreEventSink>>,
    fail_write: Option<String>,
    fail_load: Option<String>,
    syncs: AtomicUsize,
}

impl RecordingCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_write(mut self, message: &str) -> Self {
        self.fail_write = Some(message.to_string());
        self
    }

    pub fn failing_load(mut self, message: &str) -> Self {
        self.fail_load = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<CoreCall> {
        self.calls.lock().clone()
    }

    pub fn setting(&self, name: &str) -> Option<Value> {
        self.settings.lock().get(name).cloned()
    }

    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn emit_save(&self) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.save_data_updated();
        }
    }

    pub fn emit_crash(&self) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.core_crashed();
        }
    }

    fn record(&self, call: CoreCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl EmulatorCore for RecordingCore {
    fn version(&self) -> String {
        "recording 0.0.0".to_string()
    }

    async fn configure(&self, settings: &Map<String, Value>) -> Result<()> {
        self.record(CoreCall::Configure);
        *self.settings.lock() = settings.clone();
        Ok(())
    }

    async fn init_filesystem(&self) -> Result<()> {
        self.record(CoreCall::InitFilesystem);
        Ok(())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.record(CoreCall::WriteFile {
            path: path.to_string(),
            len: data.len(),
        });
        match &self.fail_write {
            Some(msg) => Err(anyhow!("{}", msg)),
            None => Ok(()),
        }
    }

    async fn load_game(&self, path: &str) -> Result<()> {
        self.record(CoreCall::LoadGame(path.to_string()));
        match &self.fail_load {
            Some(msg) => Err(anyhow!("{}", msg)),
            None => Ok(()),
        }
    }

    async fn list_saves(&self) -> Result<Vec<String>> {
        self.record(CoreCall::ListSaves);
        Ok(vec!["game.sav".to_string()])
    }

    async fn sync_filesystem(&self) -> Result<()> {
        self.record(CoreCall::SyncFilesystem);
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_core_callbacks(&self, sink: CoreEventSink) {
        self.record(CoreCall::AddCallbacks);
        *self.sink.lock() = Some(sink);
    }

    fn button_press(&self, button: Button) {
        self.record(CoreCall::Press(button));
    }

    fn button_unpress(&self, button: Button) {
        self.record(CoreCall::Unpress(button));
    }
}

/// Loading overlay and error banner that remember what they were told.
#[derive(Default)]
pub struct RecordingUi {
    texts: Mutex<Vec<String>>,
    hidden: AtomicBool,
    errors: Mutex<Vec<(String, String)>>,
}

impl RecordingUi {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().clone()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }
}

impl LoadingIndicator for RecordingUi {
    fn show(&self, text: &str) {
        self.hidden.store(false, Ordering::SeqCst);
        self.texts.lock().push(text.to_string());
    }

    fn update_text(&self, text: &str) {
        self.texts.lock().push(text.to_string());
    }

    fn hide(&self) {
        self.hidden.store(true, Ordering::SeqCst);
    }
}

impl ErrorDisplay for RecordingUi {
    fn show(&self, title: &str, message: &str) {
        self.errors
            .lock()
            .push((title.to_string(), message.to_string()));
    }
}

pub fn config(rom_name: &str, cache_key: &str, base_url: &str, cache_dir: &FsPath) -> LaunchConfig {
    LaunchConfig {
        rom_name: rom_name.to_string(),
        cache_key: cache_key.to_string(),
        base_url: base_url.to_string(),
        cache_dir: cache_dir.to_string_lossy().into_owned(),
        ..LaunchConfig::default()
    }
}

/// Session over a real `DiskCache` and `HttpSource`.
pub fn session(
    config: LaunchConfig,
    core: Arc<dyn EmulatorCore>,
    ui: Arc<RecordingUi>,
) -> EmulatorSession {
    let cache: Arc<dyn ContentCache> = Arc::new(DiskCache::new(&config.cache_dir));
    session_with_cache(config, core, cache, ui)
}

pub fn session_with_cache(
    config: LaunchConfig,
    core: Arc<dyn EmulatorCore>,
    cache: Arc<dyn ContentCache>,
    ui: Arc<RecordingUi>,
) -> EmulatorSession {
    let source = Arc::new(HttpSource::new(config.base_url.clone(), HashMap::new()));
    EmulatorSession::new(config, core, cache, source, ui.clone(), ui)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
