// Static content server: hosts the page assets and `data/<rom>` for the fetcher.

use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

type Root = Arc<PathBuf>;

pub struct ContentServer {
    port: u16,
    root: Root,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ContentServer {
    /// Serve `root` on `bind` (use port 0 for a random port).
    pub async fn start(root: impl Into<PathBuf>, bind: &str) -> Result<Self> {
        let root: Root = Arc::new(root.into());
        let listener = TcpListener::bind(bind).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new()
            .route("/", get(index_handler).head(index_handler))
            .route("/{*path}", get(file_handler).head(file_handler))
            .with_state(root.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("content server serving {} on port {}", root.display(), port);

        Ok(Self {
            port,
            root,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL suitable for `LaunchConfig::base_url`.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Map a request path onto `root`, rejecting anything that could escape it.
fn resolve_path(root: &FsPath, rel: &str) -> Option<PathBuf> {
    if rel.is_empty() || rel.starts_with('/') || rel.starts_with('\\') || rel.contains("..") {
        return None;
    }
    for component in FsPath::new(rel).components() {
        if !matches!(component, Component::Normal(_)) {
            return None;
        }
    }
    Some(root.join(rel))
}

fn content_type_for(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript",
        Some("css") => "text/css",
        Some("wasm") => "application/wasm",
        Some("json") => "application/json",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Cross-origin isolation, required by the core for shared-memory threads.
fn isolation_headers(headers: &mut HeaderMap) {
    headers.insert(
        "cross-origin-opener-policy",
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        "cross-origin-embedder-policy",
        HeaderValue::from_static("require-corp"),
    );
}

async fn index_handler(State(root): State<Root>) -> Response {
    serve_file(&root, "index.html").await
}

async fn file_handler(State(root): State<Root>, Path(path): Path<String>) -> Response {
    serve_file(&root, &path).await
}

async fn serve_file(root: &FsPath, rel: &str) -> Response {
    let Some(path) = resolve_path(root, rel) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) if m.is_file() => m,
        _ => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    let total = meta.len();

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    isolation_headers(&mut resp_headers);

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            error!("open {} failed: {}", path.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "read error").into_response();
        }
    };

    debug!("serving {} bytes={}", rel, total);
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(total));
    let body = Body::from_stream(ReaderStream::new(file));
    (StatusCode::OK, resp_headers, body).into_response()
}
