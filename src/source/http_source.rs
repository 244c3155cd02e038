use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, RequestBuilder, Url};
use tracing::{debug, info, warn};

use super::traits::{DownloadProgress, ProgressFn, RomSource};
use crate::config::{LoadingDelays, DATA_PATH_PREFIX};
use crate::error::TransferError;

/// Upper bound on the buffer reserved up-front from an advertised size (64 MB).
const MAX_PREALLOC_BYTES: u64 = 64 * 1024 * 1024;

/// Fetches ROM images from `<base_url>/data/<name>` over HTTP.
pub struct HttpSource {
    client: Client,
    base_url: String,
    headers: HashMap<String, String>,
    chunk_delay: Option<Duration>,
    unsized_delay: Option<Duration>,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client: Client::new(),
            base_url,
            headers,
            chunk_delay: None,
            unsized_delay: None,
        }
    }

    /// Apply the demo pacing knobs. No-ops unless `delays.enabled`.
    pub fn with_pacing(mut self, delays: &LoadingDelays) -> Self {
        self.chunk_delay = delays.chunk();
        self.unsized_delay = delays.unsized_download();
        self
    }

    /// Resolve the remote URL of a ROM.
    pub fn resource_url(&self, name: &str) -> Result<Url, TransferError> {
        let invalid = |message: String| TransferError::Url {
            name: name.to_string(),
            message,
        };
        let base = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        base.join(&format!("{}{}", DATA_PATH_PREFIX, name))
            .map_err(|e| invalid(e.to_string()))
    }

    fn build_request(&self, url: Url) -> RequestBuilder {
        let mut req = self.client.get(url);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait]
impl RomSource for HttpSource {
    async fn fetch(&self, name: &str, on_progress: ProgressFn<'_>) -> Result<Bytes, TransferError> {
        let url = self.resource_url(name)?;
        debug!("http fetch {}", url);

        let resp = self
            .build_request(url)
            .send()
            .await
            .map_err(|source| TransferError::Request {
                name: name.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!("http fetch failed status={} rom={}", status.as_u16(), name);
            return Err(TransferError::Status {
                name: name.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let total = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let stream_error = |e: reqwest::Error| TransferError::Stream {
            name: name.to_string(),
            message: e.to_string(),
        };

        let Some(total) = total else {
            // Without a size there is no denominator; read the body in one go.
            debug!("http fetch rom={} has no content-length", name);
            on_progress(DownloadProgress::new(0, None));
            if let Some(d) = self.unsized_delay {
                tokio::time::sleep(d).await;
            }
            let body = resp.bytes().await.map_err(stream_error)?;
            info!("downloaded rom={} bytes={}", name, body.len());
            return Ok(body);
        };

        let mut buf = BytesMut::with_capacity(total.min(MAX_PREALLOC_BYTES) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                warn!(
                    "http stream error rom={} after {} bytes: {}",
                    name,
                    buf.len(),
                    e
                );
                stream_error(e)
            })?;
            buf.extend_from_slice(&chunk);
            on_progress(DownloadProgress::new(buf.len() as u64, Some(total)));

            if let Some(d) = self.chunk_delay {
                tokio::time::sleep(d).await;
            }
        }

        info!("downloaded rom={} bytes={} advertised={}", name, buf.len(), total);
        Ok(buf.freeze())
    }
}
