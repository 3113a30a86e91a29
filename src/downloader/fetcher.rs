// Stream fetcher - one network transfer per (item, selector)
//
// A transfer is a finite byte stream plus the total size when known. Progress
// is observed by wrapping the stream, so it is emitted exactly as chunks are
// consumed. Nothing here deletes files; a failed `save_to` leaves the partial
// file for the caller.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use super::errors::DownloadError;
use super::format_selector::resolve_selector;
use super::models::{MediaItem, NetworkConfig, Role, Selector, TransferProgress};
use super::traits::{ProgressObserver, StreamFetcher};

pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// An open transfer; ends with `None` on success or yields one error
pub struct Transfer {
    pub total: Option<u64>,
    pub stream: ByteStream,
}

impl Transfer {
    pub fn new(total: Option<u64>, stream: ByteStream) -> Self {
        Self { total, stream }
    }

    /// Report every chunk of this transfer to `observer` under `role`.
    pub fn observe(self, role: Role, observer: Arc<dyn ProgressObserver>) -> Transfer {
        let total = self.total;
        let observed = Observed {
            inner: self.stream,
            role,
            total,
            received: 0,
            observer,
            finished: false,
        };
        Transfer {
            total,
            stream: observed.boxed(),
        }
    }

    /// Drain the transfer into a new file at `path`, returning bytes written.
    pub async fn save_to(mut self, path: &Path) -> Result<u64, DownloadError> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| DownloadError::fs(path, e))?;

        let mut written = 0u64;
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::fs(path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| DownloadError::fs(path, e))?;

        Ok(written)
    }
}

/// Stream adapter emitting cumulative progress and a single finish signal
struct Observed {
    inner: ByteStream,
    role: Role,
    total: Option<u64>,
    received: u64,
    observer: Arc<dyn ProgressObserver>,
    finished: bool,
}

impl Observed {
    fn finish(&mut self, ok: bool) {
        if !self.finished {
            self.finished = true;
            self.observer.on_finish(self.role, ok);
        }
    }
}

impl Stream for Observed {
    type Item = Result<Bytes, DownloadError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.received += chunk.len() as u64;
                this.observer.on_progress(
                    this.role,
                    TransferProgress {
                        received: this.received,
                        total: this.total,
                    },
                );
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Observed {
    fn drop(&mut self) {
        // Dropped mid-transfer: the other role failed first
        self.finish(false);
    }
}

/// Fetches descriptor URLs over HTTP(S)
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder();

        if let Some(secs) = config.timeout {
            // Only connecting is bounded; a large body may take a while
            builder = builder.connect_timeout(Duration::from_secs(secs as u64));
        }

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DownloadError::InvalidUrl(format!("proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::Transfer(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl StreamFetcher for HttpFetcher {
    async fn open(&self, item: &MediaItem, selector: &Selector) -> Result<Transfer, DownloadError> {
        let descriptor = resolve_selector(&item.formats, selector)?;
        if descriptor.url.is_empty() {
            return Err(DownloadError::Transfer(format!(
                "{} of {} has no transfer URL",
                selector, item.id
            )));
        }

        let mut request = self.client.get(&descriptor.url);
        for (name, value) in &descriptor.http_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        tracing::debug!(item = %item.id, %selector, format = %descriptor.format_id, "opening transfer");
        let response = request.send().await?.error_for_status()?;

        let total = response.content_length().or(descriptor.content_length);
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DownloadError::from))
            .boxed();

        Ok(Transfer::new(total, stream))
    }
}
