use crate::storage::{BlobStore, ByteRange, ByteStream, StorageError};
use crate::stream::range::parse_range;
use crate::stream::throttle::Throttle;
use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header};
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Caching is forbidden for protected content regardless of status
pub const NO_STORE: &str = "no-cache, no-store, must-revalidate";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Backing object not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Read failed before any header was committed
    #[error("Stream I/O error: {0}")]
    Io(String),
}

impl From<StorageError> for StreamError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(locator) | StorageError::InvalidLocator(locator) => {
                StreamError::NotFound(locator)
            }
            StorageError::Unavailable(reason) => StreamError::Unavailable(reason),
        }
    }
}

/// What the caller asked to be streamed
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// Raw `Range` header value
    pub range: Option<String>,
    /// Serve as an attachment
    pub download: bool,
}

/// Range-Streaming Engine
#[derive(Clone)]
pub struct StreamingEngine {
    blobs: Arc<dyn BlobStore>,
    /// Bytes per second per response, 0 for unlimited
    rate: u64,
}

impl StreamingEngine {
    pub fn new(blobs: Arc<dyn BlobStore>, rate: u64) -> Self {
        Self { blobs, rate }
    }

    /// Resolve metadata for `locator` and stream the requested window.
    ///
    /// Storage failures before the first byte surface as [`StreamError`];
    /// failures afterwards abort the body without touching the status.
    pub async fn serve(
        &self,
        locator: &str,
        request: &StreamRequest,
    ) -> Result<Response<Body>, StreamError> {
        if !self.blobs.exists(locator).await? {
            return Err(StreamError::NotFound(locator.to_string()));
        }
        let metadata = self.blobs.metadata(locator).await?;
        let total = metadata.size;

        let range = request
            .range
            .as_deref()
            .and_then(|spec| parse_range(spec, total));
        if request.range.is_some() && range.is_none() {
            debug!(locator, spec = ?request.range, total, "Ignoring unusable range");
        }

        let (status, window) = match range {
            Some(window) => (StatusCode::PARTIAL_CONTENT, Some(window)),
            None if total == 0 => (StatusCode::OK, None),
            None => (
                StatusCode::OK,
                Some(ByteRange {
                    start: 0,
                    end: total - 1,
                }),
            ),
        };

        let body = match window {
            Some(window) => self.open_body(locator, window).await?,
            None => Body::empty(),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&metadata.content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream")),
        );
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(window.map_or(0, |window| window.len())),
        );
        if status == StatusCode::PARTIAL_CONTENT
            && let Some(window) = window
            && let Ok(value) =
                HeaderValue::from_str(&format!("bytes {}-{}/{total}", window.start, window.end))
        {
            headers.insert(header::CONTENT_RANGE, value);
        }
        if request.download
            && let Ok(value) = HeaderValue::from_str(&attachment(locator))
        {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }

        debug!(locator, %status, ?window, total, "Streaming");
        Ok(response)
    }

    /// Start the backing read and hold back the first chunk, so a read
    /// that fails immediately can still be reported with a proper status.
    async fn open_body(&self, locator: &str, window: ByteRange) -> Result<Body, StreamError> {
        let cancel = CancellationToken::new();
        let mut chunks = self
            .blobs
            .read_range(locator, window, cancel.clone())
            .await?;

        let first = match chunks.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(error)) => {
                cancel.cancel();
                return Err(StreamError::Io(error.to_string()));
            }
            None => None,
        };

        let throttle = (self.rate > 0).then(|| Throttle::new(self.rate));
        let guarded = GuardedBody {
            locator: locator.to_string(),
            first,
            chunks,
            expected: window.len(),
            sent: 0,
            finished: false,
            throttle,
            _cancel_on_drop: cancel.drop_guard(),
        };
        Ok(Body::from_stream(guarded.into_stream()))
    }
}

fn attachment(locator: &str) -> String {
    let name = Path::new(locator)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| name.is_ascii() && !name.contains('"'))
        .unwrap_or("video");
    format!("attachment; filename=\"{name}\"")
}

/// Body state once headers are committed. Dropping it (the client went
/// away) cancels the backing read.
struct GuardedBody {
    locator: String,
    first: Option<Bytes>,
    chunks: ByteStream,
    expected: u64,
    sent: u64,
    finished: bool,
    throttle: Option<Throttle>,
    _cancel_on_drop: DropGuard,
}

impl GuardedBody {
    fn into_stream(self) -> impl futures::Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::unfold(self, |mut body| async move {
            if body.finished {
                return None;
            }

            let next = match body.first.take() {
                Some(chunk) => Some(Ok(chunk)),
                None => body.chunks.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    if let Some(throttle) = &body.throttle {
                        throttle.consume(chunk.len()).await;
                    }
                    body.sent += chunk.len() as u64;
                    Some((Ok(chunk), body))
                }
                Some(Err(error)) => {
                    warn!(
                        locator = %body.locator,
                        sent = body.sent,
                        expected = body.expected,
                        %error,
                        "Storage read failed after headers were sent, aborting stream"
                    );
                    body.finished = true;
                    Some((Err(error), body))
                }
                None if body.sent < body.expected => {
                    warn!(
                        locator = %body.locator,
                        sent = body.sent,
                        expected = body.expected,
                        "Short read from storage, aborting stream"
                    );
                    body.finished = true;
                    let error = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} of {} bytes", body.sent, body.expected),
                    );
                    Some((Err(error), body))
                }
                None => {
                    debug!(locator = %body.locator, sent = body.sent, "Stream complete");
                    None
                }
            }
        })
    }
}
