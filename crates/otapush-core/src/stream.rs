//! Streaming image upload with inline SHA-256 verification.
//!
//! The image is never held in memory as a whole. Each chunk read from the
//! source is fed to a running digest and counted before it is handed to the
//! HTTP body, and the target answers with the hex digest of what it
//! received. An upload only succeeds when both digests agree, which catches
//! truncation, corruption and proxies that rewrite payloads.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info};
use url::Url;

use crate::error::UpdateError;

/// Prefix of the page served by targets without an update handler.
pub const HTML_DOCTYPE: &[u8] = b"<!DOCTYPE html>";

/// Size of each read from the image source.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Progress callback type for upload progress reporting.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    /// Remote path being uploaded to, e.g. `update/root`.
    pub path: String,
    /// Bytes handed to the transport so far.
    pub sent: u64,
}

/// Result of a verified upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    /// SHA-256 of the bytes sent, as confirmed by the target.
    pub local_digest: [u8; 32],
}

impl UploadStats {
    /// Throughput in MiB/s.
    pub fn mib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.bytes_transferred as f64 / secs / 1024.0 / 1024.0
        }
    }
}

impl fmt::Display for UploadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {:?}, i.e. {:.2} MiB/s",
            self.bytes_transferred,
            self.elapsed,
            self.mib_per_sec()
        )
    }
}

#[derive(Default)]
struct TallyState {
    hasher: Sha256,
    bytes: u64,
}

/// Running digest and byte count of an upload.
///
/// Cloning shares the state: the [`TeeStream`] writes it while the body is
/// sent, and the upload reads it once the response is in.
#[derive(Clone, Default)]
pub struct Tally {
    state: Arc<Mutex<TallyState>>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `chunk` and return the total byte count so far.
    fn record(&self, chunk: &[u8]) -> u64 {
        let mut state = self.lock();
        state.hasher.update(chunk);
        state.bytes += chunk.len() as u64;
        state.bytes
    }

    /// Bytes recorded so far.
    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    /// SHA-256 of the bytes recorded so far.
    pub fn digest(&self) -> [u8; 32] {
        self.lock().hasher.clone().finalize().into()
    }

    fn lock(&self) -> MutexGuard<'_, TallyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tally").field("bytes", &self.bytes()).finish()
    }
}

/// Byte stream over an [`AsyncRead`] that records every chunk in a [`Tally`].
pub struct TeeStream<R> {
    reader: R,
    tally: Tally,
    buf: Box<[u8]>,
    done: bool,
    progress: Option<(ProgressCallback, String)>,
}

impl<R> TeeStream<R> {
    pub fn new(reader: R, tally: Tally) -> Self {
        Self::with_chunk_size(reader, tally, READ_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, tally: Tally, chunk_size: usize) -> Self {
        Self {
            reader,
            tally,
            buf: vec![0u8; chunk_size.max(1)].into_boxed_slice(),
            done: false,
            progress: None,
        }
    }

    /// Report each chunk to `callback`, labelled with `path`.
    pub fn with_progress(mut self, callback: ProgressCallback, path: impl Into<String>) -> Self {
        self.progress = Some((callback, path.into()));
        self
    }
}

impl<R: AsyncRead + Unpin> Stream for TeeStream<R> {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let mut buf = ReadBuf::new(&mut this.buf);
        match Pin::new(&mut this.reader).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Ok(())) => {
                let filled = buf.filled();
                if filled.is_empty() {
                    this.done = true;
                    return Poll::Ready(None);
                }
                let sent = this.tally.record(filled);
                let chunk = Bytes::copy_from_slice(filled);
                if let Some((callback, path)) = &this.progress {
                    callback(UploadProgress {
                        path: path.clone(),
                        sent,
                    });
                }
                Poll::Ready(Some(Ok(chunk)))
            }
        }
    }
}

/// PUT `reader` to `url` and check the digest the target answers with.
///
/// `path` only labels logs and progress reports.
pub async fn stream_to<R>(
    client: &reqwest::Client,
    url: Url,
    path: &str,
    reader: R,
    progress: Option<ProgressCallback>,
) -> Result<UploadStats, UpdateError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let start = Instant::now();
    let tally = Tally::new();

    let mut tee = TeeStream::new(reader, tally.clone());
    if let Some(callback) = progress {
        tee = tee.with_progress(callback, path);
    }

    debug!(path, "streaming upload");
    let response = client
        .put(url)
        .body(reqwest::Body::wrap_stream(tee))
        .send()
        .await?;

    if response.status() != StatusCode::OK {
        return Err(UpdateError::unexpected_status(response, StatusCode::OK.as_u16()).await);
    }

    let remote_digest = response.bytes().await?;
    let local_digest = tally.digest();
    verify_remote_digest(&remote_digest, &local_digest)?;

    let stats = UploadStats {
        bytes_transferred: tally.bytes(),
        elapsed: start.elapsed(),
        local_digest,
    };
    info!(
        path,
        bytes = stats.bytes_transferred,
        elapsed = ?stats.elapsed,
        mib_per_sec = stats.mib_per_sec(),
        "upload verified"
    );
    Ok(stats)
}

/// Check a target's digest claim against the digest of the bytes sent.
pub fn verify_remote_digest(remote: &[u8], local: &[u8; 32]) -> Result<(), UpdateError> {
    if remote.starts_with(HTML_DOCTYPE) {
        return Err(UpdateError::UpdateHandlerNotImplemented);
    }

    let decoded = hex::decode(remote)?;
    if !bool::from(decoded.as_slice().ct_eq(&local[..])) {
        debug!(
            got = %hex::encode(&decoded),
            want = %hex::encode(local),
            "remote digest mismatch"
        );
        return Err(UpdateError::DigestMismatch {
            got: hex::encode(&decoded),
            want: hex::encode(local),
        });
    }
    Ok(())
}
