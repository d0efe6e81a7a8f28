//! Error types for the update transport.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to an update target.
///
/// Nothing in this crate retries: every variant reaches the caller with the
/// status code, response body or digests needed to report it verbatim.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A certificate file could not be read
    #[error("reading certificate {}: {source}", path.display())]
    CertificateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP scheme probe could not be sent or got no usable redirect
    #[error("probing url for https: {0}")]
    Probe(String),

    /// Network-level failure on any request
    #[error("transport error: {0}")]
    Transport(String),

    /// Server responded, but not with the expected status
    #[error("unexpected HTTP status code: got {got}, want {want} (body {body:?})")]
    UnexpectedStatus { got: u16, want: u16, body: String },

    /// The target answered an image upload with an HTML page, which is what
    /// servers without update support do
    #[error("update handler not implemented")]
    UpdateHandlerNotImplemented,

    /// The digest returned by the target is not valid hex
    #[error("decoding remote digest: {0}")]
    DigestDecode(#[from] hex::FromHexError),

    /// The digest returned by the target does not match what was sent
    #[error("unexpected SHA256 hash: got {got}, want {want}")]
    DigestMismatch { got: String, want: String },

    /// A target URL could not be built
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl UpdateError {
    /// Whether the target lacks the update handler entirely.
    ///
    /// This is the one error callers are expected to branch on, e.g. to skip
    /// verification against legacy targets instead of aborting.
    pub fn is_handler_not_implemented(&self) -> bool {
        matches!(self, UpdateError::UpdateHandlerNotImplemented)
    }

    /// Whether the error means the transferred bytes cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            UpdateError::DigestMismatch { .. } | UpdateError::DigestDecode(_)
        )
    }
}

/// Longest response body carried in an [`UpdateError::UnexpectedStatus`].
const MAX_ERROR_BODY_CHARS: usize = 4096;

impl UpdateError {
    /// Turn a response with the wrong status into an error, reading its body
    /// on a best-effort basis.
    pub(crate) async fn unexpected_status(response: reqwest::Response, want: u16) -> Self {
        let got = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        UpdateError::UnexpectedStatus {
            got,
            want,
            body: truncate_body(body),
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if let Some((idx, _)) = body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        body.truncate(idx);
    }
    body
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        UpdateError::Transport(error_chain(&err))
    }
}

/// Render an error and every cause below it, e.g. the TLS verification
/// failure underneath reqwest's "error sending request".
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
