//! # otapush-core
//!
//! Update transport for embedded devices that accept new images over
//! HTTP(S).
//!
//! This crate handles:
//! - TLS trust bootstrapping from the platform pool plus user or per-host
//!   self-signed certificates
//! - HTTP to HTTPS scheme probing before anything sensitive is sent
//! - Streaming root/boot/MBR uploads with inline SHA-256 verification
//! - Partition switch, reboot and feature queries
//!
//! ## Integrity
//!
//! An upload only succeeds when the target answers with the SHA-256 of
//! exactly the bytes that were streamed to it. Targets that serve an HTML
//! page instead are reported as [`UpdateError::UpdateHandlerNotImplemented`]
//! so callers can tell old targets apart from corrupted transfers.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod probe;
#[cfg(test)]
mod proptests;
pub mod session;
pub mod stream;
pub mod transport;
pub mod trust;

// Re-export main types for convenience
pub use config::{ConfigDir, HostConfigLookup};
pub use endpoint::{Credentials, Scheme};
pub use error::UpdateError;
pub use probe::probe_scheme;
pub use session::{Connected, SchemePreference, Target, UpdateSession};
pub use stream::{ProgressCallback, UploadProgress, UploadStats};
pub use transport::TransportConfig;
pub use trust::{resolve_trust, ResolvedTrust, TlsMode, TrustMaterial};
