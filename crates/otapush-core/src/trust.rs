//! TLS trust bootstrapping.
//!
//! A target's trust store is the platform trust pool plus at most one extra
//! PEM file: either a certificate the user pointed at explicitly, or the
//! `cert.pem` found in the target's host configuration directory when the
//! target is known to serve a self-signed certificate.
//!
//! Certificates are appended leniently. PEM blocks that do not parse are
//! skipped rather than rejected, so a store that accepted a file once keeps
//! accepting it. Expiry and key usage are left to the TLS handshake.

use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use tracing::{debug, info, warn};

use crate::config::{HostConfigLookup, CERT_FILE_NAME};
use crate::error::UpdateError;

/// Selector value asking for the target's own self-signed certificate.
pub const SELF_SIGNED: &str = "self-signed";

/// How the trust store for a target is extended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Look for `cert.pem` in the target's host configuration directory.
    SelfSigned,
    /// Certificate files given by the user. Only the first one is used.
    CertificateFiles(Vec<PathBuf>),
}

impl TlsMode {
    /// Interpret a selector: `"self-signed"` or comma-separated paths.
    pub fn from_selector(selector: &str) -> Self {
        if selector == SELF_SIGNED {
            TlsMode::SelfSigned
        } else {
            TlsMode::CertificateFiles(selector.split(',').map(PathBuf::from).collect())
        }
    }
}

impl FromStr for TlsMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_selector(s))
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::SelfSigned => f.write_str(SELF_SIGNED),
            TlsMode::CertificateFiles(paths) => {
                let joined: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// Set of certificate authorities a session trusts.
#[derive(Debug, Clone)]
pub struct TrustMaterial {
    roots: RootCertStore,
}

impl TrustMaterial {
    /// A store with no certificates at all.
    pub fn empty() -> Self {
        Self {
            roots: RootCertStore::empty(),
        }
    }

    /// The platform trust pool.
    ///
    /// Falls back to an empty store when the platform pool cannot be loaded.
    pub fn system() -> Self {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            warn!(error = %err, "loading platform certificate failed");
        }
        if loaded.certs.is_empty() && !loaded.errors.is_empty() {
            warn!("initializing platform cert pool failed, falling back to empty cert pool");
        }

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
        debug!(added, ignored, "loaded platform trust pool");
        Self { roots }
    }

    /// Append every certificate found in `pem`, returning how many were added.
    ///
    /// Reading stops at the first malformed PEM section; certificates that
    /// decode but are not usable trust anchors are skipped.
    pub fn append_pem(&mut self, pem: &[u8]) -> usize {
        let mut reader = pem;
        let mut certs: Vec<CertificateDer<'static>> = Vec::new();
        for item in rustls_pemfile::certs(&mut reader) {
            match item {
                Ok(cert) => certs.push(cert),
                Err(e) => {
                    debug!(error = %e, "stopping at malformed PEM data");
                    break;
                }
            }
        }

        let (added, ignored) = self.roots.add_parsable_certificates(certs);
        if ignored > 0 {
            debug!(ignored, "skipped unparsable certificates");
        }
        added
    }

    /// Number of trusted certificates.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }

    pub fn into_root_store(self) -> RootCertStore {
        self.roots
    }
}

impl Default for TrustMaterial {
    fn default() -> Self {
        Self::system()
    }
}

/// Outcome of trust resolution for one target.
#[derive(Debug, Clone)]
pub struct ResolvedTrust {
    /// The trust store to hand to the transport.
    pub trust: TrustMaterial,
    /// Whether a certificate from the target's host directory was used.
    pub matched_certificate: bool,
}

/// Build the trust store for `host` on top of the platform pool.
pub fn resolve_trust(
    mode: &TlsMode,
    host: &str,
    lookup: &dyn HostConfigLookup,
) -> Result<ResolvedTrust, UpdateError> {
    resolve_trust_with(TrustMaterial::system(), mode, host, lookup)
}

/// Build the trust store for `host` on top of `base`.
pub fn resolve_trust_with(
    mut base: TrustMaterial,
    mode: &TlsMode,
    host: &str,
    lookup: &dyn HostConfigLookup,
) -> Result<ResolvedTrust, UpdateError> {
    match mode {
        TlsMode::CertificateFiles(paths) => {
            let path = paths.first().cloned().unwrap_or_default();
            let pem = read_certificate(&path)?;
            let added = base.append_pem(&pem);
            debug!(path = %path.display(), added, "appended user specified certificate");
            Ok(ResolvedTrust {
                trust: base,
                matched_certificate: false,
            })
        }
        TlsMode::SelfSigned => {
            let Some(dir) = lookup.host_config_dir(host) else {
                debug!(host, "no host configuration directory");
                return Ok(ResolvedTrust {
                    trust: base,
                    matched_certificate: false,
                });
            };

            let cert_path = dir.join(CERT_FILE_NAME);
            match std::fs::read(&cert_path) {
                Ok(pem) => {
                    info!(path = %cert_path.display(), "Using certificate");
                    base.append_pem(&pem);
                    Ok(ResolvedTrust {
                        trust: base,
                        matched_certificate: true,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %cert_path.display(), "no host certificate found");
                    Ok(ResolvedTrust {
                        trust: base,
                        matched_certificate: false,
                    })
                }
                Err(source) => Err(UpdateError::CertificateRead {
                    path: cert_path,
                    source,
                }),
            }
        }
    }
}

fn read_certificate(path: &Path) -> Result<Vec<u8>, UpdateError> {
    std::fs::read(path).map_err(|source| UpdateError::CertificateRead {
        path: path.to_path_buf(),
        source,
    })
}
