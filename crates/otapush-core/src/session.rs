//! Update session: the operations a caller runs against one target.
//!
//! A run normally goes probe, trust, root/boot/mbr uploads, partition
//! switch, reboot. Each step completes before the next is issued and none
//! is retried; sequencing and the decision to continue after a failure are
//! left to the caller.
//!
//! # Example
//!
//! ```ignore
//! use otapush_core::{ConfigDir, SchemePreference, Target, UpdateSession};
//!
//! let target = Target::new("gateway").with_scheme(SchemePreference::Auto);
//! let connected = UpdateSession::connect(&target, &ConfigDir::new("/etc/otapush")).await?;
//! let session = connected.session;
//!
//! session.update_root(tokio::fs::File::open("root.img").await?).await?;
//! session.switch_partitions().await?;
//! session.reboot().await?;
//! ```

use std::str::FromStr;
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HostConfigLookup;
use crate::endpoint::{self, Credentials, Scheme};
use crate::error::UpdateError;
use crate::probe::probe_scheme;
use crate::stream::{self, ProgressCallback, UploadProgress, UploadStats};
use crate::transport::TransportConfig;
use crate::trust::{self, TlsMode, TrustMaterial};

/// Remote path of the root file system image.
pub const ROOT_PATH: &str = "update/root";
/// Remote path of the boot partition image.
pub const BOOT_PATH: &str = "update/boot";
/// Remote path of the master boot record.
pub const MBR_PATH: &str = "update/mbr";
/// Remote path that activates the freshly written partition.
pub const SWITCH_PATH: &str = "update/switch";
/// Remote path that reboots the target.
pub const REBOOT_PATH: &str = "reboot";
/// Remote path listing the target's update features.
pub const FEATURES_PATH: &str = "update/features";

/// Which scheme to use for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemePreference {
    /// Probe the target for an HTTPS redirect.
    #[default]
    Auto,
    /// Use this scheme without probing.
    Fixed(Scheme),
}

impl FromStr for SchemePreference {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(SchemePreference::Auto)
        } else {
            s.parse().map(SchemePreference::Fixed)
        }
    }
}

/// Everything needed to reach a target.
#[derive(Debug, Clone)]
pub struct Target {
    /// Host, optionally with port.
    pub host: String,
    pub scheme: SchemePreference,
    /// How to extend the trust store. HTTPS targets default to
    /// [`TlsMode::SelfSigned`].
    pub tls: Option<TlsMode>,
    pub credentials: Option<Credentials>,
}

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            scheme: SchemePreference::Auto,
            tls: None,
            credentials: None,
        }
    }

    pub fn with_scheme(mut self, scheme: SchemePreference) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// A session plus what was learned while establishing it.
pub struct Connected {
    pub session: UpdateSession,
    pub scheme: Scheme,
    /// Whether a certificate from the target's host directory is trusted.
    pub matched_certificate: bool,
}

/// Connection to one target device.
pub struct UpdateSession {
    base_url: Url,
    client: reqwest::Client,
    progress_callback: Option<ProgressCallback>,
}

impl UpdateSession {
    /// Create a session from a base URL and a configured client.
    pub fn new(base_url: Url, client: reqwest::Client) -> Self {
        Self {
            base_url: endpoint::normalize_base_url(base_url),
            client,
            progress_callback: None,
        }
    }

    /// Create a session whose transport trusts exactly `trust`.
    pub fn with_trust(base_url: Url, trust: TrustMaterial) -> Result<Self, UpdateError> {
        let client = TransportConfig::new(trust).build_client()?;
        Ok(Self::new(base_url, client))
    }

    /// Probe, resolve trust and build the transport for `target`.
    ///
    /// With [`SchemePreference::Auto`], a target that does not redirect to
    /// HTTPS is used over plain HTTP.
    pub async fn connect(
        target: &Target,
        lookup: &dyn HostConfigLookup,
    ) -> Result<Connected, UpdateError> {
        let scheme = match target.scheme {
            SchemePreference::Fixed(scheme) => scheme,
            SchemePreference::Auto => match probe_scheme(&target.host).await {
                Ok(scheme) => scheme,
                Err(e) => {
                    warn!(host = %target.host, error = %e, "no https redirect, using http");
                    Scheme::Http
                }
            },
        };

        let base_url = endpoint::base_url(scheme, &target.host, target.credentials.as_ref())?;
        let hostname = endpoint::hostname(&base_url).unwrap_or_default().to_string();

        let tls = match (&target.tls, scheme) {
            (Some(mode), _) => Some(mode.clone()),
            (None, Scheme::Https) => Some(TlsMode::SelfSigned),
            (None, Scheme::Http) => None,
        };
        let resolved = match tls {
            Some(mode) => trust::resolve_trust(&mode, &hostname, lookup)?,
            None => trust::ResolvedTrust {
                trust: TrustMaterial::system(),
                matched_certificate: false,
            },
        };

        info!(
            host = %hostname,
            %scheme,
            matched_certificate = resolved.matched_certificate,
            "target connected"
        );
        Ok(Connected {
            session: Self::with_trust(base_url, resolved.trust)?,
            scheme,
            matched_certificate: resolved.matched_certificate,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Set the callback invoked as image bytes are sent.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
    }

    /// Clear the progress callback.
    pub fn clear_progress_callback(&mut self) {
        self.progress_callback = None;
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpdateError> {
        Ok(self.base_url.join(path)?)
    }

    /// Stream `reader` to `path` and verify the digest the target returns.
    pub async fn stream_to<R>(&self, path: &str, reader: R) -> Result<UploadStats, UpdateError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let url = self.endpoint(path)?;
        stream::stream_to(&self.client, url, path, reader, self.progress_callback.clone()).await
    }

    pub async fn update_root<R>(&self, reader: R) -> Result<UploadStats, UpdateError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.stream_to(ROOT_PATH, reader).await
    }

    pub async fn update_boot<R>(&self, reader: R) -> Result<UploadStats, UpdateError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.stream_to(BOOT_PATH, reader).await
    }

    pub async fn update_mbr<R>(&self, reader: R) -> Result<UploadStats, UpdateError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.stream_to(MBR_PATH, reader).await
    }

    /// Make the target boot from the partition that was just written.
    pub async fn switch_partitions(&self) -> Result<(), UpdateError> {
        self.post_expect_ok(SWITCH_PATH).await
    }

    pub async fn reboot(&self) -> Result<(), UpdateError> {
        self.post_expect_ok(REBOOT_PATH).await
    }

    async fn post_expect_ok(&self, path: &str) -> Result<(), UpdateError> {
        let url = self.endpoint(path)?;
        debug!(path, "POST");
        let response = self.client.post(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(UpdateError::unexpected_status(response, StatusCode::OK.as_u16()).await);
        }
        Ok(())
    }

    /// The target's update features, or `None` if it predates the
    /// features endpoint.
    pub async fn features(&self) -> Result<Option<Vec<String>>, UpdateError> {
        let url = self.endpoint(FEATURES_PATH)?;
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("target has no features endpoint");
                Ok(None)
            }
            StatusCode::OK => {
                let body = response.text().await?;
                Ok(Some(parse_features(&body)))
            }
            _ => Err(UpdateError::unexpected_status(response, StatusCode::OK.as_u16()).await),
        }
    }

    /// Whether the target advertises `feature`.
    ///
    /// Targets without the features endpoint support nothing.
    pub async fn target_supports(&self, feature: &str) -> Result<bool, UpdateError> {
        Ok(self
            .features()
            .await?
            .is_some_and(|features| features.iter().any(|f| f == feature)))
    }
}

/// Parse a comma-separated feature list, ignoring surrounding whitespace
/// and empty entries.
pub fn parse_features(body: &str) -> Vec<String> {
    body.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}
