//! HTTP transport construction.
//!
//! The client trusts exactly the roots it is given. Timeouts, redirects and
//! connection pooling stay at reqwest's defaults and nothing is retried;
//! callers that need resilience wrap the client themselves.

use std::sync::Arc;

use crate::error::UpdateError;
use crate::trust::TrustMaterial;

/// Per-session transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Root certificates for HTTPS targets.
    pub trust: TrustMaterial,
    /// User agent string.
    pub user_agent: String,
}

impl TransportConfig {
    pub fn new(trust: TrustMaterial) -> Self {
        Self {
            trust,
            user_agent: default_user_agent(),
        }
    }

    /// Build the HTTP client for one session.
    pub fn build_client(self) -> Result<reqwest::Client, UpdateError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| UpdateError::Transport(format!("tls config: {e}")))?
            .with_root_certificates(self.trust.into_root_store())
            .with_no_client_auth();

        reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .user_agent(self.user_agent)
            .build()
            .map_err(UpdateError::from)
    }
}

fn default_user_agent() -> String {
    format!("otapush/{}", env!("CARGO_PKG_VERSION"))
}
