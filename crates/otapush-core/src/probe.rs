//! HTTP to HTTPS scheme probing.
//!
//! Before credentials or images are sent anywhere, the target is asked over
//! plain HTTP where it wants to be reached. Redirects are not followed; only
//! the `Location` header of the first response is read.

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::debug;
use url::Url;

use crate::endpoint::Scheme;
use crate::error::{error_chain, UpdateError};

/// Probe `host` (optionally `host:port`) and return the scheme it redirects to.
pub async fn probe_scheme(host: &str) -> Result<Scheme, UpdateError> {
    let probe_url = Url::parse(&format!("http://{host}/"))
        .map_err(|e| UpdateError::Probe(format!("invalid host {host:?}: {e}")))?;

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .map_err(|e| UpdateError::Probe(e.to_string()))?;

    debug!(url = %probe_url, "probing for https redirect");
    let response = client
        .get(probe_url.clone())
        .send()
        .await
        .map_err(|e| UpdateError::Probe(error_chain(&e)))?;

    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| UpdateError::Probe("no Location header in response".to_string()))?
        .to_str()
        .map_err(|e| UpdateError::Probe(format!("invalid Location header: {e}")))?;

    let target = probe_url
        .join(location)
        .map_err(|e| UpdateError::Probe(format!("invalid Location {location:?}: {e}")))?;
    debug!(status = %response.status(), location = %target, "probe redirected");

    target.scheme().parse()
}
