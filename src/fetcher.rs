//! Transport seam for fetching descriptor bytes.

use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::errors::{SundownError, SundownResult};

/// Default request timeout for [`HttpFetcher`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetches raw descriptor bytes from a resolved URL.
///
/// Synchronous by contract: the orchestrator drives implementors from the
/// blocking pool, never from an async task directly. Object safe so it can
/// ride behind `Arc<dyn DescriptorFetcher>`.
pub trait DescriptorFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> SundownResult<Vec<u8>>;
}

/// Default transport over a blocking reqwest client.
///
/// Any non-2xx status counts as a transport failure, same as a connect or
/// read error. The request timeout is the only cancellation anywhere in
/// the query pipeline.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Build a fetcher with the default request timeout.
    pub fn new() -> SundownResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Build a fetcher with an explicit request timeout.
    pub fn with_timeout(timeout: Duration) -> SundownResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SundownError::transport("build_http_client", e))?;
        Ok(HttpFetcher { client })
    }
}

impl DescriptorFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> SundownResult<Vec<u8>> {
        debug!(%url, "requesting version descriptor");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| SundownError::transport("descriptor_request", e))?
            .error_for_status()
            .map_err(|e| SundownError::transport("descriptor_status", e))?;
        let bytes = response
            .bytes()
            .map_err(|e| SundownError::transport("descriptor_body", e))?;
        Ok(bytes.to_vec())
    }
}
