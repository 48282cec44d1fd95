//! Origin fetcher backed by reqwest.

use async_trait::async_trait;
use std::time::Duration;
use velo_cache::ResponseHeaders;
use velo_rewrite::{FetchedResource, ResourceFetcher, RewriteError};

/// Fetches origin resources over HTTP with a per-request timeout.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Builds a fetcher whose requests time out after
    /// `fetch_timeout_ms`.
    pub fn new(fetch_timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(fetch_timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResourceFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RewriteError> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|err| RewriteError::FetchFailed {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;

        let mut headers = ResponseHeaders::new(response.status().as_u16());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.add(name.as_str(), value);
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| RewriteError::FetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        Ok(FetchedResource { headers, body })
    }
}
