//! Origin fetch seam.

use crate::error::RewriteError;
use async_trait::async_trait;
use bytes::Bytes;
use velo_cache::ResponseHeaders;

/// A fetched origin response.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub headers: ResponseHeaders,
    pub body: Bytes,
}

impl FetchedResource {
    /// Convenience constructor for a 200 response.
    pub fn ok(content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = ResponseHeaders::new(200);
        headers.add("Content-Type", content_type);
        Self {
            headers,
            body: body.into(),
        }
    }
}

/// Asynchronous origin fetcher.
///
/// Implementations must enforce their own transport timeout; callers
/// additionally bound every fetch with the rewrite deadline.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetches `url` from the origin.
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RewriteError>;
}
