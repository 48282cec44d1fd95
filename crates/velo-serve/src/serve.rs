//! The fetch path: serving content-addressed artifact requests.
//!
//! A request whose leaf decodes to `(id, name, hash, ext)` is served
//! from cache when possible, otherwise rebuilt under the artifact's
//! named lock so that concurrent requests coalesce onto one origin
//! fetch and one build.

use crate::error::{Result, ServeError};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use velo_cache::{now_ms, CacheLookup, ResponseHeaders};
use velo_rewrite::{FilterId, RewriteEngine, ARTIFACT_CACHE_CONTROL};
use velo_types::ResourceNamer;

/// Lifetime granted when the requested hash does not match the bytes
/// we can produce today; the stale reference should not pin a private
/// cache for a year.
const MISMATCH_CACHE_CONTROL: &str = "private, max-age=300";

/// An artifact ready to stream. `Content-Length` is the transport's
/// concern and is never carried in `headers`.
#[derive(Debug)]
pub struct ServedArtifact {
    pub headers: ResponseHeaders,
    pub body: Bytes,
}

/// Serves one artifact request.
///
/// Decode failure is [`ServeError::NotFound`]; a build that misses its
/// deadline is [`ServeError::BuildTimeout`]; origin 4xx pass through.
pub async fn serve_rewritten(
    engine: &RewriteEngine,
    request_url: &Url,
    cancel: &CancellationToken,
) -> Result<ServedArtifact> {
    let path = request_url.path();
    let (parent, leaf) = match path.rfind('/') {
        Some(at) => (&path[..=at], &path[at + 1..]),
        None => ("/", path),
    };
    let namer = ResourceNamer::decode(leaf)
        .ok_or_else(|| ServeError::NotFound(format!("undecodable leaf {leaf:?}")))?;
    let filter = FilterId::from_code(&namer.id)
        .ok_or_else(|| ServeError::NotFound(format!("unknown filter id {:?}", namer.id)))?;

    // The common case: the artifact was written back by the HTML path
    // or by an earlier request.
    match engine.cache().get(request_url.as_str(), now_ms()) {
        Ok(CacheLookup::Hit { headers, body }) => {
            debug!(url = %request_url, "artifact cache hit");
            return Ok(ServedArtifact {
                headers: response_headers(&headers, ARTIFACT_CACHE_CONTROL),
                body,
            });
        }
        Ok(_) => {}
        Err(err) => {
            // Read errors read as a miss.
            debug!(url = %request_url, error = %err, "artifact cache read failed");
        }
    }

    // Rebuild from the origin. The named lock inside makes concurrent
    // requests for this hash coalesce.
    let origin_url = request_url
        .join(&format!("{parent}{}", namer.name))
        .map_err(|err| ServeError::NotFound(err.to_string()))?;
    info!(url = %request_url, origin = %origin_url, "rebuilding artifact");
    let artifact = engine.rebuild(&origin_url, filter, cancel).await?;

    let cache_control = if artifact.hash == namer.hash {
        ARTIFACT_CACHE_CONTROL
    } else {
        // The HTML that emitted this URL referenced an older build.
        debug!(
            requested = %namer.hash,
            built = %artifact.hash,
            "hash mismatch, serving current bytes with short lifetime"
        );
        MISMATCH_CACHE_CONTROL
    };
    Ok(ServedArtifact {
        headers: response_headers(&artifact.headers, cache_control),
        body: artifact.body,
    })
}

/// Copies stored headers for the wire, replacing the cache policy and
/// dropping anything the transport recomputes.
fn response_headers(stored: &ResponseHeaders, cache_control: &str) -> ResponseHeaders {
    let mut headers = ResponseHeaders::new(200);
    for (name, value) in stored.iter() {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("cache-control")
            || name.eq_ignore_ascii_case("date")
        {
            continue;
        }
        headers.add(name, value);
    }
    headers.set("Cache-Control", cache_control);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{padded_png, test_engine, MockFetcher};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use velo_rewrite::FetchedResource;

    #[tokio::test]
    async fn undecodable_path_is_not_found() {
        let (engine, _fetcher) = test_engine();
        let url = Url::parse("http://o.com/a.png").unwrap();
        let err = serve_rewritten(&engine, &url, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServeError::NotFound(_)));
    }

    #[tokio::test]
    async fn cache_miss_rebuilds_from_origin() {
        let (engine, fetcher) = test_engine();
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );

        // Build once through the engine to learn the real hash.
        let origin = Url::parse("http://o.com/a.png").unwrap();
        let built = engine
            .rebuild(&origin, FilterId::ImageCompress, &CancellationToken::new())
            .await
            .unwrap();

        // Forget the artifact, keep the URL: the next request rebuilds.
        engine.cache().delete(&built.output_url).unwrap();
        let url = Url::parse(&built.output_url).unwrap();
        let served = serve_rewritten(&engine, &url, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(served.body, built.body);
        assert_eq!(
            served.headers.get("Cache-Control"),
            Some(ARTIFACT_CACHE_CONTROL)
        );
    }

    #[tokio::test]
    async fn stale_hash_serves_current_bytes_with_short_lifetime() {
        let (engine, fetcher) = test_engine();
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );

        let url = Url::parse(
            "http://o.com/a.png.pagespeed.ic.0000000000.png",
        )
        .unwrap();
        let served = serve_rewritten(&engine, &url, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            served.headers.get("Cache-Control"),
            Some(MISMATCH_CACHE_CONTROL)
        );
        assert!(!served.body.is_empty());
    }

    #[tokio::test]
    async fn origin_client_errors_pass_through() {
        let (engine, fetcher) = test_engine();
        let mut gone = FetchedResource::ok("image/png", padded_png());
        gone.headers = velo_cache::ResponseHeaders::new(410);
        fetcher.insert("http://o.com/gone.png", gone);

        let url = Url::parse(
            "http://o.com/gone.png.pagespeed.ic.0000000000.png",
        )
        .unwrap();
        let err = serve_rewritten(&engine, &url, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServeError::OriginClientError(410)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_requests_coalesce_on_one_fetch() {
        let (engine, fetcher) = test_engine();
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let engine = Arc::new(engine);
        let url = Arc::new(Url::parse("http://o.com/a.png.pagespeed.ic.0000000000.png").unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let url = Arc::clone(&url);
            handles.push(tokio::spawn(async move {
                serve_rewritten(&engine, &url, &CancellationToken::new())
                    .await
                    .map(|served| served.body)
            }));
        }
        let mut bodies = Vec::new();
        for handle in handles {
            bodies.push(handle.await.unwrap().unwrap());
        }

        // One request won the lock and fetched; everyone else read the
        // writeback.
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 1);
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
