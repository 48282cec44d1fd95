//! End-to-end rewrite scenarios.
//!
//! Each test drives a whole document through the public surface:
//! engine construction, driver parse/flush, cache warm-up, and the
//! failure paths that must leave the markup untouched.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use velo_cache::{CacheBackend, HttpCache, LruBackend, ResponseHeaders};
use velo_lock::{InMemoryLockManager, LockManager};
use velo_rewrite::{
    DomainPolicy, FetchedResource, FilterId, ResourceFetcher, RewriteDriver, RewriteEngine,
    RewriteError, RewriteOutcome,
};
use velo_types::{ContentDigest, ResourceNamer, RewriteOptions};

/// Canned-response fetcher with optional per-fetch delay.
struct FakeOrigin {
    responses: Mutex<HashMap<String, FetchedResource>>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl FakeOrigin {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn insert(&self, url: &str, resource: FetchedResource) {
        self.responses.lock().insert(url.to_string(), resource);
    }
}

#[async_trait]
impl ResourceFetcher for FakeOrigin {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RewriteError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| RewriteError::FetchFailed {
                url: url.to_string(),
                reason: "no canned response".to_string(),
            })
    }
}

fn engine(origin: Arc<FakeOrigin>, policy: DomainPolicy) -> Arc<RewriteEngine> {
    let backend: Arc<dyn CacheBackend> = Arc::new(LruBackend::with_defaults());
    let locks: Arc<dyn LockManager> = Arc::new(InMemoryLockManager::new());
    Arc::new(RewriteEngine::new(
        Arc::new(HttpCache::new(backend)),
        locks,
        origin as Arc<dyn ResourceFetcher>,
        policy,
        RewriteOptions::default(),
    ))
}

fn doc_url() -> Url {
    Url::parse("http://o.com/index.html").unwrap()
}

/// 10KB image, half of it strippable padding.
fn image_10kb() -> Vec<u8> {
    let mut bytes = vec![0x89u8; 5 * 1024];
    bytes.extend(std::iter::repeat(0u8).take(5 * 1024));
    bytes
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_rewrite_emits_hash_of_optimized_bytes() {
    let origin = Arc::new(FakeOrigin::new());
    origin.insert(
        "http://o.com/a.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());
    let mut driver = RewriteDriver::new(engine, doc_url());

    driver.parse("<img src=\"http://o.com/a.png\">");
    let out = driver.flush_with_deadline(500).await;

    // The hash in the emitted URL is the digest of the *optimized*
    // bytes at the configured length.
    let optimized = &image_10kb()[..5 * 1024];
    let expected_hash = ContentDigest::compute(optimized, 10);
    let expected = format!(
        "<img src=\"http://o.com/a.png.pagespeed.ic.{}.png\">",
        expected_hash
    );
    assert_eq!(out, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn warm_rewrite_serves_from_metadata_without_refetch() {
    let origin = Arc::new(FakeOrigin::new());
    origin.insert(
        "http://o.com/a.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());

    let mut first = RewriteDriver::new(Arc::clone(&engine), doc_url());
    first.parse("<img src=\"a.png\">");
    let first_out = first.finish().await;

    let fetches = origin.fetches.load(Ordering::Relaxed);
    let mut second = RewriteDriver::new(Arc::clone(&engine), doc_url());
    second.parse("<img src=\"a.png\">");
    let second_out = second.finish().await;

    assert_eq!(first_out, second_out);
    assert!(first_out.contains(".pagespeed.ic."));
    assert_eq!(origin.fetches.load(Ordering::Relaxed), fetches);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_origin_misses_deadline_and_document_is_unmodified() {
    let origin = Arc::new(FakeOrigin::slow(Duration::from_millis(300)));
    origin.insert(
        "http://o.com/a.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());
    let mut driver = RewriteDriver::new(Arc::clone(&engine), doc_url());

    let input = "<html><img src=\"a.png\"></html>";
    driver.parse(input);
    let out = driver.flush_with_deadline(20).await;

    assert_eq!(out, input);
    assert_eq!(driver.stats().rewrites_expired, 1);

    // The detached build finishes and warms the cache for the next
    // document.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let mut next = RewriteDriver::new(engine, doc_url());
    next.parse(input);
    let warm = next.flush_with_deadline(500).await;
    assert!(warm.contains(".pagespeed.ic."), "output: {warm}");
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_domains_pass_through_verbatim() {
    let origin = Arc::new(FakeOrigin::new());
    origin.insert(
        "http://cdn.partner.example/a.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    origin.insert(
        "http://o.com/b.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    // partner CDN is not authorized; only same-origin rewrites.
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());
    let mut driver = RewriteDriver::new(engine, doc_url());

    driver.parse(
        "<img src=\"http://cdn.partner.example/a.png\"><img src=\"b.png\">",
    );
    let out = driver.finish().await;

    assert!(out.contains("src=\"http://cdn.partner.example/a.png\""));
    assert!(out.contains("b.png.pagespeed.ic."));
}

#[tokio::test(flavor = "multi_thread")]
async fn mapped_domain_appears_in_output_urls() {
    let origin = Arc::new(FakeOrigin::new());
    origin.insert(
        "http://o.com/a.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    let mut policy = DomainPolicy::new();
    policy.add_domain_mapping("cdn.o.com", &["o.com"]).unwrap();
    let engine = engine(Arc::clone(&origin), policy);
    let mut driver = RewriteDriver::new(engine, doc_url());

    driver.parse("<img src=\"a.png\">");
    let out = driver.finish().await;

    assert!(
        out.contains("src=\"http://cdn.o.com/a.png.pagespeed.ic."),
        "output: {out}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stylesheet_and_script_references_are_rewritten() {
    let origin = Arc::new(FakeOrigin::new());
    origin.insert(
        "http://o.com/site.css",
        FetchedResource::ok("text/css", "/* styles */ body { margin: 0; }"),
    );
    origin.insert(
        "http://o.com/app.js",
        FetchedResource::ok(
            "application/javascript",
            "// entry\nfunction main() {   return 1; }\n",
        ),
    );
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());
    let mut driver = RewriteDriver::new(engine, doc_url());

    driver.parse(
        "<link rel=\"stylesheet\" href=\"site.css\"><script src=\"app.js\"></script>",
    );
    let out = driver.finish().await;

    assert!(out.contains("site.css.pagespeed.cf."), "output: {out}");
    assert!(out.contains("app.js.pagespeed.jm."), "output: {out}");
}

#[tokio::test(flavor = "multi_thread")]
async fn emitted_urls_decode_back_to_their_parts() {
    let origin = Arc::new(FakeOrigin::new());
    origin.insert(
        "http://o.com/a.png",
        FetchedResource::ok("image/png", image_10kb()),
    );
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());
    let cancel = CancellationToken::new();

    let outcome = engine
        .rewrite(&doc_url(), "a.png", FilterId::ImageCompress, &cancel)
        .await;
    let RewriteOutcome::Rewritten { url } = outcome else {
        panic!("expected rewrite");
    };
    let leaf = url.rsplit('/').next().unwrap();
    let namer = ResourceNamer::decode(leaf).expect("emitted leaf must decode");
    assert_eq!(namer.id, "ic");
    assert_eq!(namer.name, "a.png");
    assert_eq!(namer.ext, "png");
    assert_eq!(namer.hash.len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn uncacheable_origin_still_rewrites_with_implicit_ttl() {
    let origin = Arc::new(FakeOrigin::new());
    // No Cache-Control, no Expires: implicit freshness applies to the
    // remembered decision; the artifact itself is immutable anyway.
    let mut headers = ResponseHeaders::new(200);
    headers.add("Content-Type", "image/png");
    origin.insert(
        "http://o.com/a.png",
        FetchedResource {
            headers,
            body: image_10kb().into(),
        },
    );
    let engine = engine(Arc::clone(&origin), DomainPolicy::new());
    let mut driver = RewriteDriver::new(engine, doc_url());

    driver.parse("<img src=\"a.png\">");
    let out = driver.finish().await;
    assert!(out.contains(".pagespeed.ic."), "output: {out}");
}
