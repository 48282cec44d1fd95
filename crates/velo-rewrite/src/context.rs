//! Rewrite contexts and the engine that runs them.
//!
//! A [`RewriteContext`] carries one resource through the rewrite
//! pipeline: metadata lookup, origin fetch, single-flight lock, codec
//! build, and cache writeback. The [`RewriteEngine`] bundles the
//! collaborators every context needs; callers construct it explicitly
//! and share it by `Arc`; there is no process-global state.

use crate::domain::DomainPolicy;
use crate::error::RewriteError;
use crate::fetcher::ResourceFetcher;
use crate::filter::{
    find_css_urls, CacheExtender, CssMinifier, FilterId, ImageOptimizer, JsMinifier, Optimized,
    RewriteFilter,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use velo_cache::{now_ms, CacheBackend, CacheLookup, HttpCache, ResponseHeaders};
use velo_lock::{LockManager, NamedLock};
use velo_types::{ContentDigest, ContentType, Fingerprint, ResourceNamer, RewriteOptions};

/// Shared cache type used throughout the rewriting core.
pub type SharedCache = HttpCache<Arc<dyn CacheBackend>>;

/// Freshness granted to origins that supply no caching headers.
const IMPLICIT_TTL_MS: u64 = 300_000;

/// Cache-lifetime policy for served artifacts. The URL is
/// content-addressed, so the bytes never change under it.
pub const ARTIFACT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Namespace prefix keeping rewrite metadata apart from artifact
/// entries in the shared cache.
const METADATA_PREFIX: &str = "vmd/";

/// Cached decision for one fingerprint.
///
/// `ok == false` remembers "do not rewrite" (codec refusal, oversized
/// output URL) for the input's freshness lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResult {
    ok: bool,
    url: Option<String>,
}

/// What a finished context tells its slots to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Replace the reference with the content-addressed URL.
    Rewritten { url: String },
    /// Emit the original reference.
    Unchanged,
}

/// A fully built artifact, ready to serve or write back.
#[derive(Debug, Clone)]
pub struct BuiltArtifact {
    pub output_url: String,
    pub hash: String,
    pub headers: ResponseHeaders,
    pub body: Bytes,
}

/// Pipeline position of a context. Terminal state is `Complete`;
/// every exit path passes through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    New,
    Lookup,
    Fetch,
    Lock,
    Build,
    Writeback,
    Complete,
}

/// Whether the build lock is taken before or after the origin fetch.
/// The HTML path fetches first; the fetch path locks first so
/// concurrent requests for one artifact share a single origin fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOrder {
    BeforeFetch,
    AfterFetch,
}

#[derive(Debug, Default)]
struct EngineMetrics {
    completed: AtomicU64,
    unchanged: AtomicU64,
    fetch_failures: AtomicU64,
    codec_refusals: AtomicU64,
    lock_bypasses: AtomicU64,
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub completed: u64,
    pub unchanged: u64,
    pub fetch_failures: u64,
    pub codec_refusals: u64,
    pub lock_bypasses: u64,
}

/// The collaborators shared by every rewrite in one deployment.
pub struct RewriteEngine {
    cache: Arc<SharedCache>,
    locks: Arc<dyn LockManager>,
    fetcher: Arc<dyn ResourceFetcher>,
    policy: DomainPolicy,
    options: RewriteOptions,
    filters: HashMap<FilterId, Arc<dyn RewriteFilter>>,
    metrics: EngineMetrics,
}

impl RewriteEngine {
    /// Builds an engine over explicit collaborators, installing the
    /// default codec for every filter id.
    pub fn new(
        cache: Arc<SharedCache>,
        locks: Arc<dyn LockManager>,
        fetcher: Arc<dyn ResourceFetcher>,
        policy: DomainPolicy,
        options: RewriteOptions,
    ) -> Self {
        let mut filters: HashMap<FilterId, Arc<dyn RewriteFilter>> = HashMap::new();
        filters.insert(FilterId::ImageCompress, Arc::new(ImageOptimizer));
        filters.insert(FilterId::CssRewrite, Arc::new(CssMinifier));
        filters.insert(FilterId::JsMinify, Arc::new(JsMinifier));
        filters.insert(FilterId::CacheExtend, Arc::new(CacheExtender));
        Self {
            cache,
            locks,
            fetcher,
            policy,
            options,
            filters,
            metrics: EngineMetrics::default(),
        }
    }

    /// Swaps in a different codec for `id`.
    pub fn set_filter(&mut self, id: FilterId, filter: Arc<dyn RewriteFilter>) {
        self.filters.insert(id, filter);
    }

    pub fn options(&self) -> &RewriteOptions {
        &self.options
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            completed: self.metrics.completed.load(Ordering::Relaxed),
            unchanged: self.metrics.unchanged.load(Ordering::Relaxed),
            fetch_failures: self.metrics.fetch_failures.load(Ordering::Relaxed),
            codec_refusals: self.metrics.codec_refusals.load(Ordering::Relaxed),
            lock_bypasses: self.metrics.lock_bypasses.load(Ordering::Relaxed),
        }
    }

    /// Rewrites one reference found in `doc`. Never errors: every
    /// failure mode collapses to [`RewriteOutcome::Unchanged`].
    pub async fn rewrite(
        &self,
        doc: &Url,
        input_url: &str,
        filter: FilterId,
        cancel: &CancellationToken,
    ) -> RewriteOutcome {
        let outcome = RewriteContext::new(self, filter)
            .run(doc, input_url, cancel)
            .await;
        match &outcome {
            RewriteOutcome::Rewritten { .. } => {
                self.metrics.completed.fetch_add(1, Ordering::Relaxed);
            }
            RewriteOutcome::Unchanged => {
                self.metrics.unchanged.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Rebuilds an artifact on the fetch path: fetch, single-flight
    /// lock, build, write back. Used when a request for a
    /// content-addressed URL misses the cache.
    pub async fn rebuild(
        &self,
        origin: &Url,
        filter: FilterId,
        cancel: &CancellationToken,
    ) -> Result<BuiltArtifact, RewriteError> {
        let mut context = RewriteContext::new(self, filter);
        context.rebuild(origin, cancel).await
    }

    fn filter_for(&self, id: FilterId) -> Arc<dyn RewriteFilter> {
        // The map is populated for every id at construction.
        Arc::clone(&self.filters[&id])
    }

    fn metadata_key(fingerprint: &Fingerprint) -> String {
        format!("{METADATA_PREFIX}{fingerprint}")
    }
}

/// One resource moving through the pipeline.
struct RewriteContext<'e> {
    engine: &'e RewriteEngine,
    filter_id: FilterId,
    state: ContextState,
    /// Canonical URLs of enclosing rewrites; a CSS file referencing
    /// itself (directly or through a chain) is detected here and left
    /// unchanged instead of recursing forever.
    ancestors: Vec<String>,
}

impl<'e> RewriteContext<'e> {
    fn new(engine: &'e RewriteEngine, filter_id: FilterId) -> Self {
        Self {
            engine,
            filter_id,
            state: ContextState::New,
            ancestors: Vec::new(),
        }
    }

    async fn run(
        mut self,
        doc: &Url,
        input_url: &str,
        cancel: &CancellationToken,
    ) -> RewriteOutcome {
        let engine = self.engine;

        let Ok(resource) = doc.join(input_url) else {
            debug!(input_url, "unresolvable reference, skipping");
            return self.complete(RewriteOutcome::Unchanged);
        };
        if resource.scheme() != "http" && resource.scheme() != "https" {
            return self.complete(RewriteOutcome::Unchanged);
        }
        let Some(mapped_domain) = engine.policy.map_request_to_domain(doc, &resource) else {
            debug!(resource = %resource, "domain policy denied rewrite");
            return self.complete(RewriteOutcome::Unchanged);
        };

        if self.ancestors.iter().any(|a| a == resource.as_str()) {
            debug!(resource = %resource, "reference cycle, leaving unchanged");
            return self.complete(RewriteOutcome::Unchanged);
        }
        let fingerprint =
            Fingerprint::compute(&[resource.as_str()], self.filter_id.code(), &[]);

        // LOOKUP
        self.state = ContextState::Lookup;
        if let Some(outcome) = self.lookup_metadata(&fingerprint) {
            return self.complete(outcome);
        }

        match self
            .fetch_and_build(
                &resource,
                &mapped_domain,
                &fingerprint,
                cancel,
                LockOrder::AfterFetch,
            )
            .await
        {
            Ok(Some(artifact)) => {
                self.complete(RewriteOutcome::Rewritten {
                    url: artifact.output_url,
                })
            }
            Ok(None) => self.complete(RewriteOutcome::Unchanged),
            Err(err) => {
                debug!(resource = %resource, error = %err, "rewrite failed");
                self.complete(RewriteOutcome::Unchanged)
            }
        }
    }

    /// Fetch-path entry: no document, no policy check (the HTML that
    /// emitted the URL already passed policy), mapped domain is the
    /// origin's own host.
    async fn rebuild(
        &mut self,
        origin: &Url,
        cancel: &CancellationToken,
    ) -> Result<BuiltArtifact, RewriteError> {
        let host = origin
            .host_str()
            .ok_or_else(|| RewriteError::InvalidUrl(origin.to_string()))?
            .to_string();
        let fingerprint = Fingerprint::compute(&[origin.as_str()], self.filter_id.code(), &[]);
        match self
            .fetch_and_build(origin, &host, &fingerprint, cancel, LockOrder::BeforeFetch)
            .await?
        {
            Some(artifact) => Ok(artifact),
            None => Err(RewriteError::CodecRefused(format!(
                "{} not rewritable by {}",
                origin, self.filter_id
            ))),
        }
    }

    /// FETCH through WRITEBACK. `Ok(None)` means "decided not to
    /// rewrite" and the decision has been cached; `Err` means the
    /// attempt failed and may be retried after the negative TTL.
    async fn fetch_and_build(
        &mut self,
        resource: &Url,
        mapped_domain: &str,
        fingerprint: &Fingerprint,
        cancel: &CancellationToken,
        lock_order: LockOrder,
    ) -> Result<Option<BuiltArtifact>, RewriteError> {
        let engine = self.engine;
        let metadata_key = RewriteEngine::metadata_key(fingerprint);

        let mut lock = NamedLock::new(
            Arc::clone(&engine.locks),
            format!("velo-build:{fingerprint}"),
        );
        let wait = Duration::from_millis(engine.options.flush_deadline_ms);
        let steal = Duration::from_millis(engine.options.lock_steal_ms);

        // On the fetch path, requests for the same artifact coalesce
        // on the lock before anyone touches the origin: one fetch and
        // one build, everyone else reads the winner's writeback.
        if lock_order == LockOrder::BeforeFetch {
            self.state = ContextState::Lock;
            if !lock.lock_timed_wait_steal_old(wait, steal, cancel).await {
                engine.metrics.lock_bypasses.fetch_add(1, Ordering::Relaxed);
                return Err(RewriteError::DeadlineExceeded(format!(
                    "build lock for {resource}"
                )));
            }
            if let Some(outcome) = self.lookup_metadata(fingerprint) {
                return Ok(self.recover_artifact(outcome));
            }
            if let Err(err) = engine.cache.mark_in_transit(&metadata_key) {
                warn!(error = %err, "cache mark_in_transit failed");
            }
        }

        // FETCH
        self.state = ContextState::Fetch;
        let fetch_timeout = Duration::from_millis(engine.options.fetch_timeout_ms);
        let fetched = match tokio::time::timeout(
            fetch_timeout,
            engine.fetcher.fetch(resource.as_str()),
        )
        .await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(err)) => {
                self.remember_failure(&metadata_key);
                return Err(err);
            }
            Err(_) => {
                self.remember_failure(&metadata_key);
                return Err(RewriteError::DeadlineExceeded(format!(
                    "origin fetch for {resource}"
                )));
            }
        };
        if fetched.headers.status() != 200 {
            self.remember_failure(&metadata_key);
            return Err(RewriteError::OriginStatus {
                url: resource.to_string(),
                status: fetched.headers.status(),
            });
        }

        let Some(content_type) = sniff_content_type(&fetched.headers, resource) else {
            self.store_decision(&metadata_key, &fetched.headers, None);
            return Ok(None);
        };

        // LOCK: one builder per fingerprint across the process.
        if lock_order == LockOrder::AfterFetch {
            self.state = ContextState::Lock;
            if !lock.lock_timed_wait_steal_old(wait, steal, cancel).await {
                // Someone else is building; their output lands in the
                // cache for the next page load.
                engine.metrics.lock_bypasses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            // The winner of a lock race may find the loser's work done.
            if let Some(outcome) = self.lookup_metadata(fingerprint) {
                return Ok(self.recover_artifact(outcome));
            }
            if let Err(err) = engine.cache.mark_in_transit(&metadata_key) {
                warn!(error = %err, "cache mark_in_transit failed");
            }
        }

        // BUILD
        self.state = ContextState::Build;
        let filter = engine.filter_for(self.filter_id);
        let optimized = match filter.optimize(&fetched.body, content_type) {
            Ok(optimized) => optimized,
            Err(err) => {
                debug!(resource = %resource, error = %err, "codec refused");
                engine
                    .metrics
                    .codec_refusals
                    .fetch_add(1, Ordering::Relaxed);
                self.store_decision(&metadata_key, &fetched.headers, None);
                return Ok(None);
            }
        };
        let optimized = if self.filter_id == FilterId::CssRewrite {
            self.rewrite_css_children(resource, optimized, cancel).await
        } else {
            optimized
        };

        // WRITEBACK
        self.state = ContextState::Writeback;
        let hash = ContentDigest::compute(&optimized.bytes, engine.options.hash_length_chars);
        let Some(output_url) =
            self.output_url(resource, mapped_domain, &hash, optimized.content_type)
        else {
            self.store_decision(&metadata_key, &fetched.headers, None);
            return Ok(None);
        };

        let artifact_headers = artifact_headers(&fetched.headers, optimized.content_type);
        if let Err(err) =
            engine
                .cache
                .put(&output_url, &artifact_headers, &optimized.bytes, now_ms())
        {
            // Slots still render from the in-memory artifact; the next
            // page load re-runs the build.
            warn!(key = %output_url, error = %err, "artifact writeback failed");
        }
        self.store_decision(&metadata_key, &fetched.headers, Some(&output_url));
        lock.unlock();

        Ok(Some(BuiltArtifact {
            output_url,
            hash: hash.as_str().to_string(),
            headers: artifact_headers,
            body: optimized.bytes,
        }))
    }

    /// Rewrites `url(...)` references inside an optimized CSS body.
    /// Children that cannot be rewritten keep their original text.
    async fn rewrite_css_children(
        &self,
        css_url: &Url,
        optimized: Optimized,
        cancel: &CancellationToken,
    ) -> Optimized {
        let Ok(text) = std::str::from_utf8(&optimized.bytes) else {
            return optimized;
        };
        let refs = find_css_urls(text);
        if refs.is_empty() {
            return optimized;
        }

        let mut out = text.to_string();
        // Right to left so earlier ranges stay valid.
        for (range, child_url) in refs.into_iter().rev() {
            let child_filter = match child_content_type(&child_url) {
                Some(ct) if ct.is_image() => FilterId::ImageCompress,
                _ => FilterId::CacheExtend,
            };
            let outcome = self
                .rewrite_child(css_url, &child_url, child_filter, cancel)
                .await;
            if let RewriteOutcome::Rewritten { url } = outcome {
                out.replace_range(range, &url);
            }
        }
        Optimized {
            bytes: Bytes::from(out),
            content_type: optimized.content_type,
        }
    }

    fn rewrite_child<'a>(
        &'a self,
        css_url: &'a Url,
        child_url: &'a str,
        filter: FilterId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, RewriteOutcome> {
        async move {
            let mut child = RewriteContext::new(self.engine, filter);
            child.ancestors = self.ancestors.clone();
            child.ancestors.push(css_url.as_str().to_string());
            child.run(css_url, child_url, cancel).await
        }
        .boxed()
    }

    /// Checks the metadata cache for a previously made decision.
    fn lookup_metadata(&self, fingerprint: &Fingerprint) -> Option<RewriteOutcome> {
        let key = RewriteEngine::metadata_key(fingerprint);
        match self.engine.cache.get(&key, now_ms()) {
            Ok(CacheLookup::Hit { body, .. }) => {
                match serde_json::from_slice::<CachedResult>(&body) {
                    Ok(CachedResult { ok: true, url: Some(url) }) => {
                        Some(RewriteOutcome::Rewritten { url })
                    }
                    Ok(_) => Some(RewriteOutcome::Unchanged),
                    Err(err) => {
                        warn!(%key, error = %err, "undecodable rewrite metadata");
                        let _ = self.engine.cache.delete(&key);
                        None
                    }
                }
            }
            Ok(CacheLookup::RecentFailure) => Some(RewriteOutcome::Unchanged),
            Ok(CacheLookup::Miss) => None,
            Err(err) => {
                // Cache read errors read as a miss.
                warn!(%key, error = %err, "metadata cache read failed");
                None
            }
        }
    }

    /// Reads an already built artifact back out of the cache.
    fn fetch_artifact(&self, output_url: &str) -> Option<(ResponseHeaders, Bytes)> {
        match self.engine.cache.get(output_url, now_ms()) {
            Ok(CacheLookup::Hit { headers, body }) => Some((headers, body)),
            _ => None,
        }
    }

    /// Turns another builder's cached decision into an artifact.
    fn recover_artifact(&self, outcome: RewriteOutcome) -> Option<BuiltArtifact> {
        match outcome {
            RewriteOutcome::Rewritten { url } => {
                self.fetch_artifact(&url).map(|(headers, body)| BuiltArtifact {
                    hash: hash_of(&url),
                    output_url: url,
                    headers,
                    body,
                })
            }
            RewriteOutcome::Unchanged => None,
        }
    }

    /// Persists a rewrite decision for the input's freshness lifetime.
    fn store_decision(&self, key: &str, origin: &ResponseHeaders, output_url: Option<&str>) {
        let now = now_ms();
        let ttl_ms = origin
            .expiry_ms(now)
            .and_then(|expiry| expiry.checked_sub(now))
            .filter(|&ttl| ttl > 0)
            .unwrap_or(IMPLICIT_TTL_MS);
        let mut headers = ResponseHeaders::new(200);
        headers.add("Cache-Control", &format!("max-age={}", ttl_ms.div_ceil(1000)));
        let result = CachedResult {
            ok: output_url.is_some(),
            url: output_url.map(str::to_string),
        };
        let body = match serde_json::to_vec(&result) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "rewrite metadata serialization failed");
                return;
            }
        };
        if let Err(err) = self.engine.cache.put(key, &headers, &body, now) {
            // Dropped writes cost a rebuild, nothing more.
            warn!(%key, error = %err, "metadata writeback failed");
        }
    }

    /// Remembers a fetch failure so the origin is not hammered.
    fn remember_failure(&self, key: &str) {
        self.engine
            .metrics
            .fetch_failures
            .fetch_add(1, Ordering::Relaxed);
        let ttl = self.engine.options.negative_cache_ttl_ms;
        if let Err(err) = self.engine.cache.put_failure(key, ttl, now_ms()) {
            warn!(%key, error = %err, "negative cache write failed");
        }
    }

    /// Builds the content-addressed output URL, or `None` when the
    /// encoded form would exceed the configured length bound.
    fn output_url(
        &self,
        resource: &Url,
        mapped_domain: &str,
        hash: &ContentDigest,
        content_type: ContentType,
    ) -> Option<String> {
        let path = resource.path();
        let (parent, leaf) = match path.rfind('/') {
            Some(at) => (&path[..=at], &path[at + 1..]),
            None => ("/", path),
        };
        let leaf = if leaf.is_empty() { "index" } else { leaf };

        let namer = ResourceNamer::new(
            self.filter_id.code(),
            leaf,
            hash.as_str(),
            content_type.extension(),
        )
        .ok()?;
        let output_path = format!("{parent}{}", namer.encode());
        let url = self.engine.policy.resolve_path(
            resource.scheme(),
            mapped_domain,
            hash.as_str(),
            &output_path,
        );
        if url.len() > self.engine.options.max_output_url_length {
            debug!(len = url.len(), "encoded url over length bound, skipping");
            return None;
        }
        Some(url)
    }

    fn complete(&mut self, outcome: RewriteOutcome) -> RewriteOutcome {
        debug!(from = ?self.state, "context complete");
        self.state = ContextState::Complete;
        outcome
    }
}

/// Content type of a fetched resource: the origin's `Content-Type`
/// wins, the URL extension is the fallback.
fn sniff_content_type(headers: &ResponseHeaders, resource: &Url) -> Option<ContentType> {
    if let Some(mime) = headers.get("Content-Type") {
        if let Some(ct) = ContentType::from_mime(mime) {
            return Some(ct);
        }
    }
    child_content_type(resource.path())
}

fn child_content_type(url: &str) -> Option<ContentType> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let leaf = path.rsplit('/').next().unwrap_or(path);
    let ext = leaf.rsplit_once('.').map(|(_, ext)| ext)?;
    ContentType::from_extension(&ext.to_ascii_lowercase())
}

/// Headers for a served artifact: long immutable lifetime, recomputed
/// type, and `Vary` copied only when the origin varied on encoding
/// alone.
fn artifact_headers(origin: &ResponseHeaders, content_type: ContentType) -> ResponseHeaders {
    let mut headers = ResponseHeaders::new(200);
    headers.add("Content-Type", content_type.mime());
    headers.add("Cache-Control", ARTIFACT_CACHE_CONTROL);
    let vary: Vec<&str> = origin.get_all("Vary");
    if !vary.is_empty()
        && vary
            .iter()
            .flat_map(|v| v.split(','))
            .all(|token| token.trim().eq_ignore_ascii_case("accept-encoding"))
    {
        headers.add("Vary", "Accept-Encoding");
    }
    headers
}

/// Hash field of an encoded output URL, used when the artifact is
/// recovered from cache rather than freshly built.
fn hash_of(output_url: &str) -> String {
    let leaf = output_url.rsplit('/').next().unwrap_or(output_url);
    ResourceNamer::decode(leaf)
        .map(|n| n.hash)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::MockFetcher;
    use crate::fetcher::FetchedResource;
    use velo_cache::LruBackend;
    use velo_lock::InMemoryLockManager;

    fn engine_with(fetcher: Arc<MockFetcher>) -> RewriteEngine {
        let backend: Arc<dyn CacheBackend> = Arc::new(LruBackend::with_defaults());
        let cache = Arc::new(HttpCache::new(backend));
        let locks: Arc<dyn LockManager> = Arc::new(InMemoryLockManager::new());
        RewriteEngine::new(
            cache,
            locks,
            fetcher,
            DomainPolicy::new(),
            RewriteOptions::default(),
        )
    }

    fn doc() -> Url {
        Url::parse("http://o.com/index.html").unwrap()
    }

    /// A 10KB "image" whose back half is zero padding, so the stand-in
    /// optimizer has something to strip.
    fn padded_png() -> Vec<u8> {
        let mut bytes = vec![0x89u8; 5 * 1024];
        bytes.extend(std::iter::repeat(0u8).take(5 * 1024));
        bytes
    }

    #[tokio::test]
    async fn cold_rewrite_produces_content_addressed_url() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(&doc(), "a.png", FilterId::ImageCompress, &cancel)
            .await;
        let RewriteOutcome::Rewritten { url } = outcome else {
            panic!("expected rewrite");
        };
        assert!(url.starts_with("http://o.com/a.png.pagespeed.ic."));
        assert!(url.ends_with(".png"));
        let leaf = url.rsplit('/').next().unwrap();
        let namer = ResourceNamer::decode(leaf).unwrap();
        assert_eq!(namer.hash.len(), engine.options().hash_length_chars);

        // The artifact is in cache under the output URL.
        assert!(engine.cache().get(&url, now_ms()).unwrap().is_hit());
    }

    #[tokio::test]
    async fn warm_rewrite_skips_the_origin() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let first = engine
            .rewrite(&doc(), "a.png", FilterId::ImageCompress, &cancel)
            .await;
        let fetches_after_first = fetcher.fetches.load(Ordering::Relaxed);
        let second = engine
            .rewrite(&doc(), "a.png", FilterId::ImageCompress, &cancel)
            .await;
        assert_eq!(first, second);
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), fetches_after_first);
    }

    #[tokio::test]
    async fn fetch_failure_is_remembered() {
        let fetcher = Arc::new(MockFetcher::new());
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(&doc(), "missing.png", FilterId::ImageCompress, &cancel)
            .await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 1);

        // The negative entry suppresses the retry.
        let again = engine
            .rewrite(&doc(), "missing.png", FilterId::ImageCompress, &cancel)
            .await;
        assert_eq!(again, RewriteOutcome::Unchanged);
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 1);
        assert_eq!(engine.stats().fetch_failures, 1);
    }

    #[tokio::test]
    async fn codec_refusal_is_cached_as_do_not_rewrite() {
        let fetcher = Arc::new(MockFetcher::new());
        // No padding to strip, so the optimizer refuses.
        fetcher.insert(
            "http://o.com/tight.png",
            FetchedResource::ok("image/png", vec![1u8; 64]),
        );
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(&doc(), "tight.png", FilterId::ImageCompress, &cancel)
            .await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
        assert_eq!(engine.stats().codec_refusals, 1);

        // The decision is remembered; no second fetch.
        let fetches = fetcher.fetches.load(Ordering::Relaxed);
        engine
            .rewrite(&doc(), "tight.png", FilterId::ImageCompress, &cancel)
            .await;
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), fetches);
    }

    #[tokio::test]
    async fn unauthorized_domain_is_left_alone() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://third-party.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(
                &doc(),
                "http://third-party.com/a.png",
                FilterId::ImageCompress,
                &cancel,
            )
            .await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
        // Policy denial happens before any fetch.
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn css_children_are_rewritten_recursively() {
        let fetcher = Arc::new(MockFetcher::new());
        let css = "/* banner */\nbody {\n  background: url(bg.png);\n}\n";
        fetcher.insert("http://o.com/site.css", FetchedResource::ok("text/css", css));
        fetcher.insert(
            "http://o.com/bg.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(&doc(), "site.css", FilterId::CssRewrite, &cancel)
            .await;
        let RewriteOutcome::Rewritten { url } = outcome else {
            panic!("expected css rewrite");
        };
        let CacheLookup::Hit { body, .. } = engine.cache().get(&url, now_ms()).unwrap() else {
            panic!("artifact missing");
        };
        let css_out = std::str::from_utf8(&body).unwrap();
        assert!(css_out.contains("bg.png.pagespeed.ic."));
        assert!(!css_out.contains("banner"));
    }

    #[tokio::test]
    async fn self_referencing_css_does_not_recurse() {
        let fetcher = Arc::new(MockFetcher::new());
        // Comment padding makes minification succeed; the import
        // points back at the file itself.
        let css = "/* pad pad pad pad */ @import url(loop.css); a { color: red; }";
        fetcher.insert("http://o.com/loop.css", FetchedResource::ok("text/css", css));
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(&doc(), "loop.css", FilterId::CssRewrite, &cancel)
            .await;
        // The outer rewrite succeeds; the cyclic child is untouched.
        let RewriteOutcome::Rewritten { url } = outcome else {
            panic!("expected rewrite");
        };
        let CacheLookup::Hit { body, .. } = engine.cache().get(&url, now_ms()).unwrap() else {
            panic!("artifact missing");
        };
        let css_out = std::str::from_utf8(&body).unwrap();
        assert!(css_out.contains("url(loop.css)"));
    }

    #[tokio::test]
    async fn oversized_output_url_is_not_rewritten() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let mut options = RewriteOptions::default();
        options.max_output_url_length = 40;
        let backend: Arc<dyn CacheBackend> = Arc::new(LruBackend::with_defaults());
        let engine = RewriteEngine::new(
            Arc::new(HttpCache::new(backend)),
            Arc::new(InMemoryLockManager::new()),
            Arc::clone(&fetcher) as Arc<dyn ResourceFetcher>,
            DomainPolicy::new(),
            options,
        );
        let cancel = CancellationToken::new();

        let outcome = engine
            .rewrite(&doc(), "a.png", FilterId::ImageCompress, &cancel)
            .await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn rebuild_returns_the_artifact() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://o.com/a.png",
            FetchedResource::ok("image/png", padded_png()),
        );
        let engine = engine_with(Arc::clone(&fetcher));
        let cancel = CancellationToken::new();

        let origin = Url::parse("http://o.com/a.png").unwrap();
        let artifact = engine
            .rebuild(&origin, FilterId::ImageCompress, &cancel)
            .await
            .unwrap();
        assert_eq!(artifact.body.len(), 5 * 1024);
        assert_eq!(
            artifact.headers.get("Cache-Control"),
            Some(ARTIFACT_CACHE_CONTROL)
        );
        assert_eq!(artifact.hash.len(), engine.options().hash_length_chars);
        assert!(artifact.output_url.contains(".pagespeed.ic."));
    }

    #[test]
    fn vary_pass_through_is_conservative() {
        let mut origin = ResponseHeaders::new(200);
        origin.add("Vary", "Accept-Encoding");
        let headers = artifact_headers(&origin, ContentType::Png);
        assert_eq!(headers.get("Vary"), Some("Accept-Encoding"));

        let mut origin = ResponseHeaders::new(200);
        origin.add("Vary", "Accept-Encoding, User-Agent");
        let headers = artifact_headers(&origin, ContentType::Png);
        assert_eq!(headers.get("Vary"), None);

        let origin = ResponseHeaders::new(200);
        let headers = artifact_headers(&origin, ContentType::Png);
        assert_eq!(headers.get("Vary"), None);
    }

    #[test]
    fn content_type_sniffing_prefers_headers() {
        let url = Url::parse("http://o.com/a.bin").unwrap();
        let mut headers = ResponseHeaders::new(200);
        headers.add("Content-Type", "image/png");
        assert_eq!(sniff_content_type(&headers, &url), Some(ContentType::Png));

        let headers = ResponseHeaders::new(200);
        let url = Url::parse("http://o.com/a.css?v=3").unwrap();
        assert_eq!(sniff_content_type(&headers, &url), Some(ContentType::Css));
    }
}
