//! Per-document rewrite scheduling.
//!
//! One [`RewriteDriver`] owns a document from start to finish: it
//! tokenizes incoming markup, attaches slots to rewritable references,
//! spawns one rewrite per distinct fingerprint, and on `flush` waits
//! out the deadline before emitting tokens in exactly their input
//! order. A rewrite that misses the deadline keeps building in the
//! background; its output serves the next page load from cache.

use crate::context::{RewriteEngine, RewriteOutcome};
use crate::filter::{find_css_urls, FilterId};
use crate::html::{scan_html, HtmlToken};
use crate::slot::{RenderAction, ResourceSlot, SlotTarget};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;
use velo_types::{ContentType, Fingerprint};

/// Counters for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// References that got a slot and a context.
    pub resources_considered: u64,
    /// Slots rendered with a rewritten URL.
    pub rewrites_rendered: u64,
    /// Contexts disabled by the flush deadline.
    pub rewrites_expired: u64,
}

/// One in-flight rewrite and the slots waiting on it.
struct OpenContext {
    slots: Vec<ResourceSlot>,
    rx: Option<oneshot::Receiver<RewriteOutcome>>,
    outcome: Option<RewriteOutcome>,
}

impl OpenContext {
    fn disable(&mut self) {
        for slot in &mut self.slots {
            slot.disable();
        }
        self.outcome = Some(RewriteOutcome::Unchanged);
    }
}

/// Per-document scheduler. Construct one per document; it is not
/// shared between documents.
pub struct RewriteDriver {
    engine: Arc<RewriteEngine>,
    doc_url: Url,
    cancel: CancellationToken,
    tokens: Vec<HtmlToken>,
    /// Tokens before this index have been serialized to the caller.
    emit_cursor: usize,
    open: Vec<OpenContext>,
    by_fingerprint: HashMap<Fingerprint, usize>,
    stats: DriverStats,
}

impl RewriteDriver {
    pub fn new(engine: Arc<RewriteEngine>, doc_url: Url) -> Self {
        Self {
            engine,
            doc_url,
            cancel: CancellationToken::new(),
            tokens: Vec::new(),
            emit_cursor: 0,
            open: Vec::new(),
            by_fingerprint: HashMap::new(),
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Feeds a chunk of markup. References discovered here start
    /// rewriting immediately; nothing is emitted until `flush`.
    pub fn parse(&mut self, html: &str) {
        for token in scan_html(html) {
            let index = self.tokens.len();
            self.tokens.push(token);
            self.attach_slots(index);
        }
    }

    /// Waits out the configured deadline, renders what finished, and
    /// returns the serialized tokens past the previous flush point.
    pub async fn flush(&mut self) -> String {
        let deadline_ms = self.engine.options().flush_deadline_ms;
        self.flush_with_deadline(deadline_ms).await
    }

    /// `flush` with an explicit per-call deadline.
    #[instrument(skip(self), fields(doc = %self.doc_url))]
    pub async fn flush_with_deadline(&mut self, deadline_ms: u64) -> String {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(deadline_ms);

        for open in &mut self.open {
            if open.outcome.is_some() {
                continue;
            }
            let Some(rx) = open.rx.take() else {
                open.disable();
                continue;
            };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                open.disable();
                self.stats.rewrites_expired += 1;
                continue;
            }
            match tokio::time::timeout(remaining, rx).await {
                Ok(Ok(outcome)) => open.outcome = Some(outcome),
                Ok(Err(_)) => open.disable(),
                Err(_) => {
                    // Deadline: the build keeps running detached; this
                    // document emits the original reference.
                    debug!("flush deadline elapsed with rewrite pending");
                    open.disable();
                    self.stats.rewrites_expired += 1;
                }
            }
        }

        self.render_resolved();
        self.open.clear();
        self.by_fingerprint.clear();

        let chunk = crate::html::write_tokens(&self.tokens[self.emit_cursor..]);
        self.emit_cursor = self.tokens.len();
        chunk
    }

    /// Final flush. The driver is spent afterwards.
    pub async fn finish(&mut self) -> String {
        self.flush().await
    }

    /// Applies resolved outcomes to their slots, ordered so that
    /// multiple ranges within one character-data token shift safely.
    fn render_resolved(&mut self) {
        let mut order: Vec<(usize, usize)> = Vec::new();
        for (ci, open) in self.open.iter().enumerate() {
            for si in 0..open.slots.len() {
                order.push((ci, si));
            }
        }
        order.sort_by_key(|&(ci, si)| {
            let slot = &self.open[ci].slots[si];
            let range_start = match &slot.target {
                SlotTarget::CharacterData { range } => range.start,
                _ => usize::MAX,
            };
            std::cmp::Reverse((slot.token_index, range_start))
        });

        for (ci, si) in order {
            let open = &mut self.open[ci];
            let action = match &open.outcome {
                Some(RewriteOutcome::Rewritten { url }) => RenderAction::ReplaceUrl(url.clone()),
                Some(RewriteOutcome::Unchanged) | None => RenderAction::Unchanged,
            };
            if open.slots[si].render(&mut self.tokens, &action)
                && matches!(action, RenderAction::ReplaceUrl(_))
            {
                self.stats.rewrites_rendered += 1;
            }
        }
    }

    /// Inspects one freshly parsed token for rewritable references.
    fn attach_slots(&mut self, index: usize) {
        let mut found: Vec<(ResourceSlot, String, FilterId)> = Vec::new();
        match &self.tokens[index] {
            HtmlToken::StartTag(tag) => {
                if tag.name.eq_ignore_ascii_case("img") {
                    if let Some(src) = tag.attr("src") {
                        found.push((
                            ResourceSlot::url_attribute(index, "src"),
                            src.to_string(),
                            FilterId::ImageCompress,
                        ));
                    }
                } else if tag.name.eq_ignore_ascii_case("link") {
                    let is_stylesheet = tag.attr("rel").is_some_and(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|t| t.eq_ignore_ascii_case("stylesheet"))
                    });
                    if is_stylesheet {
                        if let Some(href) = tag.attr("href") {
                            found.push((
                                ResourceSlot::url_attribute(index, "href"),
                                href.to_string(),
                                FilterId::CssRewrite,
                            ));
                        }
                    }
                } else if tag.name.eq_ignore_ascii_case("script") {
                    if let Some(src) = tag.attr("src") {
                        found.push((
                            ResourceSlot::url_attribute(index, "src"),
                            src.to_string(),
                            FilterId::JsMinify,
                        ));
                    }
                }
            }
            HtmlToken::CharacterData { element, text } if element == "style" => {
                for (range, url) in find_css_urls(text) {
                    let filter = match css_ref_type(&url) {
                        Some(ct) if ct.is_image() => FilterId::ImageCompress,
                        _ => FilterId::CacheExtend,
                    };
                    found.push((ResourceSlot::character_data(index, range), url, filter));
                }
            }
            _ => {}
        }
        for (slot, url, filter) in found {
            self.attach(slot, &url, filter);
        }
    }

    /// Binds a slot to the context for (URL, filter), spawning the
    /// context if this is the first slot with that fingerprint.
    fn attach(&mut self, slot: ResourceSlot, input_url: &str, filter: FilterId) {
        if input_url.is_empty()
            || input_url.starts_with("data:")
            || input_url.contains(".pagespeed.")
        {
            return;
        }
        let Ok(resource) = self.doc_url.join(input_url) else {
            return;
        };
        self.stats.resources_considered += 1;

        let fingerprint = Fingerprint::compute(&[resource.as_str()], filter.code(), &[]);
        if let Some(&ci) = self.by_fingerprint.get(&fingerprint) {
            // Second occurrence in this document: share the pending
            // rewrite, no second lookup.
            self.open[ci].slots.push(slot);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        let doc = self.doc_url.clone();
        let input = input_url.to_string();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let outcome = engine.rewrite(&doc, &input, filter, &cancel).await;
            let _ = tx.send(outcome);
        });

        self.by_fingerprint.insert(fingerprint, self.open.len());
        self.open.push(OpenContext {
            slots: vec![slot],
            rx: Some(rx),
            outcome: None,
        });
    }
}

fn css_ref_type(url: &str) -> Option<ContentType> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('/').next()?.rsplit_once('.')?.1;
    ContentType::from_extension(&ext.to_ascii_lowercase())
}
