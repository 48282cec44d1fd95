//! Rewriting core for Velo.
//!
//! Turns subresource references found in HTML into content-addressed
//! optimized variants. The pieces, outside-in:
//!
//! - [`DomainPolicy`] decides which resources may be rewritten and
//!   where their outputs are served from.
//! - [`RewriteEngine`] bundles the shared collaborators (cache, lock
//!   manager, origin fetcher, policy, options) and runs individual
//!   rewrites through fetch, single-flight build, and writeback.
//! - [`RewriteDriver`] schedules the rewrites of one document and
//!   guarantees output bytes leave in input token order, bounded by a
//!   flush deadline.
//!
//! Failure anywhere collapses to "emit the original URL"; no error
//! escapes into the document.

pub mod context;
pub mod domain;
pub mod driver;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod html;
pub mod slot;

pub use context::{
    BuiltArtifact, EngineStats, RewriteEngine, RewriteOutcome, SharedCache,
    ARTIFACT_CACHE_CONTROL,
};
pub use domain::DomainPolicy;
pub use driver::{DriverStats, RewriteDriver};
pub use error::RewriteError;
pub use fetcher::{FetchedResource, ResourceFetcher};
pub use filter::{FilterId, Optimized, RewriteFilter};
pub use html::{scan_html, write_tokens, HtmlToken};
pub use slot::{RenderAction, ResourceSlot, SlotTarget};
