//! Fetch path for Velo.
//!
//! Serves requests for content-addressed optimized artifacts: decode
//! the URL, hit the cache, or rebuild from the origin under the
//! artifact's named lock. Also home to the `velo-server` binary glue:
//! configuration, router, and the reqwest-backed origin fetcher.

pub mod config;
pub mod error;
pub mod origin;
pub mod routes;
pub mod serve;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::ServeError;
pub use origin::ReqwestFetcher;
pub use routes::{create_router, AppState};
pub use serve::{serve_rewritten, ServedArtifact};
