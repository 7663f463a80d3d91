//! Content-addressed deduplication cache.
//!
//! Maps the fingerprint of a submitted document to the response produced the
//! first time it was rendered. Entries are only served while every file they
//! reference is still on disk, and the map is bounded with insertion-order
//! eviction.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! capacity = 100
//! ```

mod config;
mod flight;
mod lock;
mod store;

pub use config::CacheConfig;
pub(crate) use config::DEFAULT_CAPACITY;
pub use flight::{Claim, Flight, FlightOutcome, FlightWaiter};
pub use store::{CachedArtifact, ContentCache};
pub(crate) use store::{
    METRIC_CACHE_COALESCED, METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_CACHE_STALE,
};
