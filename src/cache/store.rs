//! Cache storage.
//!
//! A single mutex guards the whole map together with the in-flight markers,
//! so lookup, insert, patch and claim are linearised. The lock is coarse on
//! purpose: calls arrive at request rate, not on a hot path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use markmap_api_types::{ArtifactLink, ArtifactResponse};
use metrics::counter;
use tokio::sync::watch;
use tracing::debug;

use crate::domain::fingerprint::Fingerprint;

use super::config::CacheConfig;
use super::flight::{Claim, Flight, FlightOutcome, FlightWaiter};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "markmap_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "markmap_cache_miss_total";
pub(crate) const METRIC_CACHE_STALE: &str = "markmap_cache_stale_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "markmap_cache_evict_total";
pub(crate) const METRIC_CACHE_COALESCED: &str = "markmap_cache_coalesced_total";

/// A cached response plus the files that must exist for it to be served.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub response: ArtifactResponse,
    pub files: Vec<PathBuf>,
}

impl CachedArtifact {
    pub fn new(response: ArtifactResponse, files: Vec<PathBuf>) -> Self {
        Self { response, files }
    }

    /// True while every referenced file is present on disk.
    pub fn is_backed(&self) -> bool {
        self.files.iter().all(|path| path.is_file())
    }

    /// Record a secondary rendering that finished after the entry was stored.
    pub fn attach_png(&mut self, link: ArtifactLink, path: PathBuf) {
        self.response.png = Some(link);
        self.response.png_ready = true;
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }
}

pub(super) struct InFlight {
    pub(super) id: u64,
    pub(super) sender: watch::Sender<FlightOutcome>,
}

pub(super) struct CacheState {
    // Only `peek`, `peek_mut` and `push` are used so the recency order of the
    // LRU list is the insertion order.
    entries: LruCache<Fingerprint, CachedArtifact>,
    flights: HashMap<Fingerprint, InFlight>,
    next_flight_id: u64,
}

impl CacheState {
    fn valid_response(&self, fingerprint: &Fingerprint) -> Option<ArtifactResponse> {
        match self.entries.peek(fingerprint) {
            Some(entry) if entry.is_backed() => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(entry.response.clone())
            }
            Some(_) => {
                counter!(METRIC_CACHE_STALE).increment(1);
                debug!(
                    target = SOURCE,
                    fingerprint = %fingerprint,
                    "cached artifact is missing files; treating as miss"
                );
                None
            }
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
        }
    }

    /// Store `artifact`, returning the fingerprint evicted to stay in bounds.
    ///
    /// Overwriting an existing key keeps its original insertion position.
    pub(super) fn store(
        &mut self,
        fingerprint: Fingerprint,
        artifact: CachedArtifact,
    ) -> Option<Fingerprint> {
        if let Some(slot) = self.entries.peek_mut(&fingerprint) {
            *slot = artifact;
            return None;
        }

        let evicted = self
            .entries
            .push(fingerprint, artifact)
            .map(|(evicted_key, _)| evicted_key);
        if let Some(key) = evicted.as_ref() {
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(target = SOURCE, fingerprint = %key, "evicted oldest cache entry");
        }
        evicted
    }

    pub(super) fn take_flight(
        &mut self,
        fingerprint: &Fingerprint,
        id: u64,
    ) -> Option<watch::Sender<FlightOutcome>> {
        match self.flights.get(fingerprint) {
            Some(flight) if flight.id == id => {
                self.flights.remove(fingerprint).map(|flight| flight.sender)
            }
            _ => None,
        }
    }
}

/// Fingerprint-keyed response cache with single-flight claims.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Clone)]
pub struct ContentCache {
    state: Arc<Mutex<CacheState>>,
}

impl ContentCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(config.capacity_non_zero()),
                flights: HashMap::new(),
                next_flight_id: 0,
            })),
        }
    }

    /// Return the cached response when all of its files still exist.
    ///
    /// A stale entry is bypassed but left in place.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<ArtifactResponse> {
        mutex_lock(&self.state, SOURCE, "lookup").valid_response(fingerprint)
    }

    /// Store or overwrite an entry, evicting the oldest one past capacity.
    pub fn insert(&self, fingerprint: Fingerprint, artifact: CachedArtifact) -> Option<Fingerprint> {
        mutex_lock(&self.state, SOURCE, "insert").store(fingerprint, artifact)
    }

    /// Update an entry in place. Returns false when the fingerprint is absent.
    pub fn patch<F>(&self, fingerprint: &Fingerprint, mutate: F) -> bool
    where
        F: FnOnce(&mut CachedArtifact),
    {
        let mut state = mutex_lock(&self.state, SOURCE, "patch");
        match state.entries.peek_mut(fingerprint) {
            Some(entry) => {
                mutate(entry);
                true
            }
            None => false,
        }
    }

    /// Atomically decide how a submission of `fingerprint` proceeds.
    ///
    /// A valid entry is a hit. Otherwise, if another caller is already
    /// rendering the same content, the caller waits for it; if not, the caller
    /// becomes the leader and must finish the returned [`Flight`].
    pub fn claim(&self, fingerprint: &Fingerprint) -> Claim {
        let mut state = mutex_lock(&self.state, SOURCE, "claim");
        if let Some(response) = state.valid_response(fingerprint) {
            return Claim::Hit(response);
        }

        if let Some(flight) = state.flights.get(fingerprint) {
            counter!(METRIC_CACHE_COALESCED).increment(1);
            return Claim::Wait(FlightWaiter::new(flight.sender.subscribe()));
        }

        let id = state.next_flight_id;
        state.next_flight_id = state.next_flight_id.wrapping_add(1);
        let (sender, _) = watch::channel(None);
        state
            .flights
            .insert(fingerprint.clone(), InFlight { id, sender });

        Claim::Lead(Flight::new(fingerprint.clone(), id, Arc::clone(&self.state)))
    }

    /// True when an entry exists, whether or not its files are still present.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        mutex_lock(&self.state, SOURCE, "contains")
            .entries
            .contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
