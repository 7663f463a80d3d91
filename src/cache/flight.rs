//! Single-flight claims for concurrent identical submissions.

use std::sync::{Arc, Mutex};

use markmap_api_types::ArtifactResponse;
use tokio::sync::watch;

use crate::domain::fingerprint::Fingerprint;

use super::lock::mutex_lock;
use super::store::{CacheState, CachedArtifact};

const SOURCE: &str = "cache::flight";

/// Value published to waiters: `None` until the leader finishes, then the
/// leader's response or its failure message.
pub type FlightOutcome = Option<Result<ArtifactResponse, String>>;

/// Result of [`ContentCache::claim`](super::ContentCache::claim).
pub enum Claim {
    Hit(ArtifactResponse),
    Lead(Flight),
    Wait(FlightWaiter),
}

/// Leadership of an in-progress render for one fingerprint.
///
/// Dropping an unfinished flight clears the in-progress marker and closes the
/// channel, so waiters retry their claim instead of hanging.
pub struct Flight {
    fingerprint: Fingerprint,
    id: u64,
    state: Arc<Mutex<CacheState>>,
    finished: bool,
}

impl Flight {
    pub(super) fn new(fingerprint: Fingerprint, id: u64, state: Arc<Mutex<CacheState>>) -> Self {
        Self {
            fingerprint,
            id,
            state,
            finished: false,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Insert the rendered artifact and release every waiter with it.
    ///
    /// Insertion and marker removal happen under one lock acquisition.
    pub fn complete(mut self, artifact: CachedArtifact) -> ArtifactResponse {
        let response = artifact.response.clone();
        let sender = {
            let mut state = mutex_lock(&self.state, SOURCE, "complete");
            state.store(self.fingerprint.clone(), artifact);
            state.take_flight(&self.fingerprint, self.id)
        };
        self.finished = true;
        if let Some(sender) = sender {
            sender.send_replace(Some(Ok(response.clone())));
        }
        response
    }

    /// Release every waiter with a failure; nothing is cached.
    pub fn fail(mut self, message: impl Into<String>) {
        let sender =
            mutex_lock(&self.state, SOURCE, "fail").take_flight(&self.fingerprint, self.id);
        self.finished = true;
        if let Some(sender) = sender {
            sender.send_replace(Some(Err(message.into())));
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let sender =
            mutex_lock(&self.state, SOURCE, "abandon").take_flight(&self.fingerprint, self.id);
        drop(sender);
    }
}

/// Handle for a caller waiting on another caller's render.
pub struct FlightWaiter {
    receiver: watch::Receiver<FlightOutcome>,
}

impl FlightWaiter {
    pub(super) fn new(receiver: watch::Receiver<FlightOutcome>) -> Self {
        Self { receiver }
    }

    /// Wait for the leader. `None` means the leader was abandoned.
    pub async fn wait(mut self) -> FlightOutcome {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        }
    }
}
