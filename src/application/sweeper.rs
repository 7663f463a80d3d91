//! Age-based expiry of stored artifacts.
//!
//! Several processes may share one store directory. A cycle only runs while
//! holding an exclusive advisory lock on the store's lock file; a process
//! that finds the lock taken skips the cycle. Deletion is per file, so an
//! artifact set may be partially removed for a while and readers must cope.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs4::fs_std::FileExt;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::tasks::TaskRegistry;
use crate::infra::storage::{ArtifactStore, SWEEP_LOCK_FILE};

pub(crate) const METRIC_SWEEP_DELETED: &str = "markmap_sweep_deleted_total";
pub(crate) const METRIC_SWEEP_CONTENDED: &str = "markmap_sweep_contended_total";

const SOURCE: &str = "application::sweeper";

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to open sweep lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to scan artifact store {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to delete expired artifact {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sweep cycle was interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweeper held the lock; nothing was touched.
    Skipped,
    Swept { scanned: usize, deleted: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Files last modified longer ago than this are deleted.
    pub ttl: Duration,
    /// Sleep between cycles.
    pub interval: Duration,
    /// Sleep after a failed cycle.
    pub retry_delay: Duration,
    /// Finished tasks are forgotten after this long.
    pub task_ttl: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(3600),
            retry_delay: Duration::from_secs(300),
            task_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Clone)]
pub struct ExpirySweeper {
    store: ArtifactStore,
    tasks: Option<TaskRegistry>,
    policy: SweepPolicy,
}

impl ExpirySweeper {
    pub fn new(store: ArtifactStore, policy: SweepPolicy) -> Self {
        Self {
            store,
            tasks: None,
            policy,
        }
    }

    /// Also prune finished tasks from `tasks` on every cycle.
    pub fn with_tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Run one cycle on the calling thread.
    pub fn sweep_once(&self) -> Result<SweepOutcome, SweepError> {
        let lock_path = self.store.lock_path();
        let Some(_lock) = try_lock(&lock_path)? else {
            counter!(METRIC_SWEEP_CONTENDED).increment(1);
            info!(
                target = SOURCE,
                op = "sweeper::cycle",
                result = "contended",
                lock = %lock_path.display(),
                "Sweep lock held elsewhere; skipping cycle"
            );
            return Ok(SweepOutcome::Skipped);
        };

        let Some(cutoff) = SystemTime::now().checked_sub(self.policy.ttl) else {
            return Ok(SweepOutcome::Swept {
                scanned: 0,
                deleted: 0,
            });
        };

        let (scanned, deleted) = remove_older_than(self.store.root(), cutoff)?;
        if deleted > 0 {
            counter!(METRIC_SWEEP_DELETED).increment(deleted as u64);
            info!(
                target = SOURCE,
                op = "sweeper::cycle",
                result = "swept",
                scanned,
                deleted,
                "Removed expired artifacts"
            );
        } else {
            debug!(
                target = SOURCE,
                op = "sweeper::cycle",
                result = "clean",
                scanned,
                "No expired artifacts"
            );
        }
        Ok(SweepOutcome::Swept { scanned, deleted })
    }

    /// Run one cycle off the async runtime, then prune finished tasks.
    ///
    /// Task pruning happens even when the cycle is skipped: the registry
    /// belongs to this process only.
    pub async fn run_cycle(&self) -> Result<SweepOutcome, SweepError> {
        let sweeper = self.clone();
        let outcome = tokio::task::spawn_blocking(move || sweeper.sweep_once())
            .await
            .map_err(|err| SweepError::Interrupted(err.to_string()))?;

        if let Some(tasks) = &self.tasks {
            let cutoff = OffsetDateTime::now_utc() - self.policy.task_ttl;
            let pruned = tasks.prune_finished_before(cutoff);
            if pruned > 0 {
                debug!(
                    target = SOURCE,
                    op = "sweeper::prune_tasks",
                    pruned,
                    "Pruned finished tasks"
                );
            }
        }

        outcome
    }

    /// Sweep until `shutdown` fires. A failed cycle is logged and retried
    /// after the shorter retry delay; it never ends the loop.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            target = SOURCE,
            interval_secs = self.policy.interval.as_secs(),
            ttl_secs = self.policy.ttl.as_secs(),
            "Expiry sweeper started"
        );

        loop {
            let delay = match self.run_cycle().await {
                Ok(_) => self.policy.interval,
                Err(err) => {
                    error!(
                        target = SOURCE,
                        op = "sweeper::cycle",
                        result = "error",
                        error = %err,
                        retry_secs = self.policy.retry_delay.as_secs(),
                        "Sweep cycle failed"
                    );
                    self.policy.retry_delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(target = SOURCE, "Expiry sweeper stopped");
    }
}

/// Take the store-wide sweep lock without blocking. `None` means another
/// holder has it. The lock is released when the file is dropped.
fn try_lock(path: &Path) -> Result<Option<File>, SweepError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| SweepError::Lock {
            path: path.to_path_buf(),
            source,
        })?;

    match file.try_lock_exclusive() {
        Ok(true) => Ok(Some(file)),
        Ok(false) => Ok(None),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(source) => Err(SweepError::Lock {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Delete regular files in `root` last modified before `cutoff`.
///
/// Files that vanish mid-scan are skipped. Returns `(scanned, deleted)`.
fn remove_older_than(root: &Path, cutoff: SystemTime) -> Result<(usize, usize), SweepError> {
    let scan_error = |source| SweepError::Scan {
        path: root.to_path_buf(),
        source,
    };

    let mut scanned = 0;
    let mut deleted = 0;
    for entry in fs::read_dir(root).map_err(scan_error)? {
        let entry = entry.map_err(scan_error)?;
        if entry.file_name() == SWEEP_LOCK_FILE {
            continue;
        }

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(source) => return Err(SweepError::Scan { path, source }),
        };
        if !metadata.is_file() {
            continue;
        }
        scanned += 1;

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    path = %path.display(),
                    error = %err,
                    "Modification time unavailable; keeping file"
                );
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(SweepError::Delete { path, source }),
        }
    }
    Ok((scanned, deleted))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn age(path: &Path, by: Duration) {
        let file = OpenOptions::new().write(true).open(path).expect("open");
        file.set_modified(SystemTime::now() - by).expect("set mtime");
    }

    fn sweeper(dir: &TempDir) -> ExpirySweeper {
        let store = ArtifactStore::new(dir.path().to_path_buf()).expect("store");
        ExpirySweeper::new(store, SweepPolicy::default())
    }

    #[test]
    fn deletes_only_expired_files() {
        let dir = TempDir::new().expect("temp dir");
        let sweeper = sweeper(&dir);
        let old = dir.path().join("old_1.md");
        let fresh = dir.path().join("fresh_2.md");
        fs::write(&old, "old").expect("old");
        fs::write(&fresh, "fresh").expect("fresh");
        fs::create_dir(dir.path().join("nested")).expect("nested");
        age(&old, Duration::from_secs(48 * 3600));

        let outcome = sweeper.sweep_once().expect("sweep");

        assert_eq!(
            outcome,
            SweepOutcome::Swept {
                scanned: 2,
                deleted: 1
            }
        );
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(dir.path().join(SWEEP_LOCK_FILE).exists());
    }

    #[test]
    fn second_cycle_deletes_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let sweeper = sweeper(&dir);
        for name in ["a_1.md", "a_1.html", "a_1.png"] {
            let path = dir.path().join(name);
            fs::write(&path, name).expect("write");
            age(&path, Duration::from_secs(25 * 3600));
        }

        let first = sweeper.sweep_once().expect("first");
        let second = sweeper.sweep_once().expect("second");

        assert!(matches!(first, SweepOutcome::Swept { deleted: 3, .. }));
        assert!(matches!(second, SweepOutcome::Swept { deleted: 0, .. }));
    }

    #[test]
    fn old_lock_file_is_never_deleted() {
        let dir = TempDir::new().expect("temp dir");
        let sweeper = sweeper(&dir);
        let lock = dir.path().join(SWEEP_LOCK_FILE);
        fs::write(&lock, "").expect("lock");
        age(&lock, Duration::from_secs(100 * 3600));

        let outcome = sweeper.sweep_once().expect("sweep");
        assert!(matches!(outcome, SweepOutcome::Swept { deleted: 0, .. }));
        assert!(lock.exists());
    }

    #[test]
    fn held_lock_skips_cycle() {
        let dir = TempDir::new().expect("temp dir");
        let sweeper = sweeper(&dir);
        let old = dir.path().join("old_1.md");
        fs::write(&old, "old").expect("old");
        age(&old, Duration::from_secs(48 * 3600));

        let holder = try_lock(&dir.path().join(SWEEP_LOCK_FILE))
            .expect("lock")
            .expect("uncontended");

        assert_eq!(sweeper.sweep_once().expect("skip"), SweepOutcome::Skipped);
        assert!(old.exists());

        drop(holder);
        assert!(matches!(
            sweeper.sweep_once().expect("sweep"),
            SweepOutcome::Swept { deleted: 1, .. }
        ));
    }

    #[tokio::test]
    async fn cycle_prunes_finished_tasks_even_when_skipped() {
        let dir = TempDir::new().expect("temp dir");
        let tasks = TaskRegistry::new();
        let done = tasks.create("done");
        let pending = tasks.create("pending");
        tasks.complete(done, true, "ok");

        let policy = SweepPolicy {
            task_ttl: Duration::ZERO,
            ..SweepPolicy::default()
        };
        let store = ArtifactStore::new(dir.path().to_path_buf()).expect("store");
        let sweeper = ExpirySweeper::new(store, policy).with_tasks(tasks.clone());

        let _holder = try_lock(&dir.path().join(SWEEP_LOCK_FILE))
            .expect("lock")
            .expect("uncontended");
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(sweeper.run_cycle().await.expect("cycle"), SweepOutcome::Skipped);
        assert!(tasks.get(done).is_none());
        assert!(tasks.get(pending).is_some());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let dir = TempDir::new().expect("temp dir");
        let sweeper = sweeper(&dir);
        let token = CancellationToken::new();

        let handle = tokio::spawn(sweeper.run(token.clone()));
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper stopped")
            .expect("join");
    }
}
