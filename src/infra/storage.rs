//! Filesystem artifact store.
//!
//! Every artifact set lives flat in the store root as `<base>.md`,
//! `<base>.html` and `<base>.png`. Files are written once and never modified
//! afterwards; only the sweeper deletes them.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{fs, io::AsyncWriteExt};

use crate::domain::artifacts::{ArtifactKind, base_name, base_name_candidates};
use crate::domain::sanitize::is_safe_component;

/// Advisory lock shared by every sweeper using this directory.
pub const SWEEP_LOCK_FILE: &str = ".sweep.lock";

const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid artifact name `{0}`")]
    InvalidName(String),
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("no free artifact name derived from `{0}`")]
    NamesExhausted(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Source file of a freshly created artifact set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifactSet {
    pub base_name: String,
    pub timestamp: i64,
    pub source_path: PathBuf,
}

/// An existing file of an artifact set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating the directory if necessary.
    pub fn new(root: PathBuf) -> Result<Self, io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(SWEEP_LOCK_FILE)
    }

    pub fn path_for(&self, base_name: &str, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.file_name(base_name))
    }

    /// Write `content` as the source of a new artifact set.
    ///
    /// The source is created with create-new semantics. When the derived name
    /// is taken (same label within the same second) a numeric suffix is
    /// appended, so a base name is never reused.
    pub async fn create_set(
        &self,
        label: Option<&str>,
        timestamp: i64,
        content: &[u8],
    ) -> Result<NewArtifactSet, StoreError> {
        let base = base_name(label, timestamp);

        for candidate in base_name_candidates(&base).take(MAX_NAME_ATTEMPTS) {
            let source_path = self.path_for(&candidate, ArtifactKind::Source);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&source_path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            };

            let written = async {
                file.write_all(content).await?;
                file.flush().await
            }
            .await;
            if let Err(err) = written {
                drop(file);
                let _ = fs::remove_file(&source_path).await;
                return Err(err.into());
            }

            return Ok(NewArtifactSet {
                base_name: candidate,
                timestamp,
                source_path,
            });
        }

        Err(StoreError::NamesExhausted(base))
    }

    /// List the files of `base_name` that currently exist, in kind order.
    pub async fn list_set(&self, base_name: &str) -> Result<Vec<StoredFile>, StoreError> {
        if !is_safe_component(base_name) {
            return Err(StoreError::InvalidName(base_name.to_string()));
        }

        let mut files = Vec::new();
        for kind in ArtifactKind::ALL {
            let path = self.path_for(base_name, kind);
            let meta = match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            files.push(StoredFile {
                kind,
                file_name: kind.file_name(base_name),
                path,
                size_bytes: meta.len(),
                modified_at: meta.modified().map(OffsetDateTime::from)?,
            });
        }
        Ok(files)
    }

    /// Resolve a bare file name inside the store. The lock file and anything
    /// that is not a plain path component are rejected.
    pub fn resolve_file(&self, file_name: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_component(file_name) || file_name == SWEEP_LOCK_FILE {
            return Err(StoreError::InvalidName(file_name.to_string()));
        }
        Ok(self.root.join(file_name))
    }

    /// Read a stored file by name.
    pub async fn read_file(&self, file_name: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve_file(file_name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                Err(StoreError::NotFound(file_name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a file. Missing files are treated as success.
    pub async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// True when the store directory can be read.
    pub async fn is_reachable(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }
}
