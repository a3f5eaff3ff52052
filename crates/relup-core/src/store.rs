//! Directory-backed release store.
//!
//! Files land at `<root>/releases/<platform>/<version>/<file name>`. Each copy
//! goes through a `.part` temp file that is renamed into place once every byte
//! is written, so readers never see a half-written release file. A JSON record
//! with the checksum and size sits next to the file.
//!
//! Published files are never overwritten: a destination that already exists,
//! or that another transfer from the same store is writing, fails the task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::checksum::{digest_file, FileDigest};
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::transfer::{ProgressReporter, Task, TransferExecutor};

/// Temporary file suffix used before the rename into place.
pub const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("release {field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("release {field} {value:?} must not be '.' or contain path separators or '..'")]
    UnsafeField { field: &'static str, value: String },

    #[error("{0} is already being uploaded by another transfer")]
    DestinationBusy(String),

    #[error("{0} is already published")]
    AlreadyPublished(String),

    #[error("{} has no usable file name", .0.display())]
    NoFileName(PathBuf),

    #[error("{} changed while uploading: hashed {expected} bytes, copied {actual}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Which release a file belongs to. Carried as task metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseTarget {
    pub version: String,
    pub platform: String,
}

impl ReleaseTarget {
    pub fn new(version: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            platform: platform.into(),
        }
    }

    /// Both fields end up as directory names, so they must be single path components.
    pub fn validate(&self) -> Result<(), StoreError> {
        check_component("version", &self.version)?;
        check_component("platform", &self.platform)
    }
}

fn check_component(field: &'static str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::EmptyField { field });
    }
    if value == "." || value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(StoreError::UnsafeField {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Metadata written next to every stored file as `<file name>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub version: String,
    pub platform: String,
    pub filename: String,
    pub blob_path: String,
    /// Lowercase hex SHA-256 of the file contents.
    pub checksum: String,
    pub file_size: u64,
}

/// Publishes files into a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalReleaseStore {
    root: PathBuf,
    chunk_size: usize,
    /// Destinations with a transfer in progress, shared by clones.
    claims: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Exclusive right to write one destination; released on drop.
struct Claim {
    claims: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// Removes a temp file on drop unless it was renamed into place. Runs when a
/// copy fails and when the transfer is aborted mid-copy.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("could not remove {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

impl LocalReleaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            claims: Arc::default(),
        }
    }

    /// Bytes copied between progress reports. Zero is raised to one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Store-relative key, e.g. `releases/linux-x86_64/1.2.0/app.tar.gz`.
    pub fn blob_key(target: &ReleaseTarget, file_name: &str) -> String {
        format!(
            "releases/{}/{}/{}",
            target.platform, target.version, file_name
        )
    }

    pub fn destination(&self, target: &ReleaseTarget, file_name: &str) -> PathBuf {
        self.root
            .join("releases")
            .join(&target.platform)
            .join(&target.version)
            .join(file_name)
    }

    pub fn record_path(&self, target: &ReleaseTarget, file_name: &str) -> PathBuf {
        self.destination(target, file_name)
            .with_file_name(format!("{file_name}.json"))
    }

    fn claim(&self, dest: &Path, key: &str) -> Result<Claim, StoreError> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if !claims.insert(dest.to_path_buf()) {
            return Err(StoreError::DestinationBusy(key.to_string()));
        }
        Ok(Claim {
            claims: Arc::clone(&self.claims),
            path: dest.to_path_buf(),
        })
    }

    /// Read back the record of a previously stored file.
    pub async fn read_record(&self, target: &ReleaseTarget, file_name: &str) -> Result<ReleaseRecord> {
        let path = self.record_path(target, file_name);
        let data = fs::read(&path)
            .await
            .with_context(|| format!("read release record {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parse release record {}", path.display()))
    }

    /// Copy `source` into the store and write its record.
    pub async fn publish(
        &self,
        source: &Path,
        target: &ReleaseTarget,
        progress: &ProgressReporter,
    ) -> Result<ReleaseRecord> {
        target.validate()?;
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::NoFileName(source.to_path_buf()))?
            .to_string();
        let key = Self::blob_key(target, &file_name);
        let dest = self.destination(target, &file_name);
        let _claim = self.claim(&dest, &key)?;
        if fs::try_exists(&dest)
            .await
            .with_context(|| format!("check {}", dest.display()))?
        {
            return Err(StoreError::AlreadyPublished(key).into());
        }

        let digest = {
            let source = source.to_path_buf();
            tokio::task::spawn_blocking(move || digest_file(&source))
                .await
                .context("checksum worker")??
        };

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }

        let mut temp = TempFile::new(temp_path(&dest));
        self.copy_chunked(source, &temp.path, &digest, progress)
            .await?;
        fs::rename(&temp.path, &dest).await.with_context(|| {
            format!("rename {} to {}", temp.path.display(), dest.display())
        })?;
        temp.disarm();

        let record = ReleaseRecord {
            version: target.version.clone(),
            platform: target.platform.clone(),
            blob_path: key,
            filename: file_name,
            checksum: digest.sha256,
            file_size: digest.size,
        };
        let record_path = self.record_path(target, &record.filename);
        let json = serde_json::to_vec_pretty(&record)?;
        fs::write(&record_path, json)
            .await
            .with_context(|| format!("write release record {}", record_path.display()))?;

        tracing::info!(
            task = %progress.task_id(),
            blob = %record.blob_path,
            size = record.file_size,
            "stored release file"
        );
        Ok(record)
    }

    async fn copy_chunked(
        &self,
        source: &Path,
        temp: &Path,
        digest: &FileDigest,
        progress: &ProgressReporter,
    ) -> Result<()> {
        let mut input = fs::File::open(source)
            .await
            .with_context(|| format!("open {}", source.display()))?;
        let mut output = fs::File::create(temp)
            .await
            .with_context(|| format!("create temp file {}", temp.display()))?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut copied = 0u64;
        loop {
            let n = input
                .read(&mut buf)
                .await
                .with_context(|| format!("read {}", source.display()))?;
            if n == 0 {
                break;
            }
            output
                .write_all(&buf[..n])
                .await
                .with_context(|| format!("write chunk to {}", temp.display()))?;
            copied += n as u64;
            progress.update_fraction(copied, digest.size);
        }
        output.flush().await?;
        output
            .sync_all()
            .await
            .with_context(|| format!("sync {}", temp.display()))?;

        if copied != digest.size {
            return Err(StoreError::SizeMismatch {
                path: source.to_path_buf(),
                expected: digest.size,
                actual: copied,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TransferExecutor<PathBuf, ReleaseTarget> for LocalReleaseStore {
    async fn execute(
        &self,
        task: Task<PathBuf, ReleaseTarget>,
        progress: ProgressReporter,
    ) -> Result<()> {
        self.publish(&task.payload, &task.metadata, &progress)
            .await
            .map(|_| ())
    }
}

/// Appends `.part` to the final path (`app.tar.gz` -> `app.tar.gz.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}
