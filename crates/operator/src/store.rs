// Copyright 2025 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! File records with tombstones.
//!
//! Files are first tombstoned (soft deleted, reversible) and later purged.
//! The scheduler only depends on [`TombstoneStore`]; [`FileStore`] is the
//! implementation the airgap service runs with.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::Result;

/// Opaque identifier of a stored file
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId {
    /// Unique id assigned by the store
    pub id: String,
    /// Name the file was stored under
    pub name: String,
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Metadata kept for every stored file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Store assigned id
    pub id: String,
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// When the file was stored
    pub created_at: DateTime<Utc>,
    /// When the file was tombstoned, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Identifier handed out to callers
    #[must_use]
    pub fn file_id(&self) -> FileId {
        FileId {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether the record is tombstoned
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned_at.is_some()
    }
}

/// Capability to clean tombstoned files
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    /// Tags live records created before `cutoff`, or with `purge` set,
    /// permanently removes records tombstoned before `cutoff`.
    /// Returns the affected files.
    async fn clean_tombstones(&self, cutoff: DateTime<Utc>, purge: bool) -> Result<Vec<FileId>>;
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct Index {
    next_id: u64,
    files: BTreeMap<String, FileRecord>,
}

/// File metadata store, in memory with an optional JSON index on disk
pub struct FileStore {
    path: Option<PathBuf>,
    index: RwLock<Index>,
}

impl FileStore {
    /// Creates an empty store that is never persisted
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: RwLock::new(Index::default()),
        }
    }

    /// Opens the store persisted at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Fails if the index exists but cannot be read or parsed.
    #[instrument]
    pub async fn open(path: &Path) -> Result<Self> {
        let index = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Index::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(files = index.files.len(), "file store index loaded");

        Ok(Self {
            path: Some(path.to_path_buf()),
            index: RwLock::new(index),
        })
    }

    /// Stores a new live record created now
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be persisted.
    pub async fn insert(&self, name: &str, size: u64) -> Result<FileId> {
        self.insert_at(name, size, Utc::now()).await
    }

    /// Stores a new live record with an explicit creation time
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be persisted.
    pub async fn insert_at(
        &self,
        name: &str,
        size: u64,
        created_at: DateTime<Utc>,
    ) -> Result<FileId> {
        let mut index = self.index.write().await;
        let mut next = index.clone();
        next.next_id += 1;
        let record = FileRecord {
            id: format!("{:016x}", next.next_id),
            name: name.to_string(),
            size,
            created_at,
            tombstoned_at: None,
        };
        let file_id = record.file_id();
        next.files.insert(record.id.clone(), record);
        self.commit(&mut index, next).await?;
        Ok(file_id)
    }

    /// Looks up a record by id
    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        self.index.read().await.files.get(id).cloned()
    }

    /// All records, tombstoned ones included, ordered by id
    pub async fn list(&self) -> Vec<FileRecord> {
        self.index.read().await.files.values().cloned().collect()
    }

    /// Tombstones a single record. Returns `false` if it was unknown or
    /// already tombstoned.
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be persisted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.set_tombstone(id, Some(Utc::now())).await
    }

    /// Clears the tombstone of a record. Returns `false` if it was unknown or
    /// live.
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be persisted.
    pub async fn restore(&self, id: &str) -> Result<bool> {
        self.set_tombstone(id, None).await
    }

    async fn set_tombstone(&self, id: &str, at: Option<DateTime<Utc>>) -> Result<bool> {
        let mut index = self.index.write().await;
        let mut next = index.clone();
        let Some(record) = next.files.get_mut(id) else {
            return Ok(false);
        };
        if record.tombstoned_at.is_some() == at.is_some() {
            return Ok(false);
        }
        record.tombstoned_at = at;
        self.commit(&mut index, next).await?;
        Ok(true)
    }

    /// Persists `next` and only then makes it the live index, so a failed
    /// write leaves the store as it was.
    async fn commit(&self, index: &mut Index, next: Index) -> Result<()> {
        self.flush(&next).await?;
        *index = next;
        Ok(())
    }

    async fn flush(&self, index: &Index) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(index)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl TombstoneStore for FileStore {
    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn clean_tombstones(&self, cutoff: DateTime<Utc>, purge: bool) -> Result<Vec<FileId>> {
        let mut index = self.index.write().await;
        let mut next = index.clone();

        let affected: Vec<FileId> = if purge {
            let expired: Vec<String> = next
                .files
                .values()
                .filter(|f| f.tombstoned_at.is_some_and(|at| at < cutoff))
                .map(|f| f.id.clone())
                .collect();

            expired
                .iter()
                .filter_map(|id| next.files.remove(id))
                .map(|f| f.file_id())
                .collect()
        } else {
            let now = Utc::now();
            next
                .files
                .values_mut()
                .filter(|f| f.tombstoned_at.is_none() && f.created_at < cutoff)
                .map(|f| {
                    f.tombstoned_at = Some(now);
                    f.file_id()
                })
                .collect()
        };

        if !affected.is_empty() {
            self.commit(&mut index, next).await?;
        }

        debug!(affected = affected.len(), purge, "tombstone pass finished");

        Ok(affected)
    }
}
