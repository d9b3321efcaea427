//! Session recordings on the filesystem.
//!
//! Rows store the blob path as a key relative to the configured root.
//! Deletion is blob-first: the row survives until its blob is gone, so a
//! crash between the two never strands an unreachable blob.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Filesystem,
    S3,
}

/// Metadata row for one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRecord {
    pub id: String,
    pub session_id: String,
    pub storage_kind: StorageKind,
    /// Key relative to the recording root.
    pub storage_path: String,
    pub size_bytes: u64,
    pub duration_secs: u64,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of one retention sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeSummary {
    pub removed: u64,
    /// Blob deletions that failed; their rows are kept for the next sweep.
    pub failed: u64,
}

pub struct FilesystemRecordingStore {
    root: PathBuf,
    rows: RwLock<HashMap<String, RecordingRecord>>,
}

impl FilesystemRecordingStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::internal("creating recording root").with_source(e))?;
        Ok(Self {
            root,
            rows: RwLock::new(HashMap::new()),
        })
    }

    fn blob_path(&self, storage_path: &str) -> Result<PathBuf> {
        // Keys are relative and must stay under the root.
        let key = Path::new(storage_path);
        if key.is_absolute()
            || key
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::validation("recording key must be a relative path"));
        }
        Ok(self.root.join(key))
    }

    /// Write the blob, then insert the row with the measured size.
    pub async fn store(
        &self,
        session_id: &str,
        created_by: &str,
        duration_secs: u64,
        retention_until: Option<DateTime<Utc>>,
        content: &[u8],
    ) -> Result<RecordingRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let storage_path = format!("{session_id}/{id}.cast");
        let path = self.blob_path(&storage_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::internal("creating recording directory").with_source(e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::internal("writing recording blob").with_source(e))?;

        let record = RecordingRecord {
            id: id.clone(),
            session_id: session_id.to_string(),
            storage_kind: StorageKind::Filesystem,
            storage_path,
            size_bytes: content.len() as u64,
            duration_secs,
            created_by: created_by.to_string(),
            retention_until,
            created_at: Utc::now(),
        };
        self.rows.write().insert(id, record.clone());
        tracing::info!(
            recording_id = %record.id,
            session_id = %session_id,
            size_bytes = record.size_bytes,
            "recording stored"
        );
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<RecordingRecord> {
        self.rows.read().get(id).cloned()
    }

    pub fn list_for_session(&self, session_id: &str) -> Vec<RecordingRecord> {
        let mut out: Vec<RecordingRecord> = self
            .rows
            .read()
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn count(&self) -> usize {
        self.rows.read().len()
    }

    /// Delete one recording, blob first.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let record = self
            .get(id)
            .ok_or_else(|| Error::not_found("recording"))?;
        self.remove_blob(&record).await?;
        self.rows.write().remove(id);
        Ok(())
    }

    /// Remove recordings whose retention has lapsed. A blob failure is
    /// reported and the sweep continues with the other records.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeSummary> {
        let expired: Vec<RecordingRecord> = self
            .rows
            .read()
            .values()
            .filter(|r| r.retention_until.is_some_and(|until| until < now))
            .cloned()
            .collect();

        let mut summary = PurgeSummary::default();
        for record in expired {
            match self.remove_blob(&record).await {
                Ok(()) => {
                    self.rows.write().remove(&record.id);
                    summary.removed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        recording_id = %record.id,
                        error = %err,
                        "recording blob removal failed; row kept for the next sweep"
                    );
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn remove_blob(&self, record: &RecordingRecord) -> Result<()> {
        let path = self.blob_path(&record.storage_path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone counts as removed.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal("removing recording blob").with_source(e)),
        }
    }
}
