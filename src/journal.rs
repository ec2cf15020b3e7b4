//! Persistent record of label merges in flight
//!
//! A merge deletes the target label and then renames the source. Gmail has
//! no transaction spanning the two calls, so every phase change is written
//! to disk before the next remote call. `labels repair` reads the journal and
//! finishes whatever an interrupted run left behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GmailError, Result};
use crate::models::Label;

/// ```text
/// PendingDelete -> Deleted -> PendingUpdate -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    /// Recorded, target not yet deleted
    PendingDelete,
    /// Target deleted, rename not yet attempted
    Deleted,
    /// Rename sent (or retrying), not yet confirmed
    PendingUpdate,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub merge_id: String,
    pub source_id: String,
    pub source_name: String,
    pub target_id: String,
    pub target_name: String,
    pub final_name: String,
    pub phase: MergePhase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl MergeRecord {
    pub fn is_done(&self) -> bool {
        self.phase == MergePhase::Done
    }

    /// The target is known to be gone
    pub fn target_deleted(&self) -> bool {
        matches!(
            self.phase,
            MergePhase::Deleted | MergePhase::PendingUpdate | MergePhase::Done
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeJournal {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default)]
    merges: Vec<MergeRecord>,
}

impl MergeJournal {
    /// Load the journal at `path`; a missing file is an empty journal
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No merge journal at {:?}, starting empty", path);
            return Ok(Self {
                path: path.to_path_buf(),
                merges: Vec::new(),
            });
        }

        let json = tokio::fs::read_to_string(path).await?;
        let mut journal: Self = serde_json::from_str(&json)?;
        journal.path = path.to_path_buf();

        tracing::debug!(
            "Loaded merge journal from {:?}: {} records, {} unfinished",
            path,
            journal.merges.len(),
            journal.unfinished().len()
        );
        Ok(journal)
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::debug!("Saved merge journal to {:?}", self.path);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[MergeRecord] {
        &self.merges
    }

    pub fn get(&self, merge_id: &str) -> Option<&MergeRecord> {
        self.merges.iter().find(|r| r.merge_id == merge_id)
    }

    /// Records not yet `Done`, oldest first
    pub fn unfinished(&self) -> Vec<MergeRecord> {
        self.merges.iter().filter(|r| !r.is_done()).cloned().collect()
    }

    /// Record a new merge in `PendingDelete` and persist it
    pub async fn begin(&mut self, source: &Label, target: &Label, final_name: &str) -> Result<MergeRecord> {
        let now = Utc::now();
        let record = MergeRecord {
            merge_id: uuid::Uuid::new_v4().to_string(),
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            final_name: final_name.to_string(),
            phase: MergePhase::PendingDelete,
            started_at: now,
            updated_at: now,
            last_error: None,
        };
        self.merges.push(record.clone());
        self.save().await?;

        tracing::info!(
            "Merge {} recorded: {} ({}) <- {} ({}) as '{}'",
            record.merge_id,
            record.source_id,
            record.source_name,
            record.target_id,
            record.target_name,
            record.final_name
        );
        Ok(record)
    }

    fn record_mut(&mut self, merge_id: &str) -> Result<&mut MergeRecord> {
        self.merges
            .iter_mut()
            .find(|r| r.merge_id == merge_id)
            .ok_or_else(|| GmailError::LabelError(format!("Unknown merge id '{}'", merge_id)))
    }

    /// Move a merge to `phase` and persist it
    pub async fn advance(&mut self, merge_id: &str, phase: MergePhase) -> Result<()> {
        let record = self.record_mut(merge_id)?;
        record.phase = phase;
        record.updated_at = Utc::now();
        record.last_error = None;
        self.save().await
    }

    /// Attach the failure that stopped a merge, keeping its phase
    pub async fn record_failure(&mut self, merge_id: &str, error: &GmailError) -> Result<()> {
        let record = self.record_mut(merge_id)?;
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();
        self.save().await
    }

    /// Drop finished records, returning how many were removed
    pub fn prune_done(&mut self) -> usize {
        let before = self.merges.len();
        self.merges.retain(|r| !r.is_done());
        before - self.merges.len()
    }
}
