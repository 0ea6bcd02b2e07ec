//! Proposal Queue: persists each `PendingChange` as a single JSON document
//! keyed by id, last-write-wins, atomic write-rename like the Store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{PendingChange, PendingChangeStatus};

pub struct ProposalQueue {
    data_dir: PathBuf,
}

impl ProposalQueue {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().join("pending_changes"),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    pub fn save(&self, change: &PendingChange) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.path_for(&change.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(change)?;
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingChange>> {
        let path = self.path_for(id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Pending-review proposals only, newest first, optionally filtered by
    /// jurisdiction.
    pub fn list_pending(&self, jurisdiction: Option<&str>) -> Result<Vec<PendingChange>> {
        let mut changes = self.list_all()?;
        changes.retain(|c| c.status == PendingChangeStatus::PendingReview);
        if let Some(j) = jurisdiction {
            changes.retain(|c| c.jurisdiction.eq_ignore_ascii_case(j));
        }
        changes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(changes)
    }

    pub fn list_all(&self) -> Result<Vec<PendingChange>> {
        std::fs::create_dir_all(&self.data_dir)?;
        let mut changes = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            changes.push(serde_json::from_str(&raw)?);
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeProposal, PendingChangeStatus};
    use chrono::Utc;
    use serde_json::Value;

    fn sample_change(id: &str, jurisdiction: &str) -> PendingChange {
        PendingChange {
            id: id.to_string(),
            created_at: Utc::now(),
            jurisdiction: jurisdiction.to_string(),
            status: PendingChangeStatus::PendingReview,
            proposal: ChangeProposal {
                is_relevant: true,
                confidence: 0.9,
                summary: "test".into(),
                target_jurisdiction: jurisdiction.to_string(),
                field_path: "a.b".into(),
                old_value: Value::Null,
                new_value: Value::Bool(true),
                reasoning: "because".into(),
                effective_date: None,
                requires_immediate_action: false,
                source_text: "source".into(),
            },
            source_update: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            applied_at: None,
            impact_simulation: None,
        }
    }

    #[test]
    fn save_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ProposalQueue::new(dir.path());
        let change = sample_change("chg_abc123", "US");
        queue.save(&change).unwrap();
        let loaded = queue.get("chg_abc123").unwrap().unwrap();
        assert_eq!(loaded.jurisdiction, "US");
    }

    #[test]
    fn list_pending_filters_by_status_and_jurisdiction() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ProposalQueue::new(dir.path());
        queue.save(&sample_change("chg_1", "US")).unwrap();
        let mut approved = sample_change("chg_2", "US");
        approved.status = PendingChangeStatus::Approved;
        queue.save(&approved).unwrap();
        queue.save(&sample_change("chg_3", "SG")).unwrap();

        let pending_us = queue.list_pending(Some("US")).unwrap();
        assert_eq!(pending_us.len(), 1);
        assert_eq!(pending_us[0].id, "chg_1");
    }

    #[test]
    fn missing_id_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ProposalQueue::new(dir.path());
        assert!(queue.get("chg_missing").unwrap().is_none());
    }
}
