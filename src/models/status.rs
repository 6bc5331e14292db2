//! Working tree status and outward sync status models

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Snapshot of the working tree relative to HEAD.
///
/// The four sets are disjoint: a path that is staged is not also reported
/// as modified, and so on. Paths use `/` separators and are relative to the
/// vault root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingTreeStatus {
    pub staged: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub untracked: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl WorkingTreeStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.modified.is_empty()
            && self.untracked.is_empty()
            && self.deleted.is_empty()
    }

    /// Paths whose current on-disk content differs from HEAD and still exists
    pub fn changed_paths(&self) -> Vec<String> {
        self.staged
            .iter()
            .chain(self.modified.iter())
            .chain(self.untracked.iter())
            .filter(|p| !self.deleted.contains(*p))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Counts used to build the generated commit message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ChangeSummary {
    pub fn commit_message(&self) -> String {
        let mut parts = Vec::new();
        if self.added > 0 {
            parts.push(format!("{} added", self.added));
        }
        if self.updated > 0 {
            parts.push(format!("{} updated", self.updated));
        }
        if self.deleted > 0 {
            parts.push(format!("{} deleted", self.deleted));
        }

        if parts.is_empty() {
            "Vault sync".to_string()
        } else {
            format!("Vault sync: {}", parts.join(", "))
        }
    }
}

/// Observable state reported to the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum SyncStatus {
    Disconnected,
    Clean,
    HasChanges,
    Syncing {
        phase: String,
        percent: Option<u8>,
    },
    Error {
        message: String,
    },
}

impl SyncStatus {
    pub fn syncing(phase: impl Into<String>) -> Self {
        SyncStatus::Syncing {
            phase: phase.into(),
            percent: None,
        }
    }

    pub fn progress(phase: impl Into<String>, percent: u8) -> Self {
        SyncStatus::Syncing {
            phase: phase.into(),
            percent: Some(percent.min(100)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_counts() {
        let summary = ChangeSummary {
            added: 2,
            updated: 1,
            deleted: 0,
        };
        assert_eq!(summary.commit_message(), "Vault sync: 2 added, 1 updated");
    }

    #[test]
    fn test_commit_message_fallback() {
        assert_eq!(ChangeSummary::default().commit_message(), "Vault sync");
    }

    #[test]
    fn test_changed_paths_excludes_deleted() {
        let mut status = WorkingTreeStatus::default();
        status.untracked.insert("new.png".to_string());
        status.modified.insert("notes.md".to_string());
        status.deleted.insert("old.md".to_string());
        assert_eq!(status.changed_paths(), vec!["new.png", "notes.md"]);
        assert!(!status.is_clean());
    }

    #[test]
    fn test_progress_is_capped() {
        assert_eq!(
            SyncStatus::progress("Uploading", 140),
            SyncStatus::Syncing {
                phase: "Uploading".to_string(),
                percent: Some(100)
            }
        );
    }
}
