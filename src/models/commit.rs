//! Commit models

use serde::{Deserialize, Serialize};

/// Commit information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub oid: String,
    pub short_id: String,
    pub message: String,
    pub summary: String,
    pub tree_id: String,
    pub author: Signature,
    pub committer: Signature,
    pub parent_ids: Vec<String>,
    /// Raw `gpgsig` header, when the commit is signed
    pub signature: Option<String>,
}

/// Git signature (author/committer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    /// Offset from UTC in minutes
    pub offset_minutes: i32,
}

impl From<git2::Signature<'_>> for Signature {
    fn from(sig: git2::Signature) -> Self {
        Signature {
            name: sig.name().unwrap_or("Unknown").to_string(),
            email: sig.email().unwrap_or("").to_string(),
            timestamp: sig.when().seconds(),
            offset_minutes: sig.when().offset_minutes(),
        }
    }
}

/// Convert a git2 Commit to our Commit model
impl Commit {
    pub fn from_git2(commit: &git2::Commit) -> Self {
        let oid = commit.id().to_string();

        let signature = commit
            .header_field_bytes("gpgsig")
            .ok()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .filter(|s| !s.is_empty());

        Commit {
            short_id: oid[..7].to_string(),
            oid,
            message: commit.message().unwrap_or("").to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
            tree_id: commit.tree_id().to_string(),
            author: Signature::from(commit.author()),
            committer: Signature::from(commit.committer()),
            parent_ids: commit.parent_ids().map(|id| id.to_string()).collect(),
            signature,
        }
    }

    /// Whether this commit joins two or more lines of history
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() >= 2
    }
}
