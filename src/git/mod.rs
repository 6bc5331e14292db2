//! History graph capability set
//!
//! The sync engine never touches git storage directly. Everything it needs
//! from the history graph goes through [`HistoryGraph`], one method per
//! operation. [`GitHistory`] implements it on top of libgit2.
//!
//! | Group    | Methods                                                          |
//! |----------|------------------------------------------------------------------|
//! | Setup    | `init`, `is_repository`, `get_config`, `set_config`              |
//! | Staging  | `status`, `add`, `add_all`, `reset_path`, `clean`, `restore`     |
//! | Commits  | `commit`, `log`, `staged_summary`, `diff`, `diff_staged`, `show` |
//! | Refs     | `rev_parse`, `current_branch`, `checkout`, `create_branch`, `reset_hard`, `is_ancestor` |
//! | Remotes  | `fetch`, `push`, `pull`, `add_remote`, `remove_remote`, `list_remotes` |
//! | Merging  | `merge`, `merge_abort`, `checkout_ours`, `checkout_theirs`, `conflicted_paths`, `merge_in_progress` |

mod commit;
mod merge;
mod remote;
mod repository;
mod staging;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ChangeSummary, Commit, WorkingTreeStatus};

pub use repository::GitHistory;

/// Name under which fetched remote history is tracked locally
pub const TRACKING_REMOTE: &str = "vault";

/// Result of merging a reference into the current branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "value")]
pub enum MergeOutcome {
    /// Nothing to merge
    UpToDate,
    /// The branch was advanced to this commit
    FastForward(String),
    /// A merge commit was created
    Merged(String),
    /// The merge stopped with these unmerged paths
    Conflicted(Vec<String>),
}

/// A configured remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInfo {
    pub name: String,
    pub url: String,
}

/// Operations the sync engine needs from the history graph
#[async_trait]
pub trait HistoryGraph: Send + Sync {
    /// Create an empty repository whose HEAD points at `branch`
    async fn init(&self, branch: &str) -> Result<()>;

    async fn is_repository(&self) -> bool;

    async fn add(&self, path: &str) -> Result<()>;

    /// Stage every addition, modification and deletion
    async fn add_all(&self) -> Result<()>;

    /// Commit the index, returning the new commit id.
    ///
    /// While a merge is in progress the merge heads become extra parents.
    async fn commit(&self, message: &str) -> Result<String>;

    async fn push(&self, remote: &str, branch: &str) -> Result<()>;

    async fn pull(&self, remote: &str, branch: &str) -> Result<MergeOutcome>;

    /// Fetch `branch` from `remote` (a remote name or a local path) into
    /// `refs/remotes/vault/<branch>`, returning the fetched tip
    async fn fetch(&self, remote: &str, branch: &str) -> Result<Option<String>>;

    async fn status(&self) -> Result<WorkingTreeStatus>;

    /// Counts of added/updated/deleted paths between HEAD and the index
    async fn staged_summary(&self) -> Result<ChangeSummary>;

    /// Unstaged changes as a patch
    async fn diff(&self, path: Option<&str>) -> Result<String>;

    /// Staged changes as a patch
    async fn diff_staged(&self, path: Option<&str>) -> Result<String>;

    /// Newest first
    async fn log(&self, count: usize) -> Result<Vec<Commit>>;

    /// Content of `path` at `reference`, if it exists there
    async fn show(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>>;

    async fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    async fn remove_remote(&self, name: &str) -> Result<()>;

    async fn list_remotes(&self) -> Result<Vec<RemoteInfo>>;

    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    async fn current_branch(&self) -> Result<Option<String>>;

    async fn checkout(&self, reference: &str) -> Result<()>;

    async fn create_branch(&self, name: &str) -> Result<()>;

    /// Discard the unstaged change to one path
    async fn reset_path(&self, path: &str) -> Result<()>;

    /// Move the branch, index and working tree to `reference`
    async fn reset_hard(&self, reference: &str) -> Result<()>;

    /// Remove untracked files, returning what was removed
    async fn clean(&self) -> Result<Vec<String>>;

    /// `None` when the revision does not resolve (e.g. HEAD on an unborn branch)
    async fn rev_parse(&self, spec: &str) -> Result<Option<String>>;

    /// Whether `ancestor` is reachable from `descendant`. Unknown commits are
    /// not ancestors.
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Restore working-tree files matching a pathspec from the index
    async fn restore(&self, pathspec: &str) -> Result<()>;

    async fn merge(&self, reference: &str, message: &str) -> Result<MergeOutcome>;

    async fn merge_abort(&self) -> Result<()>;

    async fn checkout_ours(&self, path: &str) -> Result<()>;

    async fn checkout_theirs(&self, path: &str) -> Result<()>;

    /// Paths with unmerged index entries
    async fn conflicted_paths(&self) -> Result<Vec<String>>;

    /// Whether a merge was started and neither committed nor aborted
    async fn merge_in_progress(&self) -> Result<bool>;
}
