//! git2-backed [`HistoryGraph`]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::Repository;

use super::{commit, merge, remote, staging, HistoryGraph, MergeOutcome, RemoteInfo};
use crate::error::{Result, SyncError};
use crate::models::{ChangeSummary, Commit, WorkingTreeStatus};

/// History graph stored in `<root>/.git`
///
/// libgit2 is blocking, so every call opens the repository on a blocking
/// worker thread. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct GitHistory {
    root: PathBuf,
}

impl GitHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `op` against a freshly opened repository
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&root)?;
            op(&repo)
        })
        .await
        .map_err(|e| SyncError::OperationFailed(format!("git task failed: {}", e)))?
    }
}

#[async_trait]
impl HistoryGraph for GitHistory {
    async fn init(&self, branch: &str) -> Result<()> {
        let root = self.root.clone();
        let branch = branch.to_string();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            let mut opts = git2::RepositoryInitOptions::new();
            opts.initial_head(&branch);
            Repository::init_opts(&root, &opts)?;
            tracing::info!("Initialized repository at {:?} on {}", root, branch);
            Ok(())
        })
        .await
        .map_err(|e| SyncError::OperationFailed(format!("git task failed: {}", e)))?
    }

    async fn is_repository(&self) -> bool {
        self.root.join(".git").is_dir() && self.run(|_| Ok(())).await.is_ok()
    }

    async fn add(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.run(move |repo| staging::add(repo, &path)).await
    }

    async fn add_all(&self) -> Result<()> {
        self.run(staging::add_all).await
    }

    async fn commit(&self, message: &str) -> Result<String> {
        let message = message.to_string();
        self.run(move |repo| commit::commit(repo, &message)).await
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let (remote, branch) = (remote.to_string(), branch.to_string());
        self.run(move |repo| remote::push(repo, &remote, &branch)).await
    }

    async fn pull(&self, remote: &str, branch: &str) -> Result<MergeOutcome> {
        let (remote, branch) = (remote.to_string(), branch.to_string());
        self.run(move |repo| remote::pull(repo, &remote, &branch)).await
    }

    async fn fetch(&self, remote: &str, branch: &str) -> Result<Option<String>> {
        let (remote, branch) = (remote.to_string(), branch.to_string());
        self.run(move |repo| remote::fetch(repo, &remote, &branch)).await
    }

    async fn status(&self) -> Result<WorkingTreeStatus> {
        self.run(staging::status).await
    }

    async fn staged_summary(&self) -> Result<ChangeSummary> {
        self.run(staging::staged_summary).await
    }

    async fn diff(&self, path: Option<&str>) -> Result<String> {
        let path = path.map(str::to_string);
        self.run(move |repo| staging::diff_unstaged(repo, path.as_deref()))
            .await
    }

    async fn diff_staged(&self, path: Option<&str>) -> Result<String> {
        let path = path.map(str::to_string);
        self.run(move |repo| staging::diff_staged(repo, path.as_deref()))
            .await
    }

    async fn log(&self, count: usize) -> Result<Vec<Commit>> {
        self.run(move |repo| commit::log(repo, count)).await
    }

    async fn show(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let (reference, path) = (reference.to_string(), path.to_string());
        self.run(move |repo| commit::read_file_at(repo, &reference, &path))
            .await
    }

    async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        let (name, url) = (name.to_string(), url.to_string());
        self.run(move |repo| {
            repo.remote(&name, &url)?;
            Ok(())
        })
        .await
    }

    async fn remove_remote(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run(move |repo| {
            repo.remote_delete(&name)?;
            Ok(())
        })
        .await
    }

    async fn list_remotes(&self) -> Result<Vec<RemoteInfo>> {
        self.run(remote::list).await
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |repo| match repo.config()?.get_string(&key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |repo| {
            repo.config()?.set_str(&key, &value)?;
            Ok(())
        })
        .await
    }

    async fn current_branch(&self) -> Result<Option<String>> {
        self.run(commit::current_branch).await
    }

    async fn checkout(&self, reference: &str) -> Result<()> {
        let reference = reference.to_string();
        self.run(move |repo| commit::checkout(repo, &reference)).await
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run(move |repo| {
            let head = repo.head()?.peel_to_commit()?;
            repo.branch(&name, &head, false)?;
            Ok(())
        })
        .await
    }

    async fn reset_path(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.run(move |repo| staging::reset_path(repo, &path)).await
    }

    async fn reset_hard(&self, reference: &str) -> Result<()> {
        let reference = reference.to_string();
        self.run(move |repo| staging::reset_hard(repo, &reference))
            .await
    }

    async fn clean(&self) -> Result<Vec<String>> {
        self.run(staging::clean).await
    }

    async fn rev_parse(&self, spec: &str) -> Result<Option<String>> {
        let spec = spec.to_string();
        self.run(move |repo| commit::rev_parse(repo, &spec)).await
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let (ancestor, descendant) = (ancestor.to_string(), descendant.to_string());
        self.run(move |repo| commit::is_ancestor(repo, &ancestor, &descendant))
            .await
    }

    async fn restore(&self, pathspec: &str) -> Result<()> {
        let pathspec = pathspec.to_string();
        self.run(move |repo| staging::restore(repo, &pathspec)).await
    }

    async fn merge(&self, reference: &str, message: &str) -> Result<MergeOutcome> {
        let (reference, message) = (reference.to_string(), message.to_string());
        self.run(move |repo| merge::merge(repo, &reference, &message))
            .await
    }

    async fn merge_abort(&self) -> Result<()> {
        self.run(merge::abort).await
    }

    async fn checkout_ours(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.run(move |repo| merge::checkout_side(repo, &path, merge::Side::Ours))
            .await
    }

    async fn checkout_theirs(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.run(move |repo| merge::checkout_side(repo, &path, merge::Side::Theirs))
            .await
    }

    async fn conflicted_paths(&self) -> Result<Vec<String>> {
        self.run(merge::conflicted_paths).await
    }

    async fn merge_in_progress(&self) -> Result<bool> {
        self.run(merge::in_progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestVault;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_sets_initial_branch() {
        let dir = TempDir::new().unwrap();
        let history = GitHistory::new(dir.path().join("vault"));

        assert!(!history.is_repository().await);
        history.init("trunk").await.unwrap();
        assert!(history.is_repository().await);
        assert_eq!(
            history.current_branch().await.unwrap().as_deref(),
            Some("trunk")
        );
        assert!(history.rev_parse("HEAD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_all_and_commit() {
        let repo = TestVault::with_initial_commit();
        repo.write("notes/a.md", "alpha");
        repo.write("README.md", "# Changed");
        let history = GitHistory::new(&repo.path);

        history.add_all().await.unwrap();
        let summary = history.staged_summary().await.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.updated, 1);

        let oid = history.commit("Vault sync: 1 added, 1 updated").await.unwrap();
        assert_eq!(oid, repo.head_oid().to_string());
        assert!(history.status().await.unwrap().is_clean());

        let log = history.log(10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].summary, "Vault sync: 1 added, 1 updated");
    }

    #[tokio::test]
    async fn test_status_categories_are_disjoint() {
        let repo = TestVault::new();
        repo.commit_files("Initial", &[("keep.md", "k"), ("gone.md", "g")]);
        repo.write("keep.md", "changed");
        repo.write("new.md", "n");
        std::fs::remove_file(repo.path.join("gone.md")).unwrap();
        repo.write("staged.md", "s");
        repo.stage("staged.md");

        let status = GitHistory::new(&repo.path).status().await.unwrap();
        assert!(status.modified.contains("keep.md"));
        assert!(status.untracked.contains("new.md"));
        assert!(status.deleted.contains("gone.md"));
        assert!(status.staged.contains("staged.md"));
        assert!(!status.untracked.contains("staged.md"));
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let repo = TestVault::new();
        let history = GitHistory::new(&repo.path);
        assert!(history.get_config("vault.sync").await.unwrap().is_none());
        history.set_config("vault.sync", "on").await.unwrap();
        assert_eq!(
            history.get_config("vault.sync").await.unwrap().as_deref(),
            Some("on")
        );
    }

    #[tokio::test]
    async fn test_remotes() {
        let repo = TestVault::new();
        let history = GitHistory::new(&repo.path);
        history
            .add_remote("backup", "/tmp/backup.git")
            .await
            .unwrap();
        let remotes = history.list_remotes().await.unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "backup");

        history.remove_remote("backup").await.unwrap();
        assert!(history.list_remotes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_missing_repository_fails() {
        let dir = TempDir::new().unwrap();
        let err = GitHistory::new(dir.path()).status().await.unwrap_err();
        assert!(matches!(err, SyncError::Git(_)));
    }
}
