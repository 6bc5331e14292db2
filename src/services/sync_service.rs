//! Sync orchestrator
//!
//! Drives connect, push, pull and restore for one vault. Every operation
//! holds the [`BusyGuard`] for its whole run; a call that finds it taken
//! returns [`SyncOutcome::Busy`] without doing anything.
//!
//! A push whose merge stops on conflicts returns
//! [`SyncOutcome::Suspended`] with a [`PendingMerge`]. Hand that value back
//! to [`SyncService::resolve`] to finish the push, or to
//! [`SyncService::cancel`] to roll the merge back.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::busy::BusyGuard;
use super::lfs_service::LfsService;
use super::mirror_service::MirrorService;
use super::remote_fs::RemoteFs;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::git::{GitHistory, HistoryGraph, MergeOutcome, TRACKING_REMOTE};
use crate::models::{
    strip_conflict_markers, ConflictFile, Pointer, Resolution, SyncStatus, TrackedPatterns,
    WorkingTreeStatus,
};
use crate::store::{ObjectStore, S3Backend};

/// Directory holding the history graph, locally and under the vault prefix
pub const HISTORY_DIR: &str = ".git";

/// Message of the commit that concludes a resolved merge
pub const RESOLVE_MESSAGE: &str = "Resolve merge conflicts";

const MERGE_MESSAGE: &str = "Merge remote vault history";

/// Receives every status transition
pub type Reporter = Arc<dyn Fn(SyncStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectOutcome {
    /// Neither side had history; a fresh local repository was created
    Initialized,
    /// Remote history was mirrored down and checked out
    Cloned,
    /// Local history already existed
    AlreadyConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome", content = "pending")]
pub enum SyncOutcome {
    /// Local and remote tips already agree
    UpToDate,
    Pushed,
    Pulled,
    Restored,
    /// A pending merge was rolled back
    Cancelled,
    /// Another operation was running; nothing was done
    Busy,
    /// The push stopped on merge conflicts and waits for a resolution
    Suspended(PendingMerge),
}

/// What to do once a pending merge is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Continuation {
    /// Finish the push that started the merge by mirroring history up
    ResumePush,
}

/// A merge stopped on conflicts, waiting for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMerge {
    /// Local tip before remote history was merged in
    pub pre_merge_tip: Option<String>,
    pub remote_tip: String,
    pub conflicts: Vec<ConflictFile>,
    pub continuation: Continuation,
}

impl PendingMerge {
    pub fn paths(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.path.as_str()).collect()
    }
}

/// User decision callback for merge conflicts
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// A resolution for every conflicting path, or `None` to cancel the merge
    async fn resolve(&self, conflicts: &[ConflictFile]) -> Option<HashMap<String, Resolution>>;
}

/// Synchronizes one local vault with its remote copy
#[derive(Clone)]
pub struct SyncService {
    config: SyncConfig,
    history: Arc<dyn HistoryGraph>,
    remote: RemoteFs,
    lfs: LfsService,
    mirror: MirrorService,
    reporter: Option<Reporter>,
    busy: BusyGuard,
}

impl SyncService {
    pub fn new(config: SyncConfig, store: ObjectStore, history: Arc<dyn HistoryGraph>) -> Self {
        let remote = RemoteFs::new(store, config.normalized_prefix());
        let lfs = LfsService::new(config.local_root.clone(), remote.clone());
        let mirror = MirrorService::new(remote.clone());

        Self {
            config,
            history,
            remote,
            lfs,
            mirror,
            reporter: None,
            busy: BusyGuard::new(),
        }
    }

    /// Build a service talking to S3, with history in `<local_root>/.git`
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let backend = S3Backend::connect(&config).await?;
        let history = Arc::new(GitHistory::new(config.local_root.clone()));
        Ok(Self::new(config, ObjectStore::new(Arc::new(backend)), history))
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local_root(&self) -> PathBuf {
        self.config.local_root.clone()
    }

    pub fn lfs(&self) -> &LfsService {
        &self.lfs
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    fn root(&self) -> &Path {
        &self.config.local_root
    }

    fn report(&self, status: SyncStatus) {
        tracing::debug!("Status: {:?}", status);
        if let Some(reporter) = &self.reporter {
            reporter(status);
        }
    }

    // ==========================================================================
    // Connect
    // ==========================================================================

    /// Attach the local vault to its remote copy
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        self.config.validate()?;
        let Some(_guard) = self.busy.try_acquire() else {
            return Err(SyncError::OperationFailed(
                "another sync operation is running".to_string(),
            ));
        };

        let result = self.connect_locked().await;
        match &result {
            Ok(outcome) => {
                tracing::info!("Connect finished: {:?}", outcome);
                self.report_working_state().await;
            }
            Err(e) => self.report_failure(e),
        }
        result
    }

    async fn connect_locked(&self) -> Result<ConnectOutcome> {
        if self.history.is_repository().await {
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        self.report(SyncStatus::syncing("Connecting"));
        let remote_exists = self.remote.exists(&format!("{}/HEAD", HISTORY_DIR)).await?;

        if !remote_exists {
            self.history.init(&self.config.branch).await?;
            return Ok(ConnectOutcome::Initialized);
        }

        self.report(SyncStatus::syncing("Downloading history"));
        tokio::fs::create_dir_all(self.root()).await?;
        self.mirror
            .copy_history_down(HISTORY_DIR, &self.root().join(HISTORY_DIR))
            .await?;

        if self.history.rev_parse("HEAD").await?.is_some() {
            self.history.reset_hard("HEAD").await?;
        }
        self.smudge_tracked().await?;
        Ok(ConnectOutcome::Cloned)
    }

    // ==========================================================================
    // Push
    // ==========================================================================

    /// Commit local changes and publish them
    pub async fn push(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.busy.try_acquire() else {
            tracing::debug!("Push skipped: another operation is running");
            return Ok(SyncOutcome::Busy);
        };

        let result = self.push_locked().await;
        self.settle(result).await
    }

    async fn push_locked(&self) -> Result<SyncOutcome> {
        self.ensure_connected().await?;
        self.ensure_no_pending_merge().await?;
        self.report(SyncStatus::syncing("Checking for changes"));

        let patterns = TrackedPatterns::load(self.root()).await;
        let status = self.local_status(&patterns).await?;
        let local_tip = self.history.rev_parse("HEAD").await?;
        let remote_tip = self.remote_tip().await?;

        if status.is_clean() && local_tip == remote_tip {
            tracing::info!("Push: already up to date");
            return Ok(SyncOutcome::UpToDate);
        }

        if !status.is_clean() {
            self.commit_changes(&patterns, &status).await?;
        }

        let local_tip = self.history.rev_parse("HEAD").await?;
        let Some(remote_tip) = remote_tip else {
            if local_tip.is_none() {
                return Ok(SyncOutcome::UpToDate);
            }
            self.publish().await?;
            return Ok(SyncOutcome::Pushed);
        };

        if local_tip.as_deref() == Some(remote_tip.as_str()) {
            return Ok(SyncOutcome::UpToDate);
        }

        if let Some(local) = &local_tip {
            if self.history.is_ancestor(&remote_tip, local).await? {
                tracing::info!("Push: fast-forward from {}", remote_tip);
                self.publish().await?;
                return Ok(SyncOutcome::Pushed);
            }
        }

        tracing::info!("Push: histories diverged, merging {}", remote_tip);
        match self.fetch_and_merge(&patterns).await? {
            MergeOutcome::Conflicted(paths) => {
                let pending = PendingMerge {
                    pre_merge_tip: local_tip,
                    remote_tip,
                    conflicts: self.read_conflicts(&paths).await?,
                    continuation: Continuation::ResumePush,
                };
                self.report(SyncStatus::syncing("Waiting for conflict resolution"));
                Ok(SyncOutcome::Suspended(pending))
            }
            _ => {
                self.publish().await?;
                Ok(SyncOutcome::Pushed)
            }
        }
    }

    /// Offload tracked files, stage everything and commit with a summary message
    async fn commit_changes(
        &self,
        patterns: &TrackedPatterns,
        status: &WorkingTreeStatus,
    ) -> Result<()> {
        self.repoint(patterns).await?;

        let candidates: Vec<String> = status
            .changed_paths()
            .into_iter()
            .filter(|p| patterns.matches(p))
            .collect();

        if !candidates.is_empty() {
            let reporter = self.reporter.clone();
            let mut on_file = move |path: &str, index: usize, total: usize| {
                if let Some(reporter) = &reporter {
                    let percent = (index * 100 / total.max(1)) as u8;
                    reporter(SyncStatus::progress(format!("Uploading {}", path), percent));
                }
            };
            let cleaned = self.lfs.clean_paths(&candidates, Some(&mut on_file)).await?;
            tracing::info!("Offloaded {} file(s)", cleaned.len());
        }

        self.report(SyncStatus::syncing("Committing"));
        self.history.add_all().await?;
        let summary = self.history.staged_summary().await?;
        if summary.added + summary.updated + summary.deleted == 0 {
            tracing::debug!("Nothing staged after offload; skipping commit");
            return Ok(());
        }

        let oid = self.history.commit(&summary.commit_message()).await?;
        tracing::info!("Committed {}: {}", oid, summary.commit_message());
        Ok(())
    }

    /// Mirror local history up, then bring offloaded files back
    async fn publish(&self) -> Result<()> {
        self.report(SyncStatus::syncing("Uploading history"));
        self.mirror
            .copy_tree_up(&self.root().join(HISTORY_DIR), HISTORY_DIR)
            .await?;
        self.smudge_tracked().await
    }

    // ==========================================================================
    // Conflict sub-protocol
    // ==========================================================================

    /// Apply the user's resolutions and continue the suspended operation
    pub async fn resolve(
        &self,
        pending: &PendingMerge,
        resolutions: &HashMap<String, Resolution>,
    ) -> Result<SyncOutcome> {
        let Some(_guard) = self.busy.try_acquire() else {
            return Ok(SyncOutcome::Busy);
        };

        let result = self.resolve_locked(pending, resolutions).await;
        self.settle(result).await
    }

    async fn resolve_locked(
        &self,
        pending: &PendingMerge,
        resolutions: &HashMap<String, Resolution>,
    ) -> Result<SyncOutcome> {
        let missing: Vec<&str> = pending
            .paths()
            .into_iter()
            .filter(|p| !resolutions.contains_key(*p))
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::OperationFailed(format!(
                "no resolution for: {}",
                missing.join(", ")
            )));
        }
        self.ensure_pending_merge().await?;

        // Two pointers glued together name no object
        let patterns = TrackedPatterns::load(self.root()).await;
        let offloaded: Vec<&str> = pending
            .paths()
            .into_iter()
            .filter(|p| resolutions[*p] == Resolution::KeepBoth && patterns.matches(p))
            .collect();
        if !offloaded.is_empty() {
            return Err(SyncError::OperationFailed(format!(
                "offloaded files cannot keep both sides: {}",
                offloaded.join(", ")
            )));
        }

        self.report(SyncStatus::syncing("Applying resolutions"));
        for conflict in &pending.conflicts {
            let resolution = resolutions[&conflict.path];
            tracing::debug!("Resolving {} with {:?}", conflict.path, resolution);

            match resolution {
                Resolution::KeepLocal => self.history.checkout_ours(&conflict.path).await?,
                Resolution::KeepRemote => self.history.checkout_theirs(&conflict.path).await?,
                Resolution::KeepBoth => {
                    let path = self.root().join(&conflict.path);
                    let content = match tokio::fs::read(&path).await {
                        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            conflict.content.clone()
                        }
                        Err(e) => return Err(e.into()),
                    };
                    tokio::fs::write(&path, strip_conflict_markers(&content)).await?;
                }
            }
            self.history.add(&conflict.path).await?;
        }

        let oid = self.history.commit(RESOLVE_MESSAGE).await?;
        tracing::info!("Merge resolved as {}", oid);

        match pending.continuation {
            Continuation::ResumePush => {
                self.publish().await?;
                Ok(SyncOutcome::Pushed)
            }
        }
    }

    /// Abandon a pending merge, restoring the pre-merge state exactly
    pub async fn cancel(&self, pending: &PendingMerge) -> Result<SyncOutcome> {
        let Some(_guard) = self.busy.try_acquire() else {
            return Ok(SyncOutcome::Busy);
        };

        let result = self.cancel_locked(pending).await;
        self.settle(result).await
    }

    async fn cancel_locked(&self, pending: &PendingMerge) -> Result<SyncOutcome> {
        self.ensure_pending_merge().await?;
        self.report(SyncStatus::syncing("Cancelling merge"));
        self.history.merge_abort().await?;
        if let Some(tip) = &pending.pre_merge_tip {
            self.history.reset_hard(tip).await?;
        }
        self.smudge_tracked().await?;
        tracing::info!("Merge cancelled; back at {:?}", pending.pre_merge_tip);
        Ok(SyncOutcome::Cancelled)
    }

    /// Push, asking `resolver` to settle any conflicts on the way
    pub async fn push_with(&self, resolver: &dyn ConflictResolver) -> Result<SyncOutcome> {
        match self.push().await? {
            SyncOutcome::Suspended(pending) => match resolver.resolve(&pending.conflicts).await {
                Some(resolutions) => match self.resolve(&pending, &resolutions).await {
                    Ok(outcome) => Ok(outcome),
                    Err(e) => {
                        if let Err(cancel_err) = self.cancel(&pending).await {
                            tracing::warn!("Could not cancel after failed resolve: {}", cancel_err);
                        }
                        Err(e)
                    }
                },
                None => self.cancel(&pending).await,
            },
            other => Ok(other),
        }
    }

    // ==========================================================================
    // Pull
    // ==========================================================================

    /// Merge remote history into the local vault.
    ///
    /// Conflicts are not resolved here: the merge is rolled back and
    /// [`SyncError::MergeConflict`] lists the paths.
    pub async fn pull(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.busy.try_acquire() else {
            tracing::debug!("Pull skipped: another operation is running");
            return Ok(SyncOutcome::Busy);
        };

        let result = self.pull_locked().await;
        self.settle(result).await
    }

    async fn pull_locked(&self) -> Result<SyncOutcome> {
        self.ensure_connected().await?;
        self.ensure_no_pending_merge().await?;
        self.report(SyncStatus::syncing("Checking remote"));

        let local_tip = self.history.rev_parse("HEAD").await?;
        let remote_tip = self.remote_tip().await?;
        if remote_tip.is_none() || local_tip == remote_tip {
            tracing::info!("Pull: already up to date");
            return Ok(SyncOutcome::UpToDate);
        }

        // Merging and rolling back both rewrite the working tree
        let patterns = TrackedPatterns::load(self.root()).await;
        let status = self.local_status(&patterns).await?;
        if !status.is_clean() {
            let dirty: BTreeSet<String> = status
                .changed_paths()
                .into_iter()
                .chain(status.deleted.iter().cloned())
                .collect();
            tracing::warn!("Pull refused: {} uncommitted path(s)", dirty.len());
            return Err(SyncError::UncommittedChanges(dirty.into_iter().collect()));
        }

        match self.fetch_and_merge(&patterns).await? {
            MergeOutcome::Conflicted(paths) => {
                tracing::warn!("Pull hit conflicts in {:?}; rolling back", paths);
                self.history.merge_abort().await?;
                if let Some(tip) = &local_tip {
                    self.history.reset_hard(tip).await?;
                }
                self.smudge_tracked().await?;
                Err(SyncError::MergeConflict(paths))
            }
            outcome => {
                tracing::info!("Pull merged: {:?}", outcome);
                self.smudge_tracked().await?;
                Ok(SyncOutcome::Pulled)
            }
        }
    }

    /// Stage remote history in a temporary directory, fetch from it and merge
    async fn fetch_and_merge(&self, patterns: &TrackedPatterns) -> Result<MergeOutcome> {
        self.report(SyncStatus::syncing("Fetching remote history"));
        let staging = tempfile::TempDir::new()?;
        let staged_git = staging.path().join(HISTORY_DIR);
        self.mirror.copy_history_down(HISTORY_DIR, &staged_git).await?;

        let fetched = self
            .history
            .fetch(&staged_git.to_string_lossy(), &self.config.branch)
            .await?;
        staging.close()?;

        if fetched.is_none() {
            return Err(SyncError::NotFound(format!(
                "remote branch {}",
                self.config.branch
            )));
        }

        self.repoint(patterns).await?;
        self.report(SyncStatus::syncing("Merging"));
        self.history
            .merge(
                &format!("{}/{}", TRACKING_REMOTE, self.config.branch),
                MERGE_MESSAGE,
            )
            .await
    }

    async fn read_conflicts(&self, paths: &[String]) -> Result<Vec<ConflictFile>> {
        let mut conflicts = Vec::with_capacity(paths.len());
        for path in paths {
            let content = match tokio::fs::read(self.root().join(path)).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e.into()),
            };
            conflicts.push(ConflictFile {
                path: path.clone(),
                content,
            });
        }
        Ok(conflicts)
    }

    // ==========================================================================
    // Restore
    // ==========================================================================

    /// Discard every uncommitted change. Refused unless `confirmed`.
    pub async fn restore(&self, confirmed: bool) -> Result<SyncOutcome> {
        if !confirmed {
            return Err(SyncError::RestoreNotConfirmed);
        }
        let Some(_guard) = self.busy.try_acquire() else {
            return Ok(SyncOutcome::Busy);
        };

        let result = self.restore_locked().await;
        self.settle(result).await
    }

    async fn restore_locked(&self) -> Result<SyncOutcome> {
        self.ensure_connected().await?;
        self.ensure_no_pending_merge().await?;
        self.report(SyncStatus::syncing("Restoring"));

        if self.history.rev_parse("HEAD").await?.is_some() {
            self.history.reset_hard("HEAD").await?;
        }
        let removed = self.history.clean().await?;
        tracing::info!("Restore removed {} untracked file(s)", removed.len());
        self.smudge_tracked().await?;
        Ok(SyncOutcome::Restored)
    }

    // ==========================================================================
    // Status
    // ==========================================================================

    /// Compute and report whether the vault has unsynced changes
    pub async fn refresh_status(&self) -> Result<SyncStatus> {
        let status = self.working_state().await?;
        self.report(status.clone());
        Ok(status)
    }

    async fn working_state(&self) -> Result<SyncStatus> {
        if !self.history.is_repository().await {
            return Ok(SyncStatus::Disconnected);
        }
        let patterns = TrackedPatterns::load(self.root()).await;
        if self.local_status(&patterns).await?.is_clean() {
            Ok(SyncStatus::Clean)
        } else {
            Ok(SyncStatus::HasChanges)
        }
    }

    async fn report_working_state(&self) {
        match self.working_state().await {
            Ok(status) => self.report(status),
            Err(e) => tracing::warn!("Could not compute status: {}", e),
        }
    }

    fn report_failure(&self, error: &SyncError) {
        tracing::error!("Sync failed: {}", error);
        self.report(SyncStatus::Error {
            message: error.to_string(),
        });
    }

    async fn settle(&self, result: Result<SyncOutcome>) -> Result<SyncOutcome> {
        match &result {
            Ok(SyncOutcome::Suspended(pending)) => {
                tracing::info!("Merge suspended on {} conflict(s)", pending.conflicts.len());
            }
            Ok(_) => self.report_working_state().await,
            Err(e) => self.report_failure(e),
        }
        result
    }

    // ==========================================================================
    // Helpers
    // ==========================================================================

    async fn ensure_connected(&self) -> Result<()> {
        if self.history.is_repository().await {
            Ok(())
        } else {
            Err(SyncError::Config(format!(
                "{} is not connected; run connect first",
                self.root().display()
            )))
        }
    }

    async fn ensure_no_pending_merge(&self) -> Result<()> {
        if self.history.merge_in_progress().await? {
            Err(SyncError::MergeInProgress)
        } else {
            Ok(())
        }
    }

    async fn ensure_pending_merge(&self) -> Result<()> {
        if self.history.merge_in_progress().await? {
            Ok(())
        } else {
            Err(SyncError::OperationFailed(
                "no merge is waiting for resolution".to_string(),
            ))
        }
    }

    /// Tip of the remote branch, read from the mirrored history.
    ///
    /// Follows a symbolic `HEAD` to the loose ref and falls back to
    /// `packed-refs`. `None` when the remote has no history.
    pub async fn remote_tip(&self) -> Result<Option<String>> {
        let head = match self
            .remote
            .read_to_string(&format!("{}/HEAD", HISTORY_DIR))
            .await
        {
            Ok(head) => head,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let head = head.trim();
        let Some(refname) = head.strip_prefix("ref:").map(str::trim) else {
            return Ok(Some(head.to_string()).filter(|h| !h.is_empty()));
        };

        match self
            .remote
            .read_to_string(&format!("{}/{}", HISTORY_DIR, refname))
            .await
        {
            Ok(tip) => return Ok(Some(tip.trim().to_string()).filter(|t| !t.is_empty())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self
            .remote
            .read_to_string(&format!("{}/packed-refs", HISTORY_DIR))
            .await
        {
            Ok(packed) => Ok(find_packed_ref(&packed, refname)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Working tree status, ignoring offloaded files that were restored
    /// to exactly the content their committed pointer names
    async fn local_status(&self, patterns: &TrackedPatterns) -> Result<WorkingTreeStatus> {
        let mut status = self.history.status().await?;
        if patterns.is_empty() {
            return Ok(status);
        }

        let mut restored = Vec::new();
        for path in status.modified.iter().filter(|p| patterns.matches(p)) {
            if self.committed_pointer_if_restored(path).await?.is_some() {
                restored.push(path.clone());
            }
        }
        for path in restored {
            status.modified.remove(&path);
        }
        Ok(status)
    }

    /// The HEAD pointer of `path`, if the file on disk is its restored content
    async fn committed_pointer_if_restored(&self, path: &str) -> Result<Option<Pointer>> {
        let Some(committed) = self.history.show("HEAD", path).await? else {
            return Ok(None);
        };
        let Some(pointer) = Pointer::parse(&committed) else {
            return Ok(None);
        };
        if self.lfs.matches_pointer(path, &pointer).await? {
            Ok(Some(pointer))
        } else {
            Ok(None)
        }
    }

    /// Put pointer text back in place of restored offloaded files so the
    /// working tree matches HEAD byte for byte
    async fn repoint(&self, patterns: &TrackedPatterns) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }
        let status = self.history.status().await?;
        for path in status.modified.iter().filter(|p| patterns.matches(p)) {
            if let Some(pointer) = self.committed_pointer_if_restored(path).await? {
                self.lfs.write_pointer(path, &pointer).await?;
            }
        }
        Ok(())
    }

    async fn smudge_tracked(&self) -> Result<()> {
        let patterns = TrackedPatterns::load(self.root()).await;
        if patterns.is_empty() {
            return Ok(());
        }

        let reporter = self.reporter.clone();
        let mut on_file = move |path: &str, index: usize, total: usize| {
            if let Some(reporter) = &reporter {
                let percent = (index * 100 / total.max(1)) as u8;
                reporter(SyncStatus::progress(format!("Downloading {}", path), percent));
            }
        };
        let restored = self.lfs.smudge_files(&patterns, Some(&mut on_file)).await?;
        if !restored.is_empty() {
            tracing::info!("Restored {} offloaded file(s)", restored.len());
        }
        Ok(())
    }
}

/// Look a ref up in `packed-refs` text
fn find_packed_ref(packed: &str, refname: &str) -> Option<String> {
    packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| line.split_once(' '))
        .find(|(_, name)| name.trim() == refname)
        .map(|(oid, _)| oid.to_string())
}
