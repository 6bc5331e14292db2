//! Scratch vaults for the history-layer tests

#![cfg(test)]

use std::path::{Path, PathBuf};

use git2::{Oid, Repository, RepositoryInitOptions};
use tempfile::TempDir;

/// A vault directory with its own history, removed on drop
pub struct TestVault {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestVault {
    /// Empty vault whose unborn HEAD is `main`, with a committer identity
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().to_path_buf();

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&path, &opts).expect("init vault history");

        let mut config = repo.config().expect("repo config");
        config.set_str("user.name", "Vault Sync").expect("user.name");
        config
            .set_str("user.email", "sync@vault.invalid")
            .expect("user.email");

        Self { dir, path }
    }

    /// Vault with one commit holding `README.md`
    pub fn with_initial_commit() -> Self {
        let vault = Self::new();
        vault.commit_files("Initial commit", &[("README.md", "# Vault")]);
        vault
    }

    /// Location usable as a fetch URL by another vault
    pub fn url(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn repo(&self) -> Repository {
        Repository::open(&self.path).expect("open vault history")
    }

    /// Write a note, creating parent folders
    pub fn write(&self, rel: &str, content: &str) {
        let file = self.path.join(rel);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).expect("create folders");
        }
        std::fs::write(&file, content).expect("write note");
    }

    pub fn stage(&self, rel: &str) {
        let repo = self.repo();
        let mut index = repo.index().expect("index");
        index.add_path(Path::new(rel)).expect("stage note");
        index.write().expect("write index");
    }

    /// Write, stage and commit `files` on top of HEAD
    pub fn commit_files(&self, message: &str, files: &[(&str, &str)]) -> Oid {
        for (rel, content) in files {
            self.write(rel, content);
            self.stage(rel);
        }

        let repo = self.repo();
        let tree_id = repo.index().and_then(|mut i| i.write_tree()).expect("write tree");
        let tree = repo.find_tree(tree_id).expect("tree");
        let sig = repo.signature().expect("signature");
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("commit")
    }

    /// Create `name` at HEAD without switching to it
    pub fn branch_here(&self, name: &str) -> Oid {
        let repo = self.repo();
        let commit = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .expect("HEAD commit");
        repo.branch(name, &commit, false).expect("create branch");
        commit.id()
    }

    /// Check out the local branch `name` and point HEAD at it
    pub fn switch_to(&self, name: &str) {
        let repo = self.repo();
        let refname = format!("refs/heads/{}", name);
        let target = repo
            .revparse_single(&refname)
            .and_then(|o| o.peel(git2::ObjectType::Commit))
            .expect("branch tip");
        repo.checkout_tree(&target, None).expect("checkout");
        repo.set_head(&refname).expect("set HEAD");
    }

    pub fn head_oid(&self) -> Oid {
        self.repo()
            .head()
            .ok()
            .and_then(|h| h.target())
            .expect("HEAD target")
    }

    /// Leave the vault mid-merge with `theirs` as the incoming tip
    pub fn record_merge_head(&self, theirs: Oid) {
        let merge_head = self.repo().path().join("MERGE_HEAD");
        std::fs::write(merge_head, format!("{}\n", theirs)).expect("write MERGE_HEAD");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_vault_is_unborn_on_main() {
        let vault = TestVault::new();
        let repo = vault.repo();
        assert!(repo.is_empty().unwrap());
        assert_eq!(
            repo.find_reference("HEAD").unwrap().symbolic_target(),
            Some("refs/heads/main")
        );
    }

    #[test]
    fn test_branch_and_switch() {
        let vault = TestVault::with_initial_commit();
        let base = vault.branch_here("remote");
        vault.switch_to("remote");
        let tip = vault.commit_files("Remote", &[("notes/a.md", "a")]);

        assert_ne!(tip, base);
        assert_eq!(vault.repo().head().unwrap().shorthand(), Some("remote"));
        vault.switch_to("main");
        assert_eq!(vault.head_oid(), base);
        assert!(!vault.path.join("notes/a.md").exists());
    }

    #[test]
    fn test_record_merge_head() {
        let vault = TestVault::with_initial_commit();
        vault.record_merge_head(vault.head_oid());
        assert_eq!(vault.repo().state(), git2::RepositoryState::Merge);
    }
}
