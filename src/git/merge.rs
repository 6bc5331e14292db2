//! Merging and conflict handling

use std::collections::BTreeSet;
use std::path::Path;

use git2::{AnnotatedCommit, Repository};

use super::commit::signature;
use super::staging::workdir;
use super::MergeOutcome;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Side {
    Ours,
    Theirs,
}

fn annotated<'r>(repo: &'r Repository, reference: &str) -> Result<AnnotatedCommit<'r>> {
    let found = repo
        .find_reference(&format!("refs/heads/{}", reference))
        .or_else(|_| repo.find_reference(&format!("refs/remotes/{}", reference)))
        .or_else(|_| repo.find_reference(reference));

    match found {
        Ok(r) => Ok(repo.reference_to_annotated_commit(&r)?),
        Err(_) => {
            let commit = repo.revparse_single(reference)?.peel_to_commit()?;
            Ok(repo.find_annotated_commit(commit.id())?)
        }
    }
}

/// Merge `reference` into the current branch.
///
/// On conflict the merge is left in progress, with marker-annotated files in
/// the working tree and unmerged entries in the index.
pub(super) fn merge(repo: &Repository, reference: &str, message: &str) -> Result<MergeOutcome> {
    let theirs = annotated(repo, reference)?;
    let (analysis, _preference) = repo.merge_analysis(&[&theirs])?;

    if analysis.is_up_to_date() {
        return Ok(MergeOutcome::UpToDate);
    }

    if analysis.is_fast_forward() || analysis.is_unborn() {
        let target = theirs.id();
        let head = repo.find_reference("HEAD")?;
        let refname = match head.symbolic_target() {
            Some(name) => name.to_string(),
            None => "HEAD".to_string(),
        };

        // Working tree first: a safe checkout refuses to overwrite local
        // edits, and the branch only moves once it succeeded.
        let tree = repo.find_commit(target)?.into_object();
        repo.checkout_tree(&tree, Some(git2::build::CheckoutBuilder::new().safe()))?;

        if analysis.is_unborn() {
            repo.reference(&refname, target, true, "Fast-forward from unborn")?;
        } else {
            repo.find_reference(&refname)?
                .set_target(target, "Fast-forward merge")?;
        }
        tracing::debug!("Fast-forwarded to {}", target);
        return Ok(MergeOutcome::FastForward(target.to_string()));
    }

    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout
        .safe()
        .allow_conflicts(true)
        .conflict_style_merge(true);
    repo.merge(&[&theirs], None, Some(&mut checkout))?;

    let index = repo.index()?;
    if index.has_conflicts() {
        let paths = conflicted_paths(repo)?;
        tracing::info!("Merge stopped with {} conflict(s)", paths.len());
        return Ok(MergeOutcome::Conflicted(paths));
    }

    let sig = signature(repo)?;
    let head = repo.head()?.peel_to_commit()?;
    let remote_commit = repo.find_commit(theirs.id())?;
    let tree_oid = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;
    let oid = repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        message,
        &tree,
        &[&head, &remote_commit],
    )?;
    repo.cleanup_state()?;

    Ok(MergeOutcome::Merged(oid.to_string()))
}

/// Abandon an in-progress merge and return to HEAD
pub(super) fn abort(repo: &Repository) -> Result<()> {
    repo.cleanup_state()?;
    if let Ok(head) = repo.head().and_then(|h| h.peel(git2::ObjectType::Commit)) {
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        repo.reset(&head, git2::ResetType::Hard, Some(&mut checkout))?;
    }
    Ok(())
}

pub(super) fn in_progress(repo: &Repository) -> Result<bool> {
    Ok(repo.state() == git2::RepositoryState::Merge)
}

pub(super) fn conflicted_paths(repo: &Repository) -> Result<Vec<String>> {
    let index = repo.index()?;
    let mut paths = BTreeSet::new();

    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        if let Some(entry) = entry {
            paths.insert(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }

    Ok(paths.into_iter().collect())
}

/// Write one side of a conflicted path into the working tree.
///
/// When that side deleted the path, the file is removed.
pub(super) fn checkout_side(repo: &Repository, path: &str, side: Side) -> Result<()> {
    let index = repo.index()?;
    let full = workdir(repo)?.join(path);

    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let matches = [&conflict.ancestor, &conflict.our, &conflict.their]
            .iter()
            .any(|e| e.as_ref().is_some_and(|e| e.path == path.as_bytes()));
        if !matches {
            continue;
        }

        let entry = match side {
            Side::Ours => conflict.our,
            Side::Theirs => conflict.their,
        };

        match entry {
            Some(entry) => {
                let blob = repo.find_blob(entry.id)?;
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&full, blob.content())?;
            }
            None => {
                if full.exists() {
                    std::fs::remove_file(&full)?;
                }
            }
        }
        return Ok(());
    }

    Err(SyncError::NotFound(format!(
        "{} has no unresolved conflict",
        Path::new(path).display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestVault;

    #[test]
    fn test_fast_forward() {
        let repo = TestVault::with_initial_commit();
        repo.branch_here("ahead");
        repo.switch_to("ahead");
        let tip = repo.commit_files("Ahead", &[("a.md", "a")]);
        repo.switch_to("main");

        let outcome = merge(&repo.repo(), "ahead", "merge").unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(tip.to_string()));
        assert!(repo.path.join("a.md").exists());
        assert_eq!(
            merge(&repo.repo(), "ahead", "merge").unwrap(),
            MergeOutcome::UpToDate
        );
    }

    #[test]
    fn test_fast_forward_keeps_local_edits() {
        let repo = TestVault::with_initial_commit();
        let before = repo.head_oid();
        repo.branch_here("ahead");
        repo.switch_to("ahead");
        repo.commit_files("Ahead", &[("README.md", "# Remote")]);
        repo.switch_to("main");
        repo.write("README.md", "# Unsaved");

        assert!(merge(&repo.repo(), "ahead", "merge").is_err());
        assert_eq!(repo.head_oid(), before);
        assert_eq!(
            std::fs::read_to_string(repo.path.join("README.md")).unwrap(),
            "# Unsaved"
        );
    }

    #[test]
    fn test_clean_merge_creates_merge_commit() {
        let repo = TestVault::with_initial_commit();
        repo.branch_here("side");
        repo.commit_files("Local", &[("local.md", "l")]);
        repo.switch_to("side");
        repo.commit_files("Side", &[("side.md", "s")]);
        repo.switch_to("main");

        let outcome = merge(&repo.repo(), "side", "Merge side").unwrap();
        let MergeOutcome::Merged(oid) = outcome else {
            panic!("expected a merge commit, got {:?}", outcome);
        };
        let git = repo.repo();
        let commit = git.find_commit(git2::Oid::from_str(&oid).unwrap()).unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert!(repo.path.join("side.md").exists());
        assert_eq!(git.state(), git2::RepositoryState::Clean);
    }

    #[test]
    fn test_conflict_then_abort() {
        let repo = diverged();
        let before = repo.head_oid();

        let outcome = merge(&repo.repo(), "other", "merge").unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted(vec!["notes.md".to_string()]));
        let content = std::fs::read_to_string(repo.path.join("notes.md")).unwrap();
        assert!(content.contains("<<<<<<< "));

        assert!(in_progress(&repo.repo()).unwrap());

        abort(&repo.repo()).unwrap();
        assert!(!in_progress(&repo.repo()).unwrap());
        assert_eq!(repo.head_oid(), before);
        assert!(conflicted_paths(&repo.repo()).unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(repo.path.join("notes.md")).unwrap(),
            "ours\n"
        );
    }

    #[test]
    fn test_checkout_sides() {
        let repo = diverged();
        merge(&repo.repo(), "other", "merge").unwrap();

        checkout_side(&repo.repo(), "notes.md", Side::Theirs).unwrap();
        assert_eq!(
            std::fs::read_to_string(repo.path.join("notes.md")).unwrap(),
            "theirs\n"
        );
        checkout_side(&repo.repo(), "notes.md", Side::Ours).unwrap();
        assert_eq!(
            std::fs::read_to_string(repo.path.join("notes.md")).unwrap(),
            "ours\n"
        );

        let err = checkout_side(&repo.repo(), "other.md", Side::Ours).unwrap_err();
        assert!(err.is_not_found());
    }

    /// `main` and `other` both edit notes.md from a shared base
    fn diverged() -> TestVault {
        let repo = TestVault::new();
        repo.commit_files("Base", &[("notes.md", "base\n"), ("other.md", "o\n")]);
        repo.branch_here("other");
        repo.commit_files("Ours", &[("notes.md", "ours\n")]);
        repo.switch_to("other");
        repo.commit_files("Theirs", &[("notes.md", "theirs\n")]);
        repo.switch_to("main");
        repo
    }
}
