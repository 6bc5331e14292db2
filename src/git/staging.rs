//! Index and working tree operations

use std::path::Path;

use git2::{Repository, Status, StatusOptions};

use crate::error::{Result, SyncError};
use crate::models::{ChangeSummary, WorkingTreeStatus};

fn status_options() -> StatusOptions {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .include_unmodified(false);
    opts
}

pub(super) fn status(repo: &Repository) -> Result<WorkingTreeStatus> {
    let statuses = repo.statuses(Some(&mut status_options()))?;
    let mut result = WorkingTreeStatus::default();

    for entry in statuses.iter() {
        let Some(path) = entry.path() else {
            continue;
        };
        let path = path.to_string();
        let status = entry.status();

        if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
            result.deleted.insert(path);
        } else if status.contains(Status::WT_NEW) {
            result.untracked.insert(path);
        } else if status.intersects(
            Status::INDEX_NEW
                | Status::INDEX_MODIFIED
                | Status::INDEX_RENAMED
                | Status::INDEX_TYPECHANGE,
        ) {
            result.staged.insert(path);
        } else if status.intersects(
            Status::WT_MODIFIED | Status::WT_RENAMED | Status::WT_TYPECHANGE | Status::CONFLICTED,
        ) {
            result.modified.insert(path);
        }
    }

    Ok(result)
}

pub(super) fn add(repo: &Repository, path: &str) -> Result<()> {
    let workdir = workdir(repo)?;
    let mut index = repo.index()?;

    if workdir.join(path).exists() {
        index.add_path(Path::new(path))?;
    } else {
        index.remove_path(Path::new(path))?;
    }
    index.write()?;
    Ok(())
}

pub(super) fn add_all(repo: &Repository) -> Result<()> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    Ok(())
}

/// Counts staged changes between HEAD and the index
pub(super) fn staged_summary(repo: &Repository) -> Result<ChangeSummary> {
    let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());
    let diff = repo.diff_tree_to_index(head_tree.as_ref(), None, None)?;

    let mut summary = ChangeSummary::default();
    for delta in diff.deltas() {
        match delta.status() {
            git2::Delta::Added | git2::Delta::Copied => summary.added += 1,
            git2::Delta::Deleted => summary.deleted += 1,
            _ => summary.updated += 1,
        }
    }
    Ok(summary)
}

pub(super) fn diff_unstaged(repo: &Repository, path: Option<&str>) -> Result<String> {
    let mut opts = diff_options(path);
    let diff = repo.diff_index_to_workdir(None, Some(&mut opts))?;
    patch_text(&diff)
}

pub(super) fn diff_staged(repo: &Repository, path: Option<&str>) -> Result<String> {
    let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());
    let mut opts = diff_options(path);
    let diff = repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))?;
    patch_text(&diff)
}

fn diff_options(path: Option<&str>) -> git2::DiffOptions {
    let mut opts = git2::DiffOptions::new();
    opts.include_untracked(true).show_untracked_content(true);
    if let Some(path) = path {
        opts.pathspec(path);
    }
    opts
}

fn patch_text(diff: &git2::Diff) -> Result<String> {
    let mut text = String::new();
    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            text.push(line.origin());
        }
        text.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(text)
}

/// Discard the unstaged change to one path
pub(super) fn reset_path(repo: &Repository, path: &str) -> Result<()> {
    let index = repo.index()?;

    if index.get_path(Path::new(path), 0).is_none() {
        // Untracked: nothing to go back to
        let full = workdir(repo)?.join(path);
        if full.is_file() {
            std::fs::remove_file(full)?;
        }
        return Ok(());
    }

    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force().path(path);
    repo.checkout_index(None, Some(&mut checkout))?;
    Ok(())
}

pub(super) fn reset_hard(repo: &Repository, reference: &str) -> Result<()> {
    let target = repo.revparse_single(reference)?.peel(git2::ObjectType::Commit)?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.reset(&target, git2::ResetType::Hard, Some(&mut checkout))?;
    repo.cleanup_state()?;
    tracing::debug!("Reset hard to {}", target.id());
    Ok(())
}

/// Remove untracked files and the directories they leave empty
pub(super) fn clean(repo: &Repository) -> Result<Vec<String>> {
    let workdir = workdir(repo)?;
    let statuses = repo.statuses(Some(&mut status_options()))?;

    let untracked: Vec<String> = statuses
        .iter()
        .filter(|e| e.status().contains(Status::WT_NEW))
        .filter_map(|e| e.path().map(str::to_string))
        .collect();

    for path in &untracked {
        let full = workdir.join(path);
        if full.is_dir() {
            std::fs::remove_dir_all(&full)?;
        } else if full.exists() {
            std::fs::remove_file(&full)?;
        }
        prune_empty_parents(&workdir, &full);
    }

    Ok(untracked)
}

fn prune_empty_parents(workdir: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == workdir || std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Check out files matching `pathspec` from the index
pub(super) fn restore(repo: &Repository, pathspec: &str) -> Result<()> {
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force().path(pathspec);
    repo.checkout_index(None, Some(&mut checkout))?;
    Ok(())
}

pub(super) fn workdir(repo: &Repository) -> Result<&Path> {
    repo.workdir()
        .ok_or_else(|| SyncError::OperationFailed("repository has no working tree".to_string()))
}
