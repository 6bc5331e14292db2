//! Commits, refs and history queries

use std::path::Path;

use git2::{Oid, Repository};

use crate::error::Result;
use crate::models::Commit;

const FALLBACK_NAME: &str = "Vault Sync";
const FALLBACK_EMAIL: &str = "vault-sync@localhost";

/// Configured identity, or a fixed one when `user.name`/`user.email` are unset
pub(super) fn signature(repo: &Repository) -> Result<git2::Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Ok(git2::Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
    }
}

/// Commit the index onto HEAD.
///
/// A pending merge contributes its heads as additional parents and is
/// cleared once the commit exists.
pub(super) fn commit(repo: &Repository, message: &str) -> Result<String> {
    let sig = signature(repo)?;
    let tree_id = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let mut parent_ids = Vec::new();
    if let Some(head) = repo.head().ok().and_then(|h| h.target()) {
        parent_ids.push(head);
    }

    let merge_heads = merge_heads(repo)?;
    parent_ids.extend(merge_heads.iter().copied());

    let parents = parent_ids
        .iter()
        .map(|id| repo.find_commit(*id))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;

    if !merge_heads.is_empty() {
        repo.cleanup_state()?;
    }

    tracing::debug!("Committed {} with {} parent(s)", oid, parent_refs.len());
    Ok(oid.to_string())
}

/// Commits recorded in `MERGE_HEAD` while a merge is in progress
pub(super) fn merge_heads(repo: &Repository) -> Result<Vec<Oid>> {
    let content = match std::fs::read_to_string(repo.path().join("MERGE_HEAD")) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Ok(Oid::from_str(line)?))
        .collect()
}

/// Up to `count` commits reachable from HEAD, newest first
pub(super) fn log(repo: &Repository, count: usize) -> Result<Vec<Commit>> {
    if repo.head().is_err() {
        return Ok(Vec::new());
    }

    let mut revwalk = repo.revwalk()?;
    revwalk.push_head()?;
    revwalk.set_sorting(git2::Sort::TIME | git2::Sort::TOPOLOGICAL)?;

    let mut commits = Vec::new();
    for oid in revwalk.take(count) {
        let commit = repo.find_commit(oid?)?;
        commits.push(Commit::from_git2(&commit));
    }
    Ok(commits)
}

pub(super) fn read_file_at(
    repo: &Repository,
    reference: &str,
    path: &str,
) -> Result<Option<Vec<u8>>> {
    let tree = match repo.revparse_single(reference) {
        Ok(object) => object.peel_to_tree()?,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let object = entry.to_object(repo)?;
    Ok(object.as_blob().map(|blob| blob.content().to_vec()))
}

pub(super) fn rev_parse(repo: &Repository, spec: &str) -> Result<Option<String>> {
    match repo.revparse_single(spec) {
        Ok(object) => {
            let id = object
                .peel(git2::ObjectType::Commit)
                .map(|c| c.id())
                .unwrap_or_else(|_| object.id());
            Ok(Some(id.to_string()))
        }
        Err(e)
            if matches!(
                e.code(),
                git2::ErrorCode::NotFound | git2::ErrorCode::UnbornBranch
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub(super) fn is_ancestor(repo: &Repository, ancestor: &str, descendant: &str) -> Result<bool> {
    let (Ok(ancestor), Ok(descendant)) = (Oid::from_str(ancestor), Oid::from_str(descendant))
    else {
        return Ok(false);
    };

    if repo.find_commit(ancestor).is_err() || repo.find_commit(descendant).is_err() {
        return Ok(false);
    }
    if ancestor == descendant {
        return Ok(true);
    }
    Ok(repo.graph_descendant_of(descendant, ancestor)?)
}

/// Branch HEAD points at, including an unborn one
pub(super) fn current_branch(repo: &Repository) -> Result<Option<String>> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
        Ok(_) => Ok(None),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|t| t.strip_prefix("refs/heads/"))
                .map(str::to_string))
        }
        Err(e) => Err(e.into()),
    }
}

/// Switch to a local branch, or detach at any other revision
pub(super) fn checkout(repo: &Repository, reference: &str) -> Result<()> {
    let mut opts = git2::build::CheckoutBuilder::new();
    opts.safe();

    if let Ok(branch) = repo.find_branch(reference, git2::BranchType::Local) {
        let target = branch.get().peel(git2::ObjectType::Commit)?;
        repo.checkout_tree(&target, Some(&mut opts))?;
        let refname = branch.get().name().unwrap_or(reference).to_string();
        repo.set_head(&refname)?;
    } else {
        let target = repo.revparse_single(reference)?.peel(git2::ObjectType::Commit)?;
        repo.checkout_tree(&target, Some(&mut opts))?;
        repo.set_head_detached(target.id())?;
    }
    Ok(())
}
