//! Fetch, push and remote management

use git2::Repository;

use super::{merge, MergeOutcome, RemoteInfo, TRACKING_REMOTE};
use crate::error::Result;

/// `remote` may be a configured remote name or a URL/path
fn open_remote<'r>(repo: &'r Repository, remote: &str) -> Result<git2::Remote<'r>> {
    match repo.find_remote(remote) {
        Ok(found) => Ok(found),
        Err(_) => Ok(repo.remote_anonymous(remote)?),
    }
}

pub(super) fn tracking_ref(branch: &str) -> String {
    format!("refs/remotes/{}/{}", TRACKING_REMOTE, branch)
}

pub(super) fn list(repo: &Repository) -> Result<Vec<RemoteInfo>> {
    let names = repo.remotes()?;
    let mut result = Vec::new();

    for name in names.iter().flatten() {
        if let Ok(remote) = repo.find_remote(name) {
            result.push(RemoteInfo {
                name: name.to_string(),
                url: remote.url().unwrap_or("").to_string(),
            });
        }
    }

    Ok(result)
}

/// Fetch `branch` into the tracking ref, returning its new tip.
///
/// A branch the remote does not have yields `None`.
pub(super) fn fetch(repo: &Repository, remote: &str, branch: &str) -> Result<Option<String>> {
    let tracking = tracking_ref(branch);
    if let Ok(mut stale) = repo.find_reference(&tracking) {
        stale.delete()?;
    }

    let mut handle = open_remote(repo, remote)?;
    let wanted = format!("refs/heads/{}", branch);
    handle.connect(git2::Direction::Fetch)?;
    let advertised = handle.list()?.iter().any(|head| head.name() == wanted);
    handle.disconnect()?;
    if !advertised {
        return Ok(None);
    }

    let refspec = format!("+{}:{}", wanted, tracking);
    let mut fetch_opts = git2::FetchOptions::new();
    handle.fetch(&[&refspec], Some(&mut fetch_opts), None)?;

    match repo.find_reference(&tracking) {
        Ok(reference) => {
            let tip = reference.target().map(|oid| oid.to_string());
            tracing::debug!("Fetched {} from {}: {:?}", branch, remote, tip);
            Ok(tip)
        }
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(super) fn push(repo: &Repository, remote: &str, branch: &str) -> Result<()> {
    let mut handle = open_remote(repo, remote)?;
    let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
    let mut push_opts = git2::PushOptions::new();
    handle.push(&[&refspec], Some(&mut push_opts))?;
    Ok(())
}

pub(super) fn pull(repo: &Repository, remote: &str, branch: &str) -> Result<MergeOutcome> {
    match fetch(repo, remote, branch)? {
        Some(_) => merge::merge(
            repo,
            &tracking_ref(branch),
            &format!("Merge {} into {}", remote, branch),
        ),
        None => Ok(MergeOutcome::UpToDate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestVault;

    #[test]
    fn test_fetch_from_path() {
        let upstream = TestVault::with_initial_commit();
        let tip = upstream.commit_files("More", &[("b.md", "b")]);
        let local = TestVault::new();

        let fetched = fetch(&local.repo(), &upstream.url(), "main").unwrap();
        assert_eq!(fetched, Some(tip.to_string()));
        assert!(local.repo().find_reference(&tracking_ref("main")).is_ok());
    }

    #[test]
    fn test_fetch_missing_branch() {
        let upstream = TestVault::with_initial_commit();
        let local = TestVault::new();
        let fetched = fetch(&local.repo(), &upstream.url(), "nope").unwrap();
        assert!(fetched.is_none());
    }

    #[test]
    fn test_pull_into_unborn_branch() {
        let upstream = TestVault::with_initial_commit();
        let local = TestVault::new();

        let outcome = pull(&local.repo(), &upstream.url(), "main").unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::FastForward(upstream.head_oid().to_string())
        );
        assert_eq!(local.head_oid(), upstream.head_oid());
        assert!(local.path.join("README.md").exists());
    }
}
