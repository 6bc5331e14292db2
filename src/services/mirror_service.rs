//! Full-tree copies between a local directory and the store

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::remote_fs::RemoteFs;
use crate::error::Result;

/// Mirrors a directory byte-for-byte, one file at a time
#[derive(Clone)]
pub struct MirrorService {
    remote: RemoteFs,
}

/// Directories a repository needs even when empty; the store only carries files
const HISTORY_SKELETON: &[&str] = &["objects/pack", "objects/info", "refs/heads", "refs/tags"];

/// Upload order: objects before refs, so a remote ref never names a missing object
fn upload_rank(rel: &str) -> u8 {
    if rel.starts_with("objects/") {
        0
    } else if rel == "HEAD" || rel == "packed-refs" || rel.starts_with("refs/") {
        2
    } else {
        1
    }
}

impl MirrorService {
    pub fn new(remote: RemoteFs) -> Self {
        Self { remote }
    }

    /// Copy every file below `local_dir` to `remote_dir`, returning the count
    pub async fn copy_tree_up(&self, local_dir: &Path, remote_dir: &str) -> Result<usize> {
        let mut files = list_local_files(local_dir).await?;
        files.sort_by(|a, b| upload_rank(&a.0).cmp(&upload_rank(&b.0)).then(a.0.cmp(&b.0)));

        let store = self.remote.store();
        for (rel, path) in &files {
            let key = self.remote.key(&format!("{}/{}", remote_dir, rel));
            let mut file = tokio::fs::File::open(path).await?;
            let size = file.metadata().await?.len();
            store.put_reader(&key, &mut file, size, None).await?;
        }

        tracing::info!(
            "Mirrored {} file(s) from {:?} up to {}",
            files.len(),
            local_dir,
            self.remote.key(remote_dir)
        );
        Ok(files.len())
    }

    /// Copy every file below `remote_dir` into `local_dir`, returning the count
    pub async fn copy_tree_down(&self, remote_dir: &str, local_dir: &Path) -> Result<usize> {
        let files = self.remote.walk(remote_dir).await?;
        let store = self.remote.store();

        for (rel, _size) in &files {
            let key = self.remote.key(&format!("{}/{}", remote_dir, rel));
            let dest = local_dir.join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut body = store.get_stream(&key).await?;
            let mut file = tokio::fs::File::create(&dest).await?;
            tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
        }

        tracing::info!(
            "Mirrored {} file(s) from {} down to {:?}",
            files.len(),
            self.remote.key(remote_dir),
            local_dir
        );
        Ok(files.len())
    }

    /// Copy a mirrored history directory down and recreate its empty folders
    pub async fn copy_history_down(&self, remote_dir: &str, local_dir: &Path) -> Result<usize> {
        let count = self.copy_tree_down(remote_dir, local_dir).await?;
        for dir in HISTORY_SKELETON {
            tokio::fs::create_dir_all(local_dir.join(dir)).await?;
        }
        Ok(count)
    }
}

/// `(relative path, absolute path)` of every file below `dir`
async fn list_local_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![(String::new(), dir.to_path_buf())];

    while let Some((prefix, current)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((rel, entry.path()));
            } else if file_type.is_file() {
                files.push((rel, entry.path()));
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, ObjectStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn mirror() -> (Arc<MemoryBackend>, MirrorService) {
        let backend = Arc::new(MemoryBackend::with_page_size(3));
        let remote = RemoteFs::new(ObjectStore::new(backend.clone()), "vault");
        (backend, MirrorService::new(remote))
    }

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_preserves_bytes() {
        let (backend, mirror) = mirror();
        let src = TempDir::new().unwrap();
        write(src.path(), "HEAD", b"ref: refs/heads/main\n");
        write(src.path(), "refs/heads/main", b"abc\n");
        write(src.path(), "objects/ab/cdef", &[0, 1, 2, 255]);
        write(src.path(), "objects/pack/p.pack", &vec![7u8; 10_000]);

        assert_eq!(mirror.copy_tree_up(src.path(), ".git").await.unwrap(), 4);
        assert_eq!(
            backend.object("vault/.git/objects/ab/cdef").unwrap(),
            vec![0, 1, 2, 255]
        );

        let dest = TempDir::new().unwrap();
        assert_eq!(
            mirror.copy_tree_down(".git", dest.path()).await.unwrap(),
            4
        );
        for rel in ["HEAD", "refs/heads/main", "objects/ab/cdef", "objects/pack/p.pack"] {
            assert_eq!(
                std::fs::read(dest.path().join(rel)).unwrap(),
                std::fs::read(src.path().join(rel)).unwrap(),
                "{rel}"
            );
        }
    }

    #[tokio::test]
    async fn test_copy_down_of_missing_tree_is_empty() {
        let (_, mirror) = mirror();
        let dest = TempDir::new().unwrap();
        assert_eq!(mirror.copy_tree_down(".git", dest.path()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_copy_recreates_empty_dirs() {
        let (_, mirror) = mirror();
        let src = TempDir::new().unwrap();
        write(src.path(), "HEAD", b"ref: refs/heads/main\n");
        write(src.path(), "objects/ab/cdef", b"loose");
        mirror.copy_tree_up(src.path(), ".git").await.unwrap();

        let dest = TempDir::new().unwrap();
        let git_dir = dest.path().join(".git");
        assert_eq!(mirror.copy_history_down(".git", &git_dir).await.unwrap(), 2);
        for dir in HISTORY_SKELETON {
            assert!(git_dir.join(dir).is_dir(), "{dir}");
        }
        assert!(git_dir.join("objects/ab/cdef").is_file());
    }

    #[test]
    fn test_refs_upload_last() {
        let mut names = vec!["HEAD", "config", "refs/heads/main", "objects/aa/bb"];
        names.sort_by_key(|n| upload_rank(n));
        assert_eq!(names, vec!["objects/aa/bb", "config", "HEAD", "refs/heads/main"]);
    }
}
