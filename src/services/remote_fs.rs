//! Filesystem-like view over store keys under a vault prefix

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStat {
    pub kind: EntryKind,
    pub size: u64,
    /// Unix seconds; unknown for directories
    pub modified: Option<i64>,
}

/// Paths are `/`-separated and relative to the prefix. Directories are
/// implicit in the key space; `mkdir` only leaves an empty `dir/` marker.
#[derive(Clone)]
pub struct RemoteFs {
    store: ObjectStore,
    prefix: String,
}

impl RemoteFs {
    pub fn new(store: ObjectStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Store key for a relative path
    pub fn key(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{}", self.prefix, path),
        }
    }

    /// Key prefix that lists a directory's contents
    fn dir_key(&self, path: &str) -> String {
        let key = self.key(path);
        if key.is_empty() {
            key
        } else {
            format!("{}/", key)
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.store.get(&self.key(path)).await
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String> {
        let data = self.read_file(path).await?;
        String::from_utf8(data).map_err(|e| {
            SyncError::OperationFailed(format!("{} is not valid UTF-8: {}", path, e))
        })
    }

    pub async fn write_file(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.store.put(&self.key(path), data).await
    }

    /// Names of the direct children of a directory, files and subdirectories alike
    pub async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.dir_key(path);
        let listing = self.store.list(&dir, Some("/")).await?;

        let mut names: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.strip_prefix(&dir))
            .map(|p| p.trim_end_matches('/').to_string())
            .chain(
                listing
                    .objects
                    .iter()
                    .filter_map(|o| o.key.strip_prefix(&dir))
                    .map(str::to_string),
            )
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Every file below a directory at any depth, as `(relative path, size)`
    pub async fn walk(&self, path: &str) -> Result<Vec<(String, u64)>> {
        let dir = self.dir_key(path);
        let objects = self.store.list_all(&dir).await?;
        Ok(objects
            .into_iter()
            .filter_map(|o| {
                let rel = o.key.strip_prefix(&dir)?;
                if rel.is_empty() || rel.ends_with('/') {
                    return None;
                }
                Some((rel.to_string(), o.size))
            })
            .collect())
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.store.put(&self.dir_key(path), Vec::new()).await
    }

    pub async fn stat(&self, path: &str) -> Result<RemoteStat> {
        if let Some(meta) = self.store.head(&self.key(path)).await? {
            return Ok(RemoteStat {
                kind: EntryKind::File,
                size: meta.size,
                modified: meta.last_modified,
            });
        }

        let listing = self.store.list(&self.dir_key(path), Some("/")).await?;
        if listing.objects.is_empty() && listing.common_prefixes.is_empty() {
            return Err(SyncError::NotFound(self.key(path)));
        }

        Ok(RemoteStat {
            kind: EntryKind::Directory,
            size: 0,
            modified: None,
        })
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Server-side copy followed by a delete of the source
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.key(from);
        let meta = self
            .store
            .head(&source)
            .await?
            .ok_or_else(|| SyncError::NotFound(source.clone()))?;

        self.store
            .copy(&source, &self.key(to), Some(meta.size))
            .await?;
        self.store.delete(&source).await
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        let key = self.key(path);
        if !self.store.exists(&key).await? {
            return Err(SyncError::NotFound(key));
        }
        self.store.delete(&key).await
    }

    /// Remove a directory and everything below it, returning how many keys went
    pub async fn rmdir(&self, path: &str) -> Result<usize> {
        let keys: Vec<String> = self
            .store
            .list_all(&self.dir_key(path))
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();
        self.store.delete_many(&keys).await?;
        tracing::debug!("Removed {} key(s) under {}", keys.len(), self.key(path));
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;

    fn remote_fs(prefix: &str) -> (Arc<MemoryBackend>, RemoteFs) {
        let backend = Arc::new(MemoryBackend::with_page_size(2));
        let fs = RemoteFs::new(ObjectStore::new(backend.clone()), prefix);
        (backend, fs)
    }

    #[test]
    fn test_key_joins_prefix() {
        let (_, fs) = remote_fs("/team/vault/");
        assert_eq!(fs.key(".git/HEAD"), "team/vault/.git/HEAD");
        assert_eq!(fs.key("/notes/a.md"), "team/vault/notes/a.md");

        let (_, bare) = remote_fs("");
        assert_eq!(bare.key(".git/HEAD"), ".git/HEAD");
    }

    #[tokio::test]
    async fn test_write_read_and_stat() {
        let (_, fs) = remote_fs("v");
        fs.write_file("notes/a.md", b"hello".to_vec()).await.unwrap();

        assert_eq!(fs.read_to_string("notes/a.md").await.unwrap(), "hello");
        let stat = fs.stat("notes/a.md").await.unwrap();
        assert_eq!(stat.kind, EntryKind::File);
        assert_eq!(stat.size, 5);
        assert_eq!(fs.stat("notes").await.unwrap().kind, EntryKind::Directory);
        assert!(fs.stat("missing").await.unwrap_err().is_not_found());
        assert!(!fs.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_readdir_lists_direct_children() {
        let (_, fs) = remote_fs("v");
        for path in ["a.md", "b.md", "sub/c.md", "sub/deeper/d.md", "other/e.md"] {
            fs.write_file(path, Vec::new()).await.unwrap();
        }
        fs.mkdir("empty").await.unwrap();

        assert_eq!(
            fs.readdir("").await.unwrap(),
            vec!["a.md", "b.md", "empty", "other", "sub"]
        );
        assert_eq!(fs.readdir("sub").await.unwrap(), vec!["c.md", "deeper"]);
        assert!(fs.readdir("empty").await.unwrap().is_empty());

        let mut walked = fs.walk("sub").await.unwrap();
        walked.sort();
        assert_eq!(
            walked,
            vec![("c.md".to_string(), 0), ("deeper/d.md".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn test_rename_and_unlink() {
        let (backend, fs) = remote_fs("v");
        fs.write_file("old.md", b"x".to_vec()).await.unwrap();

        fs.rename("old.md", "new.md").await.unwrap();
        assert!(backend.object("v/old.md").is_none());
        assert_eq!(backend.object("v/new.md").unwrap(), b"x");

        fs.unlink("new.md").await.unwrap();
        assert!(fs.unlink("new.md").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rmdir_removes_everything_below() {
        let (backend, fs) = remote_fs("v");
        for i in 0..5 {
            fs.write_file(&format!("d/{i}.md"), Vec::new()).await.unwrap();
        }
        fs.write_file("d/nested/x", Vec::new()).await.unwrap();
        fs.write_file("keep.md", Vec::new()).await.unwrap();

        assert_eq!(fs.rmdir("d").await.unwrap(), 6);
        assert_eq!(backend.keys(), vec!["v/keep.md"]);
    }
}
