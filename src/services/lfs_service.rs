//! Large-object offloading
//!
//! `clean` streams a file to the store while hashing it, moves the upload to
//! its content-addressed key and swaps the local file for a pointer record.
//! `smudge` does the reverse. Both work on paths relative to the vault root.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

use super::remote_fs::RemoteFs;
use crate::error::{Result, SyncError};
use crate::models::pointer::MAX_POINTER_SIZE;
use crate::models::patterns::MATCH_OPTIONS;
use crate::models::{Pointer, TrackedPatterns};
use crate::store::ProgressFn;

/// Namespace of offloaded objects, relative to the vault prefix
pub const LFS_OBJECTS_DIR: &str = "lfs/objects";

/// Namespace of in-flight uploads, relative to the vault prefix
pub const LFS_TMP_DIR: &str = "lfs/tmp";

/// Called once per file with `(path, index, total)`
pub type FileProgressFn<'a> = &'a mut (dyn FnMut(&str, usize, usize) + Send);

/// Relative location of an object: `lfs/objects/<h[0..2]>/<h[2..4]>/<h>`
pub fn object_path(oid: &str) -> String {
    format!("{}/{}/{}/{}", LFS_OBJECTS_DIR, &oid[0..2], &oid[2..4], oid)
}

/// Reader adapter hashing everything that passes through it
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (String, u64) {
        (format!("{:x}", self.hasher.finalize()), self.bytes)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                this.hasher.update(read);
                this.bytes += read.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Offload engine for one vault
#[derive(Clone)]
pub struct LfsService {
    root: PathBuf,
    remote: RemoteFs,
}

impl LfsService {
    pub fn new(root: impl Into<PathBuf>, remote: RemoteFs) -> Self {
        Self {
            root: root.into(),
            remote,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Store key of an offloaded object
    pub fn object_key(&self, oid: &str) -> String {
        self.remote.key(&object_path(oid))
    }

    /// Offload a file and replace it with its pointer
    pub async fn clean(
        &self,
        rel_path: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<Pointer> {
        let path = self.local(rel_path);
        let file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();

        let store = self.remote.store();
        let tmp_key = self
            .remote
            .key(&format!("{}/{}", LFS_TMP_DIR, uuid::Uuid::new_v4()));

        let mut reader = HashingReader::new(file);
        if let Err(e) = store.put_reader(&tmp_key, &mut reader, size, on_progress).await {
            let _ = store.delete(&tmp_key).await;
            return Err(e);
        }
        let (oid, read) = reader.finish();

        if read != size {
            let _ = store.delete(&tmp_key).await;
            return Err(SyncError::transfer(
                rel_path,
                format!("file changed during upload ({} of {} bytes)", read, size),
            ));
        }

        let object_key = self.object_key(&oid);
        let stored = store.head(&object_key).await?;
        if stored.is_some_and(|meta| meta.size == size) {
            tracing::debug!("{} already stored as {}", rel_path, oid);
        } else if let Err(e) = store.copy(&tmp_key, &object_key, Some(size)).await {
            let _ = store.delete(&tmp_key).await;
            return Err(e);
        }
        store.delete(&tmp_key).await?;

        let pointer = Pointer::new(oid, size);
        tokio::fs::write(&path, pointer.format()).await?;
        tracing::info!("Offloaded {} ({} bytes)", rel_path, size);
        Ok(pointer)
    }

    /// Replace a pointer with the object it names.
    ///
    /// Returns `false` without touching the file when it is not a pointer.
    pub async fn smudge(&self, rel_path: &str) -> Result<bool> {
        let Some(pointer) = self.read_pointer(rel_path).await? else {
            return Ok(false);
        };

        let path = self.local(rel_path);
        let tmp_path = sibling_temp(&path);
        match self.download(&pointer, &tmp_path).await {
            Ok(()) => {
                tokio::fs::rename(&tmp_path, &path).await?;
                tracing::info!("Restored {} ({} bytes)", rel_path, pointer.size);
                Ok(true)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(e)
            }
        }
    }

    async fn download(&self, pointer: &Pointer, dest: &Path) -> Result<()> {
        let key = self.object_key(&pointer.oid);
        let body = self.remote.store().get_stream(&key).await?;
        let mut reader = HashingReader::new(body);
        let mut file = tokio::fs::File::create(dest).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        let (oid, size) = reader.finish();
        if oid != pointer.oid || size != pointer.size {
            return Err(SyncError::transfer(
                key,
                format!("content does not match pointer (got {} bytes, sha256 {})", size, oid),
            ));
        }
        Ok(())
    }

    /// Pointer held by a file, if it is one. Missing files are not pointers.
    pub async fn read_pointer(&self, rel_path: &str) -> Result<Option<Pointer>> {
        let file = match tokio::fs::File::open(self.local(rel_path)).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut head = Vec::with_capacity(MAX_POINTER_SIZE + 1);
        file.take(MAX_POINTER_SIZE as u64 + 1)
            .read_to_end(&mut head)
            .await?;
        Ok(Pointer::parse(&head))
    }

    pub async fn is_pointer(&self, rel_path: &str) -> Result<bool> {
        Ok(self.read_pointer(rel_path).await?.is_some())
    }

    /// Whether the local file holds exactly the content `pointer` names
    pub async fn matches_pointer(&self, rel_path: &str, pointer: &Pointer) -> Result<bool> {
        let file = match tokio::fs::File::open(self.local(rel_path)).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if file.metadata().await?.len() != pointer.size {
            return Ok(false);
        }

        let mut reader = HashingReader::new(file);
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
        let (oid, _) = reader.finish();
        Ok(oid == pointer.oid)
    }

    /// Write pointer text over a local file
    pub async fn write_pointer(&self, rel_path: &str, pointer: &Pointer) -> Result<()> {
        tokio::fs::write(self.local(rel_path), pointer.format()).await?;
        Ok(())
    }

    /// Files under the root matching any tracked pattern, `.git` excluded
    pub fn matching_files(&self, patterns: &TrackedPatterns) -> Result<Vec<String>> {
        let root = self.root.to_string_lossy().replace('\\', "/");
        let base = glob::Pattern::escape(root.trim_end_matches('/'));
        let mut found = Vec::new();

        for pattern in patterns.as_strs() {
            let full = format!("{}/{}", base, pattern.trim_start_matches('/'));
            let entries = glob::glob_with(&full, MATCH_OPTIONS)
                .map_err(|e| SyncError::OperationFailed(format!("bad pattern {}: {}", pattern, e)))?;

            for entry in entries {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable path: {}", e);
                        continue;
                    }
                };
                if !path.is_file() {
                    continue;
                }
                let Some(rel) = relative(&self.root, &path) else {
                    continue;
                };
                if rel == ".git" || rel.starts_with(".git/") {
                    continue;
                }
                found.push(rel);
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Offload every matching file that is not already a pointer
    pub async fn clean_files(
        &self,
        patterns: &TrackedPatterns,
        on_file: Option<FileProgressFn<'_>>,
    ) -> Result<Vec<String>> {
        let files = self.matching_files(patterns)?;
        self.clean_paths(&files, on_file).await
    }

    /// Offload an explicit list of paths, skipping pointers and missing files
    pub async fn clean_paths(
        &self,
        paths: &[String],
        mut on_file: Option<FileProgressFn<'_>>,
    ) -> Result<Vec<String>> {
        let mut cleaned = Vec::new();

        for (index, rel_path) in paths.iter().enumerate() {
            if let Some(cb) = on_file.as_mut() {
                cb(rel_path, index, paths.len());
            }
            if !self.local(rel_path).is_file() || self.is_pointer(rel_path).await? {
                continue;
            }
            self.clean(rel_path, None).await?;
            cleaned.push(rel_path.clone());
        }

        Ok(cleaned)
    }

    /// Restore every matching pointer file
    pub async fn smudge_files(
        &self,
        patterns: &TrackedPatterns,
        mut on_file: Option<FileProgressFn<'_>>,
    ) -> Result<Vec<String>> {
        let files = self.matching_files(patterns)?;
        let mut restored = Vec::new();

        for (index, rel_path) in files.iter().enumerate() {
            if let Some(cb) = on_file.as_mut() {
                cb(rel_path, index, files.len());
            }
            if self.smudge(rel_path).await? {
                restored.push(rel_path.clone());
            }
        }

        Ok(restored)
    }
}

fn sibling_temp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// `/`-separated path of `path` below `root`
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, ObjectStore, StoreOptions};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        backend: Arc<MemoryBackend>,
        lfs: LfsService,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_options(StoreOptions::default())
        }

        fn with_options(options: StoreOptions) -> Self {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(MemoryBackend::new());
            let store = ObjectStore::with_options(backend.clone(), options);
            let lfs = LfsService::new(dir.path(), RemoteFs::new(store, "vault"));
            Self {
                _dir: dir,
                backend,
                lfs,
            }
        }

        fn write(&self, rel: &str, data: &[u8]) {
            let path = self.lfs.root().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }

        fn read(&self, rel: &str) -> Vec<u8> {
            std::fs::read(self.lfs.root().join(rel)).unwrap()
        }
    }

    fn sha256_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    #[test]
    fn test_object_path_shards_by_hash() {
        let oid = "4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393";
        assert_eq!(object_path(oid), format!("lfs/objects/4d/7a/{}", oid));
    }

    #[tokio::test]
    async fn test_clean_then_smudge_round_trip() {
        let fx = Fixture::new();
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
        fx.write("img/a.png", &data);

        let pointer = fx.lfs.clean("img/a.png", None).await.unwrap();
        assert_eq!(pointer.size, data.len() as u64);
        assert_eq!(pointer.oid, sha256_hex(&data));
        assert_eq!(fx.read("img/a.png"), pointer.format().into_bytes());
        assert!(fx.lfs.is_pointer("img/a.png").await.unwrap());
        assert_eq!(
            fx.backend.object(&fx.lfs.object_key(&pointer.oid)).unwrap(),
            data
        );
        assert!(fx.backend.keys_with_prefix("vault/lfs/tmp/").is_empty());

        assert!(fx.lfs.smudge("img/a.png").await.unwrap());
        assert_eq!(fx.read("img/a.png"), data);
        assert!(!fx.lfs.is_pointer("img/a.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_same_content_shares_one_object() {
        let fx = Fixture::new();
        fx.write("a.png", b"same bytes");
        fx.write("copy/b.png", b"same bytes");

        let first = fx.lfs.clean("a.png", None).await.unwrap();
        let second = fx.lfs.clean("copy/b.png", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.backend.keys_with_prefix("vault/lfs/objects/").len(), 1);
        assert_eq!(fx.backend.count("copy"), 1);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_temp_object() {
        let fx = Fixture::with_options(StoreOptions {
            multipart_copy_threshold: 16,
            copy_part_size: 10,
            ..StoreOptions::default()
        });
        fx.backend.fail_part_copy_at(2);
        let data = vec![42u8; 40];
        fx.write("a.png", &data);

        let err = fx.lfs.clean("a.png", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
        assert!(fx.backend.keys_with_prefix("vault/lfs/tmp/").is_empty());
        assert!(fx.backend.keys_with_prefix("vault/lfs/objects/").is_empty());
        assert_eq!(fx.read("a.png"), data);
    }

    #[tokio::test]
    async fn test_smudge_ignores_regular_files() {
        let fx = Fixture::new();
        fx.write("notes.md", b"just text");
        assert!(!fx.lfs.smudge("notes.md").await.unwrap());
        assert_eq!(fx.read("notes.md"), b"just text");
        assert!(!fx.lfs.is_pointer("missing.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_smudge_missing_object_leaves_pointer() {
        let fx = Fixture::new();
        let pointer = Pointer::new(sha256_hex(b"gone"), 4);
        fx.write("a.png", pointer.format().as_bytes());

        let err = fx.lfs.smudge("a.png").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fx.read("a.png"), pointer.format().into_bytes());
        let leftovers: Vec<_> = std::fs::read_dir(fx.lfs.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_smudge_rejects_corrupt_object() {
        let fx = Fixture::new();
        let pointer = Pointer::new(sha256_hex(b"original"), 8);
        fx.backend
            .insert(&fx.lfs.object_key(&pointer.oid), b"tampered".to_vec());
        fx.write("a.png", pointer.format().as_bytes());

        let err = fx.lfs.smudge("a.png").await.unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
        assert_eq!(fx.read("a.png"), pointer.format().into_bytes());
    }

    #[tokio::test]
    async fn test_clean_reports_multipart_progress() {
        let fx = Fixture::with_options(StoreOptions {
            part_size: 1024,
            ..StoreOptions::default()
        });
        fx.write("big.bin", &vec![9u8; 4096]);
        let mut seen = Vec::new();
        let mut cb = |p: u8| seen.push(p);

        fx.lfs.clean("big.bin", Some(&mut cb)).await.unwrap();
        assert_eq!(fx.backend.count("upload_part"), 4);
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_clean_files_skips_pointers_and_git_dir() {
        let fx = Fixture::new();
        fx.write("a.png", b"A");
        fx.write("b.png", b"B");
        fx.write("notes.md", b"N");
        fx.write("sub/c.png", b"C");
        fx.write(".git/d.png", b"D");
        let patterns = TrackedPatterns::parse("*.png filter=lfs\n");

        let mut visited = Vec::new();
        let mut cb = |path: &str, _: usize, _: usize| visited.push(path.to_string());
        let cleaned = fx.lfs.clean_files(&patterns, Some(&mut cb)).await.unwrap();
        assert_eq!(cleaned, vec!["a.png", "b.png"]);
        assert_eq!(visited, vec!["a.png", "b.png"]);
        assert_eq!(fx.read("sub/c.png"), b"C");
        assert_eq!(fx.read(".git/d.png"), b"D");

        let again = fx.lfs.clean_files(&patterns, None).await.unwrap();
        assert!(again.is_empty());

        let restored = fx.lfs.smudge_files(&patterns, None).await.unwrap();
        assert_eq!(restored, vec!["a.png", "b.png"]);
        assert_eq!(fx.read("a.png"), b"A");
    }

    #[tokio::test]
    async fn test_matches_pointer() {
        let fx = Fixture::new();
        fx.write("a.png", b"content");
        let pointer = Pointer::new(sha256_hex(b"content"), 7);
        assert!(fx.lfs.matches_pointer("a.png", &pointer).await.unwrap());

        fx.write("a.png", b"changed");
        assert!(!fx.lfs.matches_pointer("a.png", &pointer).await.unwrap());
        assert!(!fx.lfs.matches_pointer("none.png", &pointer).await.unwrap());
    }
}
