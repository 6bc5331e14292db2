//! Object store client
//!
//! [`ObjectStore`] is the typed surface the rest of the crate uses: whole and
//! streaming reads, chunked uploads with progress, batched deletes, listings
//! that hide pagination, and server-side copies that switch to a multipart
//! copy for very large objects.
//!
//! The raw store primitives live behind [`StoreBackend`], implemented by
//! [`S3Backend`] for real buckets and [`MemoryBackend`] for tests.

pub mod memory;
pub mod s3;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SyncError};

pub use memory::MemoryBackend;
pub use s3::S3Backend;

/// Largest object S3 will copy in a single request
pub const MULTIPART_COPY_THRESHOLD: u64 = 5 * 1024 * 1024 * 1024;

/// Default size of each uploaded part
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Default byte range of each part in a multipart copy
pub const DEFAULT_COPY_PART_SIZE: u64 = 512 * 1024 * 1024;

/// Maximum number of keys per batched delete request
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Streaming body of an object
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Percentage progress callback (0-100)
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u8) + Send);

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// Last modification time, unix seconds
    pub last_modified: Option<i64>,
}

/// One page of a listing as returned by the backend
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// A complete listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub objects: Vec<ObjectMeta>,
    pub common_prefixes: Vec<String>,
}

/// A finished part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,
    pub etag: String,
}

/// Raw object store primitives
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Whole object body. Missing keys yield [`SyncError::NotFound`].
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn get_object_stream(&self, key: &str) -> Result<ByteReader>;

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Start a multipart upload, returning its upload id
    async fn create_multipart_upload(&self, key: &str) -> Result<String>;

    /// Upload one part, returning its ETag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String>;

    /// Copy the inclusive byte range `first..=last` of `source` as one part
    async fn upload_part_copy(
        &self,
        source: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        first: u64,
        last: u64,
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    async fn list_objects_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage>;

    /// `None` when the key does not exist
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Delete up to [`DELETE_BATCH_SIZE`] keys in one request
    async fn delete_objects(&self, keys: &[String]) -> Result<()>;

    /// Single-request server-side copy
    async fn copy_object(&self, source: &str, dest: &str) -> Result<()>;
}

/// Tunables for [`ObjectStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub part_size: usize,
    pub multipart_copy_threshold: u64,
    pub copy_part_size: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            multipart_copy_threshold: MULTIPART_COPY_THRESHOLD,
            copy_part_size: DEFAULT_COPY_PART_SIZE,
        }
    }
}

/// Typed client over a [`StoreBackend`]
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn StoreBackend>,
    options: StoreOptions,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_options(backend, StoreOptions::default())
    }

    pub fn with_options(backend: Arc<dyn StoreBackend>, options: StoreOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET {}", key);
        self.backend.get_object(key).await
    }

    pub async fn get_stream(&self, key: &str) -> Result<ByteReader> {
        tracing::debug!("GET (stream) {}", key);
        self.backend.get_object_stream(key).await
    }

    /// Single-shot upload of an in-memory buffer
    pub async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        tracing::debug!("PUT {} ({} bytes)", key, data.len());
        self.backend.put_object(key, data).await
    }

    /// Upload from a reader whose total size is known up front.
    ///
    /// Inputs smaller than one part go up in a single request; larger ones
    /// use a multipart upload that is aborted if any part fails.
    pub async fn put_reader<R>(
        &self,
        key: &str,
        reader: &mut R,
        size: u64,
        mut on_progress: Option<ProgressFn<'_>>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let part_size = self.options.part_size.max(1);

        if size < part_size as u64 {
            let mut data = Vec::with_capacity(size as usize);
            reader.read_to_end(&mut data).await?;
            self.put(key, data).await?;
            report(&mut on_progress, 100);
            return Ok(());
        }

        tracing::debug!("PUT {} as multipart ({} bytes)", key, size);
        let upload_id = self.backend.create_multipart_upload(key).await?;

        match self
            .upload_parts(key, &upload_id, reader, size, part_size, &mut on_progress)
            .await
        {
            Ok(parts) => {
                self.backend
                    .complete_multipart_upload(key, &upload_id, parts)
                    .await?;
                report(&mut on_progress, 100);
                Ok(())
            }
            Err(e) => {
                self.abort_quietly(key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_parts<R>(
        &self,
        key: &str,
        upload_id: &str,
        reader: &mut R,
        size: u64,
        part_size: usize,
        on_progress: &mut Option<ProgressFn<'_>>,
    ) -> Result<Vec<CompletedPart>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut parts = Vec::new();
        let mut acknowledged: u64 = 0;
        let mut last_percent = 0u8;

        loop {
            let mut chunk = Vec::with_capacity(part_size);
            (&mut *reader)
                .take(part_size as u64)
                .read_to_end(&mut chunk)
                .await?;

            if chunk.is_empty() && !parts.is_empty() {
                break;
            }

            let part_number = parts.len() as i32 + 1;
            let len = chunk.len() as u64;
            let etag = self
                .backend
                .upload_part(key, upload_id, part_number, chunk)
                .await?;
            parts.push(CompletedPart { part_number, etag });

            acknowledged += len;
            let percent = percent_of(acknowledged, size).max(last_percent);
            if percent != last_percent {
                last_percent = percent;
                report(on_progress, percent);
            }

            if len < part_size as u64 {
                break;
            }
        }

        Ok(parts)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.delete_many(&[key.to_string()]).await
    }

    /// Delete keys in batches of at most [`DELETE_BATCH_SIZE`]
    pub async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            tracing::debug!("DELETE {} key(s)", batch.len());
            self.backend.delete_objects(batch).await?;
        }
        Ok(())
    }

    /// List under `prefix`, following continuation tokens until exhausted
    pub async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<ListResult> {
        let mut result = ListResult::default();
        let mut token = None;

        loop {
            let page = self
                .backend
                .list_objects_page(prefix, delimiter, token.take())
                .await?;
            result.objects.extend(page.objects);
            result.common_prefixes.extend(page.common_prefixes);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(result)
    }

    /// Every object under `prefix`, at any depth
    pub async fn list_all(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Ok(self.list(prefix, None).await?.objects)
    }

    pub async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.backend.head_object(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }

    /// Server-side copy.
    ///
    /// Objects at or above the multipart threshold are copied in contiguous
    /// byte ranges; a failed part aborts the whole copy.
    pub async fn copy(&self, source: &str, dest: &str, size_hint: Option<u64>) -> Result<()> {
        let size = match size_hint {
            Some(size) => size,
            None => self
                .head(source)
                .await?
                .map(|meta| meta.size)
                .ok_or_else(|| SyncError::NotFound(source.to_string()))?,
        };

        if size < self.options.multipart_copy_threshold {
            tracing::debug!("COPY {} -> {}", source, dest);
            return self.backend.copy_object(source, dest).await;
        }

        tracing::debug!("COPY {} -> {} as multipart ({} bytes)", source, dest, size);
        let upload_id = self.backend.create_multipart_upload(dest).await?;

        match self.copy_parts(source, dest, &upload_id, size).await {
            Ok(parts) => {
                self.backend
                    .complete_multipart_upload(dest, &upload_id, parts)
                    .await
            }
            Err(e) => {
                self.abort_quietly(dest, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn copy_parts(
        &self,
        source: &str,
        dest: &str,
        upload_id: &str,
        size: u64,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        for (index, (first, last)) in copy_ranges(size, self.options.copy_part_size)
            .into_iter()
            .enumerate()
        {
            let part_number = index as i32 + 1;
            let etag = self
                .backend
                .upload_part_copy(source, dest, upload_id, part_number, first, last)
                .await?;
            parts.push(CompletedPart { part_number, etag });
        }
        Ok(parts)
    }

    async fn abort_quietly(&self, key: &str, upload_id: &str) {
        if let Err(e) = self.backend.abort_multipart_upload(key, upload_id).await {
            tracing::warn!("Failed to abort multipart upload for {}: {}", key, e);
        }
    }
}

/// Inclusive byte ranges covering `[0, size)` in steps of `part_size`
pub fn copy_ranges(size: u64, part_size: u64) -> Vec<(u64, u64)> {
    let part_size = part_size.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + part_size).min(size);
        ranges.push((start, end - 1));
        start = end;
    }
    ranges
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

fn report(on_progress: &mut Option<ProgressFn<'_>>, percent: u8) {
    if let Some(cb) = on_progress.as_mut() {
        cb(percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(backend: Arc<MemoryBackend>, options: StoreOptions) -> ObjectStore {
        ObjectStore::with_options(backend, options)
    }

    #[test]
    fn test_copy_ranges_cover_without_overlap() {
        let ranges = copy_ranges(10, 4);
        assert_eq!(ranges, vec![(0, 3), (4, 7), (8, 9)]);
        assert!(copy_ranges(0, 4).is_empty());
        assert_eq!(copy_ranges(8, 4), vec![(0, 3), (4, 7)]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.head("nope").await.unwrap().is_none());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_hides_pagination() {
        let paged = Arc::new(MemoryBackend::with_page_size(3));
        let single = Arc::new(MemoryBackend::with_page_size(10_000));
        for i in 0..17 {
            let key = format!("vault/notes/{:02}.md", i);
            paged.insert(&key, vec![i as u8]);
            single.insert(&key, vec![i as u8]);
        }
        for dir in ["a", "b", "c", "d"] {
            let key = format!("vault/{}/x", dir);
            paged.insert(&key, b"x".to_vec());
            single.insert(&key, b"x".to_vec());
        }

        let paged_store = ObjectStore::new(paged.clone());
        let single_store = ObjectStore::new(single);

        let flat = paged_store.list("vault/", None).await.unwrap();
        assert_eq!(flat.objects.len(), 21);
        assert_eq!(flat, single_store.list("vault/", None).await.unwrap());
        assert!(paged.count("list") > 1);

        let delimited = paged_store.list("vault/", Some("/")).await.unwrap();
        assert_eq!(
            delimited,
            single_store.list("vault/", Some("/")).await.unwrap()
        );
        assert_eq!(
            delimited.common_prefixes,
            vec!["vault/a/", "vault/b/", "vault/c/", "vault/d/", "vault/notes/"]
        );
    }

    #[tokio::test]
    async fn test_delete_many_batches() {
        let backend = Arc::new(MemoryBackend::new());
        let keys: Vec<String> = (0..2500).map(|i| format!("k/{i}")).collect();
        for key in &keys {
            backend.insert(key, Vec::new());
        }
        let store = ObjectStore::new(backend.clone());

        store.delete_many(&keys).await.unwrap();
        assert_eq!(backend.count("delete"), 3);
        assert!(backend.keys().is_empty());

        store.delete_many(&[]).await.unwrap();
        assert_eq!(backend.count("delete"), 3);
    }

    #[tokio::test]
    async fn test_put_reader_small_is_single_shot() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ObjectStore::new(backend.clone());
        let mut progress = Vec::new();
        let mut cb = |p: u8| progress.push(p);

        let data = b"tiny".to_vec();
        store
            .put_reader("k", &mut data.as_slice(), 4, Some(&mut cb))
            .await
            .unwrap();

        assert_eq!(backend.object("k").unwrap(), data);
        assert_eq!(backend.count("create_multipart"), 0);
        assert_eq!(progress, vec![100]);
    }

    #[tokio::test]
    async fn test_put_reader_multipart_progress_is_monotonic() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(
            backend.clone(),
            StoreOptions {
                part_size: 10,
                ..StoreOptions::default()
            },
        );
        let data: Vec<u8> = (0..35u8).collect();
        let mut progress = Vec::new();
        let mut cb = |p: u8| progress.push(p);

        store
            .put_reader("big", &mut data.as_slice(), 35, Some(&mut cb))
            .await
            .unwrap();

        assert_eq!(backend.object("big").unwrap(), data);
        assert_eq!(backend.count("upload_part"), 4);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_multipart_copy_is_byte_identical() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(
            backend.clone(),
            StoreOptions {
                part_size: DEFAULT_PART_SIZE,
                multipart_copy_threshold: 16,
                copy_part_size: 7,
            },
        );
        let data: Vec<u8> = (0..=255u8).cycle().take(100).collect();
        backend.insert("src", data.clone());

        store.copy("src", "dest", None).await.unwrap();

        assert_eq!(backend.object("dest").unwrap(), data);
        assert_eq!(backend.count("upload_part_copy"), 15);
        assert_eq!(backend.count("copy"), 0);
    }

    #[tokio::test]
    async fn test_small_copy_is_single_request() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("src", b"abc".to_vec());
        let store = ObjectStore::new(backend.clone());

        store.copy("src", "dest", Some(3)).await.unwrap();

        assert_eq!(backend.object("dest").unwrap(), b"abc");
        assert_eq!(backend.count("copy"), 1);
    }

    #[tokio::test]
    async fn test_failed_part_copy_aborts_whole_copy() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("src", vec![1u8; 40]);
        backend.fail_part_copy_at(3);
        let store = store_with(
            backend.clone(),
            StoreOptions {
                part_size: DEFAULT_PART_SIZE,
                multipart_copy_threshold: 16,
                copy_part_size: 10,
            },
        );

        let err = store.copy("src", "dest", Some(40)).await.unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
        assert!(backend.object("dest").is_none());
        assert_eq!(backend.count("abort"), 1);
        assert_eq!(backend.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let err = store.copy("missing", "dest", None).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
