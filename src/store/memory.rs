//! In-process [`StoreBackend`] used by tests and local demos.
//!
//! Behaves like S3 where the sync engine cares: listings are paginated and
//! grouped by delimiter, multipart uploads are assembled in part order, and
//! missing keys are reported as not found.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ByteReader, CompletedPart, ListPage, ObjectMeta, StoreBackend};
use crate::error::{Result, SyncError};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified: i64,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    calls: HashMap<&'static str, usize>,
    fail_part_copy_at: Option<i32>,
}

/// An object store held entirely in memory
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// A backend whose listings return at most `page_size` entries per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(state: &mut State, call: &'static str) {
        *state.calls.entry(call).or_insert(0) += 1;
    }

    /// Store an object directly, bypassing call accounting
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data,
                modified: now(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Keys under a prefix
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// How many times a backend call was made (`get`, `put`, `list`, `copy`, ...)
    pub fn count(&self, call: &str) -> usize {
        self.lock().calls.get(call).copied().unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        self.lock().calls.clear();
    }

    /// Multipart uploads started but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Make `upload_part_copy` fail for the given part number
    pub fn fail_part_copy_at(&self, part_number: i32) {
        self.lock().fail_part_copy_at = Some(part_number);
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn etag_for(data: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(data))
}

fn meta(key: &str, object: &StoredObject) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size: object.data.len() as u64,
        last_modified: Some(object.modified),
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let mut state = self.lock();
        Self::record(&mut state, "get");
        state
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| SyncError::NotFound(key.to_string()))
    }

    async fn get_object_stream(&self, key: &str) -> Result<ByteReader> {
        let data = self.get_object(key).await?;
        Ok(Box::pin(std::io::Cursor::new(data)))
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "put");
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                modified: now(),
            },
        );
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let mut state = self.lock();
        Self::record(&mut state, "create_multipart");
        let upload_id = uuid::Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String> {
        let mut state = self.lock();
        Self::record(&mut state, "upload_part");
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| SyncError::transfer(key, format!("no such upload {}", upload_id)))?;
        let etag = etag_for(&data);
        upload.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn upload_part_copy(
        &self,
        source: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        first: u64,
        last: u64,
    ) -> Result<String> {
        let mut state = self.lock();
        Self::record(&mut state, "upload_part_copy");

        if state.fail_part_copy_at == Some(part_number) {
            return Err(SyncError::transfer(
                key,
                format!("injected failure copying part {}", part_number),
            ));
        }

        let source_data = state
            .objects
            .get(source)
            .map(|o| o.data.clone())
            .ok_or_else(|| SyncError::NotFound(source.to_string()))?;
        if first > last || last >= source_data.len() as u64 {
            return Err(SyncError::transfer(
                key,
                format!("invalid copy range bytes={}-{}", first, last),
            ));
        }
        let slice = source_data[first as usize..=last as usize].to_vec();

        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| SyncError::transfer(key, format!("no such upload {}", upload_id)))?;
        let etag = etag_for(&slice);
        upload.parts.insert(part_number, (etag.clone(), slice));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "complete_multipart");
        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| SyncError::transfer(key, format!("no such upload {}", upload_id)))?;

        let mut data = Vec::new();
        let mut previous = 0;
        for part in &parts {
            if part.part_number <= previous {
                return Err(SyncError::transfer(key, "parts must be in ascending order"));
            }
            previous = part.part_number;
            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => data.extend_from_slice(bytes),
                _ => {
                    return Err(SyncError::transfer(
                        key,
                        format!("part {} missing or ETag mismatch", part.part_number),
                    ))
                }
            }
        }

        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                modified: now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "abort");
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn list_objects_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let mut state = self.lock();
        Self::record(&mut state, "list");

        let lower = match continuation {
            Some(ref token) => Bound::Excluded(token.clone()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page = ListPage::default();
        let mut seen_prefixes = BTreeSet::new();
        let mut entries = 0;
        let mut last_key: Option<String> = None;
        let mut truncated = false;

        for (key, object) in state.objects.range((lower, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                if key.as_str() > prefix {
                    break;
                }
                continue;
            }
            let rest = &key[prefix.len()..];

            let common = delimiter
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|idx| format!("{}{}", prefix, &rest[..idx + d.len()])));

            if let Some(common) = common {
                if seen_prefixes.contains(&common) {
                    last_key = Some(key.clone());
                    continue;
                }
                if entries == self.page_size {
                    truncated = true;
                    break;
                }
                seen_prefixes.insert(common.clone());
                page.common_prefixes.push(common);
            } else {
                if entries == self.page_size {
                    truncated = true;
                    break;
                }
                page.objects.push(meta(key, object));
            }
            entries += 1;
            last_key = Some(key.clone());
        }

        if truncated {
            page.next_token = last_key;
        }
        Ok(page)
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let mut state = self.lock();
        Self::record(&mut state, "head");
        Ok(state.objects.get(key).map(|o| meta(key, o)))
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "delete");
        for key in keys {
            state.objects.remove(key);
        }
        Ok(())
    }

    async fn copy_object(&self, source: &str, dest: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "copy");
        let data = state
            .objects
            .get(source)
            .map(|o| o.data.clone())
            .ok_or_else(|| SyncError::NotFound(source.to_string()))?;
        state.objects.insert(
            dest.to_string(),
            StoredObject {
                data,
                modified: now(),
            },
        );
        Ok(())
    }
}
