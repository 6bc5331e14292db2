//! S3-backed [`StoreBackend`]

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, Delete, ObjectIdentifier};

use super::{ByteReader, CompletedPart, ListPage, ObjectMeta, StoreBackend};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Object store backend talking to an S3-compatible service
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Backend {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from connection settings.
    ///
    /// Explicit keys win over the ambient AWS credential chain. A custom
    /// endpoint switches to path-style addressing, which most S3-compatible
    /// services need.
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        config.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint.clone() {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(id), Some(secret)) = (
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
        ) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                id,
                secret,
                None,
                None,
                "vault-sync",
            ));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.endpoint.is_some())
            .build();

        tracing::info!("Connected to bucket {}", config.bucket);
        Ok(Self::new(
            aws_sdk_s3::Client::from_conf(s3_config),
            config.bucket.clone(),
        ))
    }

    fn copy_source(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.bucket, encoded.join("/"))
    }
}

fn transfer_error<E>(key: &str, operation: &str, err: E) -> SyncError
where
    E: std::error::Error,
{
    SyncError::transfer(
        key,
        format!("{} failed: {}", operation, DisplayErrorContext(err)),
    )
}

fn to_unix(time: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<i64> {
    time.map(|t| t.secs())
}

#[async_trait]
impl StoreBackend for S3Backend {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let mut body = self.get_object_stream(key).await?;
        let mut data = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut body, &mut data)
            .await
            .map_err(|e| transfer_error(key, "reading body", e))?;
        Ok(data)
    }

    async fn get_object_stream(&self, key: &str) -> Result<ByteReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    SyncError::NotFound(key.to_string())
                } else {
                    transfer_error(key, "GetObject", e)
                }
            })?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| transfer_error(key, "PutObject", e))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transfer_error(key, "CreateMultipartUpload", e))?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| SyncError::transfer(key, "CreateMultipartUpload returned no upload id"))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| transfer_error(key, "UploadPart", e))?;
        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| SyncError::transfer(key, format!("part {} returned no ETag", part_number)))
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
        let output = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(self.copy_source(source))
            .copy_source_range(format!("bytes={}-{}", first, last))
            .send()
            .await
            .map_err(|e| transfer_error(key, "UploadPartCopy", e))?;
        output
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| {
                SyncError::transfer(key, format!("copied part {} returned no ETag", part_number))
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| transfer_error(key, "CompleteMultipartUpload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| transfer_error(key, "AbortMultipartUpload", e))?;
        Ok(())
    }

    async fn list_objects_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| transfer_error(prefix, "ListObjectsV2", e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|o| {
                Some(ObjectMeta {
                    key: o.key()?.to_string(),
                    size: o.size().unwrap_or_default().max(0) as u64,
                    last_modified: to_unix(o.last_modified()),
                })
            })
            .collect();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: output.content_length().unwrap_or_default().max(0) as u64,
                last_modified: to_unix(output.last_modified()),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(transfer_error(key, "HeadObject", e)),
        }
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let first = keys[0].as_str();
        let identifiers = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| transfer_error(first, "DeleteObjects", e))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| transfer_error(first, "DeleteObjects", e))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| transfer_error(first, "DeleteObjects", e))?;

        if let Some(err) = output.errors().first() {
            return Err(SyncError::transfer(
                err.key().unwrap_or(first),
                err.message().unwrap_or("delete rejected").to_string(),
            ));
        }
        Ok(())
    }

    async fn copy_object(&self, source: &str, dest: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dest)
            .copy_source(self.copy_source(source))
            .send()
            .await
            .map_err(|e| transfer_error(dest, "CopyObject", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> S3Backend {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        S3Backend::new(aws_sdk_s3::Client::from_conf(config), "my-vault")
    }

    #[test]
    fn test_copy_source_encodes_segments() {
        let backend = backend();
        assert_eq!(
            backend.copy_source("lfs/objects/ab/cd/abcd"),
            "my-vault/lfs/objects/ab/cd/abcd"
        );
        assert_eq!(
            backend.copy_source("notes/my file.md"),
            "my-vault/notes/my%20file.md"
        );
    }
}
