use crate::config::S3Config;
use crate::error::{PhotoError, PhotoResult};
use crate::photo::UploadedFile;
use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Opaque blob storage addressed by generated keys
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an uploaded file under a fresh key and return that key
    async fn put(&self, file: &UploadedFile) -> PhotoResult<String>;

    /// Read an object fully into memory
    async fn get(&self, key: &str) -> PhotoResult<Bytes>;

    async fn delete(&self, key: &str) -> PhotoResult<()>;

    /// Public access URL for a key
    fn url_for(&self, key: &str) -> String;

    /// Time-limited GET URL for a key
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> PhotoResult<String>;
}

/// S3-backed object store for photo content
pub struct S3ObjectStore {
    client: S3Client,
    config: S3Config,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, file: &UploadedFile, key: &str, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(file.data.clone()))
            .content_length(file.len() as i64)
            .content_type(content_type)
            .metadata("original-name", &file.file_name)
            .send()
            .await
            .context("Failed to upload photo to S3")?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(&self, file: &UploadedFile, key: &str, content_type: &str) -> anyhow::Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .metadata("original-name", &file.file_name)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        match self.upload_parts(file, key, upload_id).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .context("Failed to complete multipart upload")?;
                Ok(())
            }
            Err(e) => {
                // Leave no orphaned parts behind
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(s3_key = %key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(&self, file: &UploadedFile, key: &str, upload_id: &str) -> anyhow::Result<Vec<CompletedPart>> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in file.data.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.config.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {part_number}"))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, file), fields(file_name = %file.file_name, size_bytes = file.len()))]
    async fn put(&self, file: &UploadedFile) -> PhotoResult<String> {
        let key = object_key(&self.config.key_prefix, Uuid::new_v4(), &file.file_name);
        let content_type = file
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        debug!(s3_key = %key, "Uploading photo to S3");

        let result = if file.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(file, &key, content_type).await
        } else {
            self.simple_upload(file, &key, content_type).await
        };

        result.map_err(|e| PhotoError::StorageUploadFailed(format!("{:#}", e)))?;

        info!(s3_key = %key, size_bytes = file.len(), "Photo uploaded");
        metrics::counter!("photo_store.bytes.uploaded").increment(file.len() as u64);

        Ok(key)
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> PhotoResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) {
                    PhotoError::StorageDownloadFailed(format!("object not found: {key}"))
                } else {
                    PhotoError::StorageDownloadFailed(format!("{:#}", anyhow::Error::new(e)))
                }
            })?;

        // The body stream is consumed here and released when dropped, on
        // success and on read failure alike.
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| PhotoError::StorageDownloadFailed(format!("failed to read object body: {e}")))?
            .into_bytes();

        debug!(s3_key = %key, size_bytes = data.len(), "Photo downloaded");
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> PhotoResult<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete photo from S3")
            .map_err(|e| PhotoError::StorageDeleteFailed(format!("{:#}", e)))?;

        debug!(s3_key = %key, "Photo deleted from S3");
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        object_url(&self.config, key)
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> PhotoResult<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .context("Failed to create presigning config")
            .map_err(|e| PhotoError::StorageDownloadFailed(format!("{:#}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")
            .map_err(|e| PhotoError::StorageDownloadFailed(format!("{:#}", e)))?;

        Ok(presigned.uri().to_string())
    }
}

/// Generate a collision-resistant object key.
/// Format: {prefix}/{uuid}_{original_name}
pub fn object_key(prefix: &str, id: Uuid, original_name: &str) -> String {
    format!(
        "{}/{}_{}",
        prefix.trim_end_matches('/'),
        id,
        sanitize_file_name(original_name)
    )
}

/// Public URL of an object, virtual-hosted on AWS or path-style on a custom endpoint
pub fn object_url(config: &S3Config, key: &str) -> String {
    match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), config.bucket, key),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        ),
    }
}

/// Sanitize a file name to prevent path traversal in object keys
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}
