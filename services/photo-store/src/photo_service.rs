//! Photo lifecycle: creation, frame filling, sharing and deletion.
//!
//! ```text
//! Created(frame) --[upload_frame_photo]--> Filled(shared = S)
//! shared = false --[update_share_status(true)]--> shared = true
//! shared = true  --[update_share_status(false)]--> shared = false
//! Filled --[delete_photo]--> Deleted
//! ```
//!
//! `frame_active` is only ever true on a fresh placeholder and is cleared once.
//! Steps are not compensated: a record persisted before a failing notifier call
//! stays persisted.

use crate::config::UploadConfig;
use crate::error::{PhotoError, PhotoResult};
use crate::metadata_store::PhotoRepository;
use crate::photo::{download_content_type, NewPhoto, Photo, PhotoUploadRequest, StoredObject, UploadedFile};
use crate::s3_store::ObjectStore;
use crate::session_scheduler::SessionNotifier;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Bytes of a stored photo, ready to be served
#[derive(Debug, Clone)]
pub struct DownloadedPhoto {
    pub key: String,
    pub content_type: &'static str,
    pub data: Bytes,
}

pub struct PhotoService {
    repository: Arc<dyn PhotoRepository>,
    storage: Arc<dyn ObjectStore>,
    notifier: Arc<dyn SessionNotifier>,
    max_file_bytes: usize,
}

impl PhotoService {
    pub fn new(
        repository: Arc<dyn PhotoRepository>,
        storage: Arc<dyn ObjectStore>,
        notifier: Arc<dyn SessionNotifier>,
        upload: &UploadConfig,
    ) -> Self {
        Self {
            repository,
            storage,
            notifier,
            max_file_bytes: upload.max_file_bytes,
        }
    }

    /// Create a photo, either as a frame placeholder or backed by the uploaded image.
    ///
    /// Validation and storage failures come back as `PhotoUploadFailed`. A
    /// failing share notification is returned as `SessionSchedulingFailed` and
    /// leaves the new record in place.
    #[instrument(skip(self, file, request), fields(user_id = request.user_id, frame = request.frame_active))]
    pub async fn upload_photo(&self, file: &UploadedFile, request: &PhotoUploadRequest) -> PhotoResult<Photo> {
        self.validate_file(file).map_err(PhotoError::upload_failed)?;

        let user = self
            .repository
            .find_user(request.user_id)
            .await?
            .ok_or(PhotoError::UserNotFound(request.user_id))?;

        if request.frame_active {
            let placeholder = NewPhoto::frame_placeholder(user.user_id, request, now_millis());
            let photo = self
                .repository
                .insert_photo(&placeholder)
                .await
                .map_err(PhotoError::upload_failed)?;

            info!(photo_id = photo.photo_id, "Frame placeholder created");
            metrics::counter!("photo_store.photos.uploaded", "kind" => "frame").increment(1);
            return Ok(photo);
        }

        let stored = self.store(file).await.map_err(PhotoError::upload_failed)?;
        let photo = self
            .repository
            .insert_photo(&NewPhoto::uploaded(user.user_id, &stored, request, now_millis()))
            .await
            .map_err(PhotoError::upload_failed)?;

        info!(photo_id = photo.photo_id, s3_key = %stored.key, "Photo uploaded");
        metrics::counter!("photo_store.photos.uploaded", "kind" => "photo").increment(1);

        if photo.shared_active {
            self.notify_shared(&photo).await?;
        }

        Ok(photo)
    }

    /// Upload the real image for a frame placeholder.
    ///
    /// Unlike `upload_photo`, a failing share notification is logged and the
    /// filled photo is still returned.
    #[instrument(skip(self, file, request))]
    pub async fn upload_frame_photo(
        &self,
        photo_id: i64,
        file: &UploadedFile,
        request: &PhotoUploadRequest,
    ) -> PhotoResult<Photo> {
        let mut photo = self.get_photo(photo_id).await?;

        if !photo.frame_active {
            return Err(PhotoError::InvalidOperation(format!(
                "photo {photo_id} is not a frame placeholder"
            )));
        }

        self.validate_file(file)?;

        let stored = self.store(file).await.map_err(PhotoError::upload_failed)?;
        photo.fill_frame(&stored, request);
        let photo = self
            .repository
            .update_photo(&photo)
            .await
            .map_err(PhotoError::upload_failed)?;

        info!(photo_id, s3_key = %stored.key, "Frame photo filled");
        metrics::counter!("photo_store.photos.frames_filled").increment(1);

        if photo.shared_active {
            if let Err(e) = self.notify_shared(&photo).await {
                warn!(photo_id, error = %e, "Session scheduler unavailable, frame photo kept");
            }
        }

        Ok(photo)
    }

    /// Set the shared flag. Every request with `shared = true` is announced,
    /// including one for a photo that is already shared.
    #[instrument(skip(self))]
    pub async fn update_share_status(&self, photo_id: i64, shared: bool) -> PhotoResult<Photo> {
        let mut photo = self.get_photo(photo_id).await?;

        if photo.frame_active {
            return Err(PhotoError::InvalidOperation(format!(
                "cannot change sharing of frame placeholder {photo_id}"
            )));
        }

        photo.shared_active = shared;
        let photo = self.repository.update_photo(&photo).await?;

        info!(photo_id, shared, "Share status updated");

        if shared {
            self.notify_shared(&photo).await?;
        }

        Ok(photo)
    }

    /// Delete a photo owned by `user_id`. The stored object goes first; if that
    /// fails the record is left untouched. Failures of either step are
    /// reported as `FileDeleteFailed`.
    #[instrument(skip(self))]
    pub async fn delete_photo(&self, photo_id: i64, user_id: i64) -> PhotoResult<()> {
        let photo = self.get_photo(photo_id).await?;

        if photo.user_id != user_id {
            return Err(PhotoError::Unauthorized { photo_id, user_id });
        }

        // Placeholders never reached the object store
        if !photo.frame_active {
            if let Some(key) = photo.s3_file_name.as_deref() {
                self.storage.delete(key).await.map_err(|e| {
                    error!(photo_id, error = %e, "Failed to delete stored photo");
                    PhotoError::FileDeleteFailed(Box::new(e))
                })?;
            }
        }

        self.repository.delete_photo(photo_id).await.map_err(|e| {
            error!(photo_id, error = %e, "Failed to delete photo metadata");
            PhotoError::FileDeleteFailed(Box::new(e))
        })?;

        info!(photo_id, user_id, "Photo deleted");
        metrics::counter!("photo_store.photos.deleted").increment(1);
        Ok(())
    }

    pub async fn get_photo(&self, photo_id: i64) -> PhotoResult<Photo> {
        self.repository
            .find_photo(photo_id)
            .await?
            .ok_or(PhotoError::PhotoNotFound(photo_id))
    }

    /// All photos of an existing user, newest first
    pub async fn list_user_photos(&self, user_id: i64) -> PhotoResult<Vec<Photo>> {
        self.repository
            .find_user(user_id)
            .await?
            .ok_or(PhotoError::UserNotFound(user_id))?;

        self.repository.list_photos_by_user(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn download_photo(&self, photo_id: i64) -> PhotoResult<DownloadedPhoto> {
        let key = self.stored_key(photo_id).await?;
        let data = self.storage.get(&key).await?;

        Ok(DownloadedPhoto {
            content_type: download_content_type(&key),
            key,
            data,
        })
    }

    pub async fn presigned_url(&self, photo_id: i64, expires_in: Duration) -> PhotoResult<String> {
        let key = self.stored_key(photo_id).await?;
        self.storage.presigned_url(&key, expires_in).await
    }

    /// Readiness of the relational store
    pub async fn ping(&self) -> PhotoResult<()> {
        self.repository.ping().await
    }

    /// Storage key of a photo that has real content
    async fn stored_key(&self, photo_id: i64) -> PhotoResult<String> {
        let photo = self.get_photo(photo_id).await?;

        if photo.frame_active {
            return Err(PhotoError::InvalidOperation(format!(
                "frame placeholder {photo_id} has no image yet"
            )));
        }

        photo
            .s3_file_name
            .ok_or_else(|| PhotoError::InvalidOperation(format!("photo {photo_id} has no stored object")))
    }

    async fn store(&self, file: &UploadedFile) -> PhotoResult<StoredObject> {
        let key = self.storage.put(file).await?;
        let url = self.storage.url_for(&key);
        Ok(StoredObject { key, url })
    }

    async fn notify_shared(&self, photo: &Photo) -> PhotoResult<()> {
        match self
            .notifier
            .notify_shared(photo.photo_id, photo.user_id, photo.lng, photo.lat)
            .await
        {
            Ok(()) => {
                metrics::counter!("photo_store.share.notified").increment(1);
                Ok(())
            }
            Err(e) => {
                error!(photo_id = photo.photo_id, error = %e, "Session scheduler call failed");
                metrics::counter!("photo_store.share.failed").increment(1);
                Err(e)
            }
        }
    }

    fn validate_file(&self, file: &UploadedFile) -> PhotoResult<()> {
        if file.is_empty() {
            return Err(PhotoError::InvalidFile("file is empty".to_string()));
        }

        let is_image = file
            .content_type
            .as_deref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            return Err(PhotoError::InvalidFile("only image files can be uploaded".to_string()));
        }

        if file.len() > self.max_file_bytes {
            return Err(PhotoError::InvalidFile(format!(
                "file is {} bytes, limit is {} bytes",
                file.len(),
                self.max_file_bytes
            )));
        }

        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
