use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Path written into a frame placeholder until its real image arrives
pub const FRAME_PLACEHOLDER_PATH: &str = "temp_path";
/// Storage key written into a frame placeholder until its real image arrives
pub const FRAME_PLACEHOLDER_KEY: &str = "temp_file";
/// Location label written into a frame placeholder
pub const FRAME_PLACEHOLDER_LOCATION: &str = "temp_location";

/// Stored photo metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Photo {
    /// Unique photo ID
    pub photo_id: i64,
    /// Owning user, looked up through the user table when needed
    pub user_id: i64,
    /// Public access path for the stored object
    pub photo_path: Option<String>,
    /// Object storage key
    pub s3_file_name: Option<String>,
    pub tag: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub location: Option<String>,
    pub likes: i32,
    pub views: i32,
    /// Upload time in epoch millis, set once at creation
    pub upload_datetime: i64,
    /// Registration time in epoch millis, set once at creation
    pub register_datetime: i64,
    /// Placeholder awaiting its real image
    pub frame_active: bool,
    /// Visible to others and announced to the session scheduler
    pub shared_active: bool,
}

impl Photo {
    /// Overwrite a frame placeholder with its uploaded image. Clears
    /// `frame_active` for good.
    pub fn fill_frame(&mut self, stored: &StoredObject, request: &PhotoUploadRequest) {
        self.lat = request.lat;
        self.lng = request.lng;
        self.location = request.location.clone();
        self.tag = request.tag.clone();
        self.photo_path = Some(stored.url.clone());
        self.s3_file_name = Some(stored.key.clone());
        self.frame_active = false;
        self.shared_active = request.shared_active;
    }
}

/// Photo row about to be inserted; the store assigns the ID
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhoto {
    pub user_id: i64,
    pub photo_path: String,
    pub s3_file_name: String,
    pub tag: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub location: Option<String>,
    pub upload_datetime: i64,
    pub frame_active: bool,
    pub shared_active: bool,
}

impl NewPhoto {
    /// Placeholder for a frame whose image is uploaded later. Only the tag is
    /// taken from the request.
    pub fn frame_placeholder(user_id: i64, request: &PhotoUploadRequest, now_millis: i64) -> Self {
        Self {
            user_id,
            photo_path: FRAME_PLACEHOLDER_PATH.to_string(),
            s3_file_name: FRAME_PLACEHOLDER_KEY.to_string(),
            tag: request.tag.clone(),
            lat: 0.0,
            lng: 0.0,
            location: Some(FRAME_PLACEHOLDER_LOCATION.to_string()),
            upload_datetime: now_millis,
            frame_active: true,
            shared_active: false,
        }
    }

    /// Fully populated photo backed by an uploaded object
    pub fn uploaded(
        user_id: i64,
        stored: &StoredObject,
        request: &PhotoUploadRequest,
        now_millis: i64,
    ) -> Self {
        Self {
            user_id,
            photo_path: stored.url.clone(),
            s3_file_name: stored.key.clone(),
            tag: request.tag.clone(),
            lat: request.lat,
            lng: request.lng,
            location: request.location.clone(),
            upload_datetime: now_millis,
            frame_active: false,
            shared_active: request.shared_active,
        }
    }
}

/// Account data; read-only from the photo store's point of view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub email: String,
    pub profile_active: bool,
    pub profile_photo_path: Option<String>,
    pub intro: String,
    pub account_name: String,
}

/// Metadata part of an upload request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUploadRequest {
    pub user_id: i64,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub frame_active: bool,
    #[serde(default)]
    pub shared_active: bool,
}

/// Binary part of an upload request, fully buffered
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of putting an object into storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Photo summary returned by the API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub photo_id: i64,
    pub photo_path: Option<String>,
    pub content_type: String,
    pub lat: f64,
    pub lng: f64,
    pub location: Option<String>,
    pub tag: Option<String>,
    pub likes: i32,
    pub views: i32,
    pub upload_time: i64,
    pub frame_active: bool,
    pub shared_active: bool,
}

impl From<&Photo> for PhotoResponse {
    fn from(p: &Photo) -> Self {
        Self {
            photo_id: p.photo_id,
            photo_path: p.photo_path.clone(),
            content_type: summary_content_type(p.s3_file_name.as_deref().unwrap_or_default())
                .to_string(),
            lat: p.lat,
            lng: p.lng,
            location: p.location.clone(),
            tag: p.tag.clone(),
            likes: p.likes,
            views: p.views,
            upload_time: p.upload_datetime,
            frame_active: p.frame_active,
            shared_active: p.shared_active,
        }
    }
}

impl From<Photo> for PhotoResponse {
    fn from(p: Photo) -> Self {
        PhotoResponse::from(&p)
    }
}

/// Lowercased extension of a storage key, if any
fn key_extension(key: &str) -> Option<String> {
    key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Content type reported in photo summaries
pub fn summary_content_type(key: &str) -> &'static str {
    match key_extension(key).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Content type served with downloaded bytes; anything unrecognised is sent as JPEG
pub fn download_content_type(key: &str) -> &'static str {
    match key_extension(key).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}
