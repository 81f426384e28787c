use crate::config::ApiConfig;
use crate::error::{ErrorResponse, PhotoError};
use crate::photo::{PhotoResponse, PhotoUploadRequest, UploadedFile};
use crate::photo_service::PhotoService;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PhotoService>,
    pub presigned_url_expiry: Duration,
}

/// Presigned URL response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ShareQuery {
    pub shared: bool,
}

/// Failures of a request, either malformed input or a lifecycle error
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Photo(#[from] PhotoError),
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("malformed multipart body: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                warn!(error = %message, "Rejected request");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: message,
                        code: "BAD_REQUEST".to_string(),
                    }),
                )
                    .into_response()
            }
            ApiError::Photo(e) => e.into_response(),
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/photos", post(upload_photo))
        .route("/photos/frame/:photo_id", post(upload_frame_photo))
        .route("/photos/download/:photo_id", get(download_photo))
        .route("/photos/user/:user_id", get(list_user_photos))
        .route("/photos/:photo_id", get(get_photo).delete(delete_photo))
        .route("/photos/:photo_id/share", patch(update_share_status))
        .route("/photos/:photo_id/url", get(get_presigned_url))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-store"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip(state, multipart))]
async fn upload_photo(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<PhotoResponse>> {
    let (file, request) = read_upload(multipart).await?;
    let photo = state.service.upload_photo(&file, &request).await?;
    Ok(Json(photo.into()))
}

#[instrument(skip(state, multipart))]
async fn upload_frame_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<Json<PhotoResponse>> {
    let (file, request) = read_upload(multipart).await?;
    let photo = state
        .service
        .upload_frame_photo(photo_id, &file, &request)
        .await?;
    Ok(Json(photo.into()))
}

#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    state.service.delete_photo(photo_id, query.user_id).await?;
    Ok(StatusCode::OK)
}

/// Raw photo bytes as an attachment named after the storage key
#[instrument(skip(state))]
async fn download_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let photo = state.service.download_photo(photo_id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, photo.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", photo.key),
            ),
        ],
        photo.data,
    ))
}

#[instrument(skip(state))]
async fn update_share_status(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<PhotoResponse>> {
    let photo = state
        .service
        .update_share_status(photo_id, query.shared)
        .await?;
    Ok(Json(photo.into()))
}

async fn get_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
) -> ApiResult<Json<PhotoResponse>> {
    let photo = state.service.get_photo(photo_id).await?;
    Ok(Json(photo.into()))
}

async fn list_user_photos(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<PhotoResponse>>> {
    let photos = state.service.list_user_photos(user_id).await?;
    Ok(Json(photos.iter().map(PhotoResponse::from).collect()))
}

/// Get presigned URL for a photo
#[instrument(skip(state))]
async fn get_presigned_url(
    State(state): State<AppState>,
    Path(photo_id): Path<i64>,
) -> ApiResult<Json<PresignedUrlResponse>> {
    let url = state
        .service
        .presigned_url(photo_id, state.presigned_url_expiry)
        .await?;
    let expires_at = Utc::now() + chrono::Duration::seconds(state.presigned_url_expiry.as_secs() as i64);

    Ok(Json(PresignedUrlResponse { url, expires_at }))
}

/// Collect the `file` and `request` parts of an upload
async fn read_upload(mut multipart: Multipart) -> ApiResult<(UploadedFile, PhotoUploadRequest)> {
    let mut file = None;
    let mut request = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                file = Some(UploadedFile::new(file_name, content_type, data));
            }
            Some("request") => {
                let body = field.bytes().await?;
                let parsed: PhotoUploadRequest = serde_json::from_slice(&body)
                    .map_err(|e| ApiError::BadRequest(format!("invalid request part: {e}")))?;
                request = Some(parsed);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadRequest("missing file part".to_string()))?;
    let request = request.ok_or_else(|| ApiError::BadRequest("missing request part".to_string()))?;
    Ok((file, request))
}

/// Start the photo API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting photo API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

/// Serve the API until `shutdown` resolves. A server that stops on its own,
/// including one that cannot bind, is an error.
pub async fn serve_until<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = start_api_server(state, config) => {
            result?;
            anyhow::bail!("API server exited unexpectedly");
        }
        _ = shutdown => {
            info!("Stopping photo API server");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::metadata_store::memory::InMemoryRepository;
    use crate::metadata_store::PhotoRepository;
    use crate::photo::{NewPhoto, StoredObject};
    use crate::s3_store::MockObjectStore;
    use crate::session_scheduler::MockSessionNotifier;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "photo-store-boundary";
    const MIB: usize = 1024 * 1024;

    fn api_config() -> ApiConfig {
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_enabled: false,
            cors_origins: Vec::new(),
            max_body_bytes: 32 * MIB,
        }
    }

    fn router(
        repo: Arc<InMemoryRepository>,
        storage: MockObjectStore,
        notifier: MockSessionNotifier,
    ) -> Router {
        let service = PhotoService::new(
            repo,
            Arc::new(storage),
            Arc::new(notifier),
            &UploadConfig { max_file_bytes: 10 * MIB },
        );
        let state = AppState {
            service: Arc::new(service),
            presigned_url_expiry: Duration::from_secs(3600),
        };
        create_router(state, &api_config())
    }

    fn multipart_body(file: Option<(&str, &str, &[u8])>, request: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((name, content_type, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(json) = request {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"request\"\r\nContent-Type: application/json\r\n\r\n{json}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seed_photo(repo: &InMemoryRepository, key: &str) -> i64 {
        let stored = StoredObject {
            key: key.to_string(),
            url: format!("https://bucket.s3.amazonaws.com/{key}"),
        };
        let request = PhotoUploadRequest {
            user_id: 1,
            ..Default::default()
        };
        repo.insert_photo(&NewPhoto::uploaded(1, &stored, &request, 1))
            .await
            .unwrap()
            .photo_id
    }

    async fn seed_frame(repo: &InMemoryRepository) -> i64 {
        let request = PhotoUploadRequest {
            user_id: 1,
            frame_active: true,
            ..Default::default()
        };
        repo.insert_photo(&NewPhoto::frame_placeholder(1, &request, 1))
            .await
            .unwrap()
            .photo_id
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = router(
            Arc::new(InMemoryRepository::default()),
            MockObjectStore::new(),
            MockSessionNotifier::new(),
        );

        let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(
            Arc::new(InMemoryRepository::default()),
            MockObjectStore::new(),
            MockSessionNotifier::new(),
        )
        .oneshot(empty_request("GET", "/ready"))
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_returns_summary() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let mut storage = MockObjectStore::new();
        storage
            .expect_put()
            .times(1)
            .returning(|file| Ok(format!("picto-photos/test_{}", file.file_name)));
        storage
            .expect_url_for()
            .returning(|key| format!("https://bucket.s3.amazonaws.com/{key}"));
        let app = router(repo, storage, MockSessionNotifier::new());

        let body = multipart_body(
            Some(("sunset.jpg", "image/jpeg", &[0xFF_u8; 2048][..])),
            Some(r#"{"userId":1,"lat":37.5,"lng":127.0,"location":"Seoul","tag":"sunset","frameActive":false,"sharedActive":false}"#),
        );
        let response = app.oneshot(upload_request("/photos", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["contentType"], "image/jpeg");
        assert_eq!(json["likes"], 0);
        assert_eq!(json["views"], 0);
        assert_eq!(json["sharedActive"], false);
        assert_eq!(json["location"], "Seoul");
        assert_eq!(
            json["photoPath"],
            "https://bucket.s3.amazonaws.com/picto-photos/test_sunset.jpg"
        );
    }

    #[tokio::test]
    async fn test_oversized_upload_is_bad_request() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let mut storage = MockObjectStore::new();
        storage.expect_put().never();
        let app = router(repo.clone(), storage, MockSessionNotifier::new());

        let data = vec![0xFF; 11 * MIB];
        let body = multipart_body(Some(("big.jpg", "image/jpeg", data.as_slice())), Some(r#"{"userId":1}"#));
        let response = app.oneshot(upload_request("/photos", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "PHOTO_UPLOAD_FAILED");
        assert_eq!(repo.photo_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_request_part() {
        let app = router(
            Arc::new(InMemoryRepository::with_users(&[1])),
            MockObjectStore::new(),
            MockSessionNotifier::new(),
        );

        let body = multipart_body(Some(("a.jpg", "image/jpeg", &b"jpeg"[..])), None);
        let response = app.oneshot(upload_request("/photos", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_upload_for_unknown_user_is_not_found() {
        let app = router(
            Arc::new(InMemoryRepository::with_users(&[1])),
            MockObjectStore::new(),
            MockSessionNotifier::new(),
        );

        let body = multipart_body(Some(("a.jpg", "image/jpeg", &b"jpeg"[..])), Some(r#"{"userId":7}"#));
        let response = app.oneshot(upload_request("/photos", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_fill_frame_over_http() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let frame_id = seed_frame(&repo).await;
        let mut storage = MockObjectStore::new();
        storage
            .expect_put()
            .times(1)
            .returning(|_| Ok("picto-photos/filled_a.png".to_string()));
        storage
            .expect_url_for()
            .returning(|key| format!("https://bucket.s3.amazonaws.com/{key}"));
        let app = router(repo, storage, MockSessionNotifier::new());

        let body = multipart_body(Some(("a.png", "image/png", &b"png"[..])), Some(r#"{"userId":1,"lat":1.5,"lng":2.5}"#));
        let response = app
            .oneshot(upload_request(&format!("/photos/frame/{frame_id}"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["frameActive"], false);
        assert_eq!(json["contentType"], "image/png");
        assert_eq!(json["lat"], 1.5);
    }

    #[tokio::test]
    async fn test_delete_by_other_user_is_forbidden() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1, 2]));
        let photo_id = seed_photo(&repo, "picto-photos/k_a.jpg").await;
        let app = router(repo.clone(), MockObjectStore::new(), MockSessionNotifier::new());

        let response = app
            .oneshot(empty_request("DELETE", &format!("/photos/{photo_id}?userId=2")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(repo.photo_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_owner() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let photo_id = seed_photo(&repo, "picto-photos/k_a.jpg").await;
        let mut storage = MockObjectStore::new();
        storage.expect_delete().times(1).returning(|_| Ok(()));
        let app = router(repo.clone(), storage, MockSessionNotifier::new());

        let response = app
            .oneshot(empty_request("DELETE", &format!("/photos/{photo_id}?userId=1")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(repo.photo_count(), 0);
    }

    #[tokio::test]
    async fn test_share_frame_is_bad_request() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let frame_id = seed_frame(&repo).await;
        let app = router(repo, MockObjectStore::new(), MockSessionNotifier::new());

        let response = app
            .oneshot(empty_request("PATCH", &format!("/photos/{frame_id}/share?shared=true")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_OPERATION");
    }

    #[tokio::test]
    async fn test_share_notifies_scheduler() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let photo_id = seed_photo(&repo, "picto-photos/k_a.jpg").await;
        let mut notifier = MockSessionNotifier::new();
        notifier
            .expect_notify_shared()
            .withf(move |id, user_id, _, _| *id == photo_id && *user_id == 1)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let app = router(repo, MockObjectStore::new(), notifier);

        let response = app
            .oneshot(empty_request("PATCH", &format!("/photos/{photo_id}/share?shared=true")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["sharedActive"], true);
    }

    #[tokio::test]
    async fn test_download_sets_headers() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let photo_id = seed_photo(&repo, "picto-photos/k_a.gif").await;
        let mut storage = MockObjectStore::new();
        storage
            .expect_get()
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"GIF89a")));
        let app = router(repo, storage, MockSessionNotifier::new());

        let response = app
            .oneshot(empty_request("GET", &format!("/photos/download/{photo_id}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"picto-photos/k_a.gif\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"GIF89a"));
    }

    #[tokio::test]
    async fn test_missing_photo_is_not_found() {
        let app = router(
            Arc::new(InMemoryRepository::with_users(&[1])),
            MockObjectStore::new(),
            MockSessionNotifier::new(),
        );

        let response = app.oneshot(empty_request("GET", "/photos/999")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "PHOTO_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_user_photos() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        seed_photo(&repo, "picto-photos/k_a.jpg").await;
        seed_frame(&repo).await;
        let app = router(repo, MockObjectStore::new(), MockSessionNotifier::new());

        let response = app.oneshot(empty_request("GET", "/photos/user/1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_presigned_url() {
        let repo = Arc::new(InMemoryRepository::with_users(&[1]));
        let photo_id = seed_photo(&repo, "picto-photos/k_a.jpg").await;
        let mut storage = MockObjectStore::new();
        storage
            .expect_presigned_url()
            .withf(|key, expires_in| key == "picto-photos/k_a.jpg" && *expires_in == Duration::from_secs(3600))
            .times(1)
            .returning(|key, _| Ok(format!("https://signed.example.com/{key}?sig=abc")));
        let app = router(repo, storage, MockSessionNotifier::new());

        let response = app
            .oneshot(empty_request("GET", &format!("/photos/{photo_id}/url")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["url"], "https://signed.example.com/picto-photos/k_a.jpg?sig=abc");
        assert!(json["expiresAt"].is_string());
    }

    fn app_state() -> AppState {
        let service = PhotoService::new(
            Arc::new(InMemoryRepository::default()),
            Arc::new(MockObjectStore::new()),
            Arc::new(MockSessionNotifier::new()),
            &UploadConfig::default(),
        );
        AppState {
            service: Arc::new(service),
            presigned_url_expiry: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_serve_fails_when_port_is_taken() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ApiConfig {
            port: taken.local_addr().unwrap().port(),
            ..api_config()
        };

        let result = serve_until(app_state(), &config, std::future::pending()).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let result = serve_until(app_state(), &api_config(), async {}).await;
        assert!(result.is_ok());
    }
}
