use crate::config::DatabaseConfig;
use crate::error::{PhotoError, PhotoResult};
use crate::photo::{NewPhoto, Photo, User};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

const PHOTO_COLUMNS: &str = r#"
    photo_id, user_id, photo_path, s3_file_name, tag,
    lat, lng, location, likes, views,
    upload_datetime, register_datetime, frame_active, shared_active
"#;

/// Relational persistence for photos and the users that own them.
///
/// Each call is an independent statement; there is no row locking, so two
/// concurrent updates of the same photo are last-writer-wins.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    async fn find_user(&self, user_id: i64) -> PhotoResult<Option<User>>;

    async fn insert_photo(&self, photo: &NewPhoto) -> PhotoResult<Photo>;

    async fn find_photo(&self, photo_id: i64) -> PhotoResult<Option<Photo>>;

    /// Persist every mutable column of an existing photo
    async fn update_photo(&self, photo: &Photo) -> PhotoResult<Photo>;

    async fn delete_photo(&self, photo_id: i64) -> PhotoResult<()>;

    /// Photos owned by a user, newest first
    async fn list_photos_by_user(&self, user_id: i64) -> PhotoResult<Vec<Photo>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> PhotoResult<()>;
}

/// Photo metadata store in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for MetadataStore {
    async fn find_user(&self, user_id: i64) -> PhotoResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, password, name, email, profile_active,
                   profile_photo_path, intro, account_name
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query user")
        .map_err(PhotoError::database)
    }

    #[instrument(skip(self, photo), fields(user_id = photo.user_id))]
    async fn insert_photo(&self, photo: &NewPhoto) -> PhotoResult<Photo> {
        let sql = format!(
            r#"
            INSERT INTO photos (
                user_id, photo_path, s3_file_name, tag,
                lat, lng, location, likes, views,
                upload_datetime, register_datetime, frame_active, shared_active
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, 0, 0,
                $8, $8, $9, $10
            )
            RETURNING {PHOTO_COLUMNS}
            "#
        );

        let saved = sqlx::query_as::<_, Photo>(&sql)
            .bind(photo.user_id)
            .bind(&photo.photo_path)
            .bind(&photo.s3_file_name)
            .bind(&photo.tag)
            .bind(photo.lat)
            .bind(photo.lng)
            .bind(&photo.location)
            .bind(photo.upload_datetime)
            .bind(photo.frame_active)
            .bind(photo.shared_active)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert photo metadata")
            .map_err(PhotoError::database)?;

        debug!(photo_id = saved.photo_id, "Photo indexed");

        Ok(saved)
    }

    async fn find_photo(&self, photo_id: i64) -> PhotoResult<Option<Photo>> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE photo_id = $1");

        sqlx::query_as::<_, Photo>(&sql)
            .bind(photo_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query photo")
            .map_err(PhotoError::database)
    }

    #[instrument(skip(self, photo), fields(photo_id = photo.photo_id))]
    async fn update_photo(&self, photo: &Photo) -> PhotoResult<Photo> {
        let sql = format!(
            r#"
            UPDATE photos SET
                photo_path = $2, s3_file_name = $3, tag = $4,
                lat = $5, lng = $6, location = $7,
                likes = $8, views = $9,
                frame_active = $10, shared_active = $11
            WHERE photo_id = $1
            RETURNING {PHOTO_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Photo>(&sql)
            .bind(photo.photo_id)
            .bind(&photo.photo_path)
            .bind(&photo.s3_file_name)
            .bind(&photo.tag)
            .bind(photo.lat)
            .bind(photo.lng)
            .bind(&photo.location)
            .bind(photo.likes)
            .bind(photo.views)
            .bind(photo.frame_active)
            .bind(photo.shared_active)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to update photo metadata")
            .map_err(PhotoError::database)?
            .ok_or(PhotoError::PhotoNotFound(photo.photo_id))
    }

    #[instrument(skip(self))]
    async fn delete_photo(&self, photo_id: i64) -> PhotoResult<()> {
        let result = sqlx::query("DELETE FROM photos WHERE photo_id = $1")
            .bind(photo_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete photo metadata")
            .map_err(PhotoError::database)?;

        if result.rows_affected() == 0 {
            return Err(PhotoError::PhotoNotFound(photo_id));
        }

        debug!(photo_id, "Photo metadata deleted");
        Ok(())
    }

    async fn list_photos_by_user(&self, user_id: i64) -> PhotoResult<Vec<Photo>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE user_id = $1 \
             ORDER BY upload_datetime DESC, photo_id DESC"
        );

        sqlx::query_as::<_, Photo>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query photos by user")
            .map_err(PhotoError::database)
    }

    async fn ping(&self) -> PhotoResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")
            .map_err(PhotoError::database)?;
        Ok(())
    }
}
