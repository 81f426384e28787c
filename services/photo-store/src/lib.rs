//! Picto Photo Store
//!
//! Photo storage backend for the Picto map-sharing app. Users upload photos,
//! optionally as placeholder "frames" whose image arrives later; the binaries
//! live in S3, metadata lives in PostgreSQL, and sharing a photo announces it
//! to the session scheduler.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)          Lifecycle            Collaborators
//! ┌────────────┐      ┌──────────────┐      ┌──────────────────┐
//! │ /photos    │─────▶│ PhotoService │─────▶│ S3ObjectStore    │──▶ S3 bucket
//! │ /photos/.. │      │              │      └──────────────────┘
//! └────────────┘      │              │      ┌──────────────────┐
//!                     │              │─────▶│ MetadataStore    │──▶ PostgreSQL
//!                     │              │      └──────────────────┘
//!                     │              │      ┌──────────────────┐
//!                     │              │─────▶│ HttpSession-     │──▶ session scheduler
//!                     └──────────────┘      │ Notifier         │
//!                                           └──────────────────┘
//! ```
//!
//! Every collaborator sits behind a trait (`ObjectStore`, `PhotoRepository`,
//! `SessionNotifier`) and is handed to [`PhotoService`] at construction.

pub mod api;
pub mod config;
pub mod error;
pub mod metadata_store;
pub mod photo;
pub mod photo_service;
pub mod s3_store;
pub mod session_scheduler;

pub use api::{create_router, serve_until, start_api_server, AppState};
pub use config::Config;
pub use error::{PhotoError, PhotoResult};
pub use metadata_store::{MetadataStore, PhotoRepository};
pub use photo::{Photo, PhotoResponse, PhotoUploadRequest, UploadedFile};
pub use photo_service::PhotoService;
pub use s3_store::{ObjectStore, S3ObjectStore};
pub use session_scheduler::{HttpSessionNotifier, SessionNotifier};
