//! Image storage operations behind the guard.
//!
//! Uploads and deletions go through rate limiting and retries. Search
//! results are cached briefly and dropped whenever the stored set changes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::guard::{Guard, GuardError, Guarded};
use crate::retry::Cancellation;
use crate::upstream::{DestroyOutcome, ImageStore, StoredImage, UpstreamError};

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Failure of a gallery operation.
#[derive(Debug, Error)]
pub enum GalleryError {
    /// The request itself was unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The image does not exist (or was already deleted)
    #[error("image not found: {0}")]
    NotFound(String),

    /// Rate limiting, upstream failure or caller abort
    #[error(transparent)]
    Guard(#[from] GuardError<UpstreamError>),
}

impl GalleryError {
    /// HTTP status a caller would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GalleryError::InvalidInput(_) => 400,
            GalleryError::NotFound(_) => 404,
            GalleryError::Guard(err) => err.status_code(),
        }
    }
}

/// Outcome of a bulk deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Ids that were deleted
    pub deleted: Vec<String>,
    /// Ids that could not be deleted, with the reason
    pub failed: Vec<(String, String)>,
}

/// Upload, list and delete images in an [`ImageStore`].
pub struct GalleryService<S> {
    store: Arc<S>,
    /// Guard whose cache holds search results keyed by `search:<query>`
    guard: Guard<Vec<StoredImage>>,
}

impl<S: ImageStore> GalleryService<S> {
    /// Create a gallery over `store`.
    pub fn new(store: Arc<S>, guard: Guard<Vec<StoredImage>>) -> Self {
        Self { store, guard }
    }

    /// Upload image bytes.
    pub async fn upload(
        &self,
        client_key: &str,
        payload: Vec<u8>,
        cancellation: &Cancellation,
    ) -> Result<StoredImage, GalleryError> {
        if payload.is_empty() {
            return Err(GalleryError::InvalidInput("no image provided".to_string()));
        }
        if payload.len() > MAX_UPLOAD_BYTES {
            return Err(GalleryError::InvalidInput(format!(
                "image is {} bytes, limit is {}",
                payload.len(),
                MAX_UPLOAD_BYTES
            )));
        }

        let image = self
            .guard
            .call_uncached(client_key, cancellation, || self.store.upload(payload.clone()))
            .await?;

        self.guard.cache().clear();
        info!(client = %client_key, id = %image.id, "Uploaded image");
        Ok(image)
    }

    /// Delete an image by id.
    pub async fn destroy(&self, client_key: &str, id: &str, cancellation: &Cancellation) -> Result<(), GalleryError> {
        if id.trim().is_empty() {
            return Err(GalleryError::InvalidInput("no image id provided".to_string()));
        }

        let outcome = self
            .guard
            .call_uncached(client_key, cancellation, || self.store.destroy(id))
            .await?;

        match outcome {
            DestroyOutcome::Ok => {
                self.guard.cache().clear();
                info!(client = %client_key, id = %id, "Deleted image");
                Ok(())
            }
            DestroyOutcome::NotFound => Err(GalleryError::NotFound(id.to_string())),
        }
    }

    /// Images matching `query`, served from cache while fresh.
    ///
    /// Uploads and deletions clear cached results, but a search still in
    /// flight at that moment stores what it read before the change.
    pub async fn search(
        &self,
        client_key: &str,
        query: &str,
        cancellation: &Cancellation,
    ) -> Result<Guarded<Vec<StoredImage>>, GalleryError> {
        let key = format!("search:{}", query);
        let images = self
            .guard
            .call(client_key, &key, cancellation, || self.store.search(query))
            .await?;
        Ok(images)
    }

    /// Delete every image matching `query`.
    ///
    /// One failed deletion does not stop the others; it is listed in the
    /// report instead.
    pub async fn cleanup(
        &self,
        client_key: &str,
        query: &str,
        cancellation: &Cancellation,
    ) -> Result<CleanupReport, GalleryError> {
        let images = self
            .guard
            .call_uncached(client_key, cancellation, || self.store.search(query))
            .await?;

        let mut report = CleanupReport::default();
        for image in images {
            let result = self
                .guard
                .retry(cancellation, || self.store.destroy(&image.id))
                .await;

            match result {
                Ok(DestroyOutcome::Ok) => report.deleted.push(image.id),
                Ok(DestroyOutcome::NotFound) => {
                    report.failed.push((image.id, "not found".to_string()));
                }
                Err(err @ (GuardError::Cancelled { .. } | GuardError::DeadlineExceeded { .. })) => {
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(id = %image.id, error = %err, "Failed to delete image during cleanup");
                    report.failed.push((image.id, err.to_string()));
                }
            }
        }

        if !report.deleted.is_empty() {
            self.guard.cache().clear();
        }
        info!(
            client = %client_key,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Cleanup finished"
        );
        Ok(report)
    }
}
