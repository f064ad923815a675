//! REST client for the entity and annotation backends.
//!
//! [`MapApi`] wraps [`reqwest`] and implements the two backend seams used
//! by the rest of the crate: [`SnapshotSource`] for polling collections and
//! [`AnnotationBackend`] for submitting point annotations.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tacmap_core::entity::{validate_snapshot, EntityKind, PointOfInterest};
use uuid::Uuid;

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Fetches a raw collection payload from an endpoint.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Return the response body of a successful `GET url`.
    async fn fetch(&self, url: &str) -> Result<String, SyncError>;
}

/// Accepts point annotations and returns the created record.
#[async_trait]
pub trait AnnotationBackend: Send + Sync {
    async fn create_place(&self, request: &CreatePlaceRequest)
        -> Result<PointOfInterest, SyncError>;
}

/// Body of `POST /crucialplaces`.
///
/// `object_id` carries the annotation's provisional identifier so repeated
/// submissions of the same annotation share one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaceRequest {
    pub object_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Base URLs of the two backend hosts.
///
/// Targets and points of interest live on the targets host; airborne
/// platform positions on the flights host.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEndpoints {
    pub targets_base: String,
    pub flights_base: String,
}

impl ApiEndpoints {
    pub fn new(targets_base: impl Into<String>, flights_base: impl Into<String>) -> Self {
        Self {
            targets_base: targets_base.into().trim_end_matches('/').to_string(),
            flights_base: flights_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Full URL of a collection endpoint.
    pub fn snapshot_url(&self, kind: EntityKind) -> String {
        let base = match kind {
            EntityKind::Target | EntityKind::PointOfInterest => &self.targets_base,
            EntityKind::AirbornePlatform => &self.flights_base,
        };
        format!("{base}{}", kind.endpoint_path())
    }

    /// Where point annotations are created.
    pub fn places_url(&self) -> String {
        self.snapshot_url(EntityKind::PointOfInterest)
    }
}

// ---------------------------------------------------------------------------
// MapApi
// ---------------------------------------------------------------------------

/// HTTP client for the overlay backends.
pub struct MapApi {
    client: reqwest::Client,
    endpoints: ApiEndpoints,
}

impl MapApi {
    /// Create a client whose requests time out after `request_timeout`.
    pub fn new(endpoints: ApiEndpoints, request_timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    // ---- private helpers ----

    /// Return the body text of a successful response, or
    /// [`SyncError::HttpStatus`] with the status and body on failure.
    async fn success_body(response: reqwest::Response) -> Result<String, SyncError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SnapshotSource for MapApi {
    async fn fetch(&self, url: &str) -> Result<String, SyncError> {
        let response = self.client.get(url).send().await?;
        Self::success_body(response).await
    }
}

#[async_trait]
impl AnnotationBackend for MapApi {
    async fn create_place(
        &self,
        request: &CreatePlaceRequest,
    ) -> Result<PointOfInterest, SyncError> {
        let response = self
            .client
            .post(self.endpoints.places_url())
            .json(request)
            .send()
            .await?;

        let body = Self::success_body(response).await?;
        let place: PointOfInterest = serde_json::from_str(&body)?;
        validate_snapshot(std::slice::from_ref(&place))?;
        Ok(place)
    }
}
