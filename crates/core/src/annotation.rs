//! Operator annotations drawn on the map.
//!
//! An annotation is created locally with a client-generated provisional
//! identifier. Point annotations are submitted to the backend; when the
//! backend echoes a permanent identifier the annotation becomes
//! [`AnnotationStatus::Confirmed`]. Anything never confirmed stays
//! [`AnnotationStatus::LocalOnly`].

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::entity::PointOfInterest;
use crate::geometry::{Geometry, LatLng};
use crate::types::{DbId, Timestamp};

/// Comment attached to a drawn annotation when the operator supplied none.
pub const DEFAULT_ANNOTATION_COMMENT: &str = "operator annotation";

/// Synchronization state of an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    /// Accepted locally, not (or not yet) confirmed by the backend.
    LocalOnly,
    /// The backend assigned a permanent identifier.
    Confirmed,
}

/// A drawn annotation as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// Client-generated identity, stable for the annotation's lifetime.
    pub provisional_id: Uuid,
    /// Backend identifier, present once confirmed.
    pub server_id: Option<DbId>,
    pub geometry: Geometry,
    pub comment: String,
    pub status: AnnotationStatus,
    pub created_at: Timestamp,
    /// Text of the most recent submission failure, if any.
    pub last_error: Option<String>,
}

impl Annotation {
    /// Create a local-only annotation with a fresh provisional identifier.
    pub fn new_local(geometry: Geometry, comment: Option<String>) -> Self {
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_ANNOTATION_COMMENT.to_string());

        Self {
            provisional_id: Uuid::new_v4(),
            server_id: None,
            geometry,
            comment,
            status: AnnotationStatus::LocalOnly,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == AnnotationStatus::Confirmed
    }

    /// Only point annotations are synchronized with the backend.
    pub fn is_submittable(&self) -> bool {
        self.geometry.as_point().is_some()
    }

    /// Fold a backend-created point of interest into this annotation.
    ///
    /// Takes the server identifier and comment. The server position
    /// replaces the local one only while the point still sits where it was
    /// when `submitted`; a local edit made in the meantime is kept.
    pub fn confirm_with(&mut self, place: &PointOfInterest, submitted: LatLng) {
        self.server_id = Some(place.id);
        if let Some(comment) = place.comment.as_ref().filter(|c| !c.is_empty()) {
            self.comment = comment.clone();
        }
        if self.geometry.as_point() == Some(submitted) {
            self.geometry = Geometry::point(LatLng::new(place.x, place.y));
        }
        self.status = AnnotationStatus::Confirmed;
        self.last_error = None;
    }
}
