//! Draw events emitted by the map library.
//!
//! Events travel as JSON with a `type` tag, e.g.
//! `{"type": "created", "kind": "point", "coordinates": [[50.2, 22.5]]}`,
//! and are fed to the annotation pipeline through its channel.

use serde::Deserialize;
use tacmap_core::geometry::{Geometry, GeometryKind, LatLng};
use uuid::Uuid;

/// A user interaction with the draw toolbar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawEvent {
    /// A shape was completed.
    Created {
        kind: GeometryKind,
        coordinates: Vec<LatLng>,
        #[serde(default)]
        comment: Option<String>,
    },

    /// An existing annotation's shape was changed.
    Edited {
        id: Uuid,
        coordinates: Vec<LatLng>,
    },

    /// An existing annotation was removed.
    Deleted { id: Uuid },

    /// Operator asked to resubmit a local-only point annotation.
    Retry { id: Uuid },
}

impl DrawEvent {
    pub fn created(geometry: Geometry, comment: Option<String>) -> Self {
        Self::Created {
            kind: geometry.kind,
            coordinates: geometry.coordinates,
            comment,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Edited { .. } => "edited",
            Self::Deleted { .. } => "deleted",
            Self::Retry { .. } => "retry",
        }
    }
}

/// Parse one JSON draw event.
pub fn parse_event(text: &str) -> Result<DrawEvent, serde_json::Error> {
    serde_json::from_str(text)
}
