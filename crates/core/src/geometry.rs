//! Map coordinates and drawn geometry.
//!
//! Coordinates travel as `[lat, lng]` pairs, matching what the map library
//! emits for draw events and what it expects for marker positions.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// LatLng
// ---------------------------------------------------------------------------

/// A single map coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

impl From<[f64; 2]> for LatLng {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

impl From<LatLng> for [f64; 2] {
    fn from(c: LatLng) -> Self {
        [c.lat, c.lng]
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Shape kinds the draw toolbar can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    #[serde(alias = "marker")]
    Point,
    #[serde(alias = "polyline")]
    Line,
    Polygon,
    Rectangle,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::Polygon => "polygon",
            Self::Rectangle => "rectangle",
        }
    }

    /// Minimum number of coordinates a shape of this kind needs.
    fn min_coordinates(&self) -> usize {
        match self {
            Self::Point => 1,
            Self::Line | Self::Rectangle => 2,
            Self::Polygon => 3,
        }
    }
}

impl std::fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drawn shape: its kind and the coordinate sequence that defines it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub kind: GeometryKind,
    pub coordinates: Vec<LatLng>,
}

impl Geometry {
    pub fn point(at: LatLng) -> Self {
        Self {
            kind: GeometryKind::Point,
            coordinates: vec![at],
        }
    }

    /// The coordinate of a point geometry, `None` for other kinds.
    pub fn as_point(&self) -> Option<LatLng> {
        match self.kind {
            GeometryKind::Point => self.coordinates.first().copied(),
            _ => None,
        }
    }

    /// Check coordinate count and finiteness.
    ///
    /// A point carries exactly one coordinate; lines and rectangles at
    /// least two; polygons at least three.
    pub fn validate(&self) -> Result<(), CoreError> {
        let count = self.coordinates.len();
        let min = self.kind.min_coordinates();

        if self.kind == GeometryKind::Point && count != 1 {
            return Err(CoreError::Validation(format!(
                "point geometry needs exactly 1 coordinate, got {count}"
            )));
        }
        if count < min {
            return Err(CoreError::Validation(format!(
                "{} geometry needs at least {min} coordinates, got {count}",
                self.kind
            )));
        }
        if let Some(i) = self.coordinates.iter().position(|c| !c.is_finite()) {
            return Err(CoreError::Validation(format!(
                "coordinate {i} of {} geometry is not finite",
                self.kind
            )));
        }
        Ok(())
    }
}
