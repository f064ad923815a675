//! Map-library interface types.
//!
//! The rendering library is external: it receives a base layer, a marker
//! list, and a draw-tool configuration, and emits draw events. This module
//! defines what is handed over.

use serde::Serialize;

use crate::entity::{AirbornePlatform, Entity, PointOfInterest, Target};
use crate::geometry::{GeometryKind, LatLng};
use crate::resolver::{Descriptor, Resolver};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_TILE_URL_TEMPLATE: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

pub const DEFAULT_TILE_ATTRIBUTION: &str =
    "&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors";

/// Initial map center (lat, lng).
pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 50.2156,
    lng: 22.531122,
};

pub const DEFAULT_ZOOM: u8 = 13;

// ---------------------------------------------------------------------------
// Base layer / view
// ---------------------------------------------------------------------------

/// Raster tile source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseLayer {
    pub tile_url_template: String,
    pub attribution: String,
}

impl Default for BaseLayer {
    fn default() -> Self {
        Self {
            tile_url_template: DEFAULT_TILE_URL_TEMPLATE.to_string(),
            attribution: DEFAULT_TILE_ATTRIBUTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapView {
    pub center: LatLng,
    pub zoom: u8,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }
}

// ---------------------------------------------------------------------------
// Draw tools
// ---------------------------------------------------------------------------

/// Which draw tools the library should offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrawToolConfig {
    pub marker: bool,
    pub polyline: bool,
    pub polygon: bool,
    pub rectangle: bool,
    pub circle: bool,
    pub circlemarker: bool,
}

impl Default for DrawToolConfig {
    fn default() -> Self {
        Self {
            marker: true,
            polyline: true,
            polygon: true,
            rectangle: true,
            circle: false,
            circlemarker: false,
        }
    }
}

impl DrawToolConfig {
    /// Whether shapes of `kind` may be drawn.
    pub fn allows(&self, kind: GeometryKind) -> bool {
        match kind {
            GeometryKind::Point => self.marker,
            GeometryKind::Line => self.polyline,
            GeometryKind::Polygon => self.polygon,
            GeometryKind::Rectangle => self.rectangle,
        }
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    LiveVideo,
}

/// A media item the preview overlay can show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaRef {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
        }
    }

    pub fn live_video(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::LiveVideo,
            url: url.into(),
        }
    }
}

/// Empty links are treated as absent.
fn non_empty(link: &Option<String>) -> Option<&str> {
    link.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupRow {
    pub label: &'static str,
    pub value: String,
}

/// Structured popup content for a marker.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Popup {
    pub rows: Vec<PopupRow>,
    /// Media the popup offers to preview.
    pub preview: Option<MediaRef>,
}

impl Popup {
    fn row(mut self, label: &'static str, value: impl ToString) -> Self {
        self.rows.push(PopupRow {
            label,
            value: value.to_string(),
        });
        self
    }

    fn opt_row<T: ToString>(self, label: &'static str, value: Option<T>) -> Self {
        let value = value.map(|v| v.to_string()).unwrap_or_default();
        self.row(label, value)
    }

    fn time_row(self, label: &'static str, value: Option<Timestamp>) -> Self {
        self.opt_row(label, value.map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC")))
    }

    /// Value of the first row with `label`.
    pub fn value(&self, label: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.label == label)
            .map(|r| r.value.as_str())
    }
}

/// One renderable marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// Stable key for the rendering library, unique across layers.
    pub key: String,
    pub position: LatLng,
    pub descriptor: Descriptor,
    pub popup: Popup,
}

impl Marker {
    pub fn for_target(target: &Target, resolver: &Resolver) -> Self {
        let popup = Popup::default()
            .row("ID", target.id)
            .row("X", target.x)
            .row("Y", target.y)
            .opt_row("Z", target.z)
            .time_row("Detected", target.detected_at)
            .opt_row("Comment", target.comment.as_deref())
            .opt_row("Category ID", target.category_id)
            .opt_row("Category", target.category_label.as_deref())
            .opt_row("Flight ID", target.platform_id);

        Self {
            key: format!("{}:{}", Target::KIND, target.id),
            position: target.position(),
            descriptor: resolver.resolve(target.category_label.as_deref()).clone(),
            popup: Popup {
                preview: non_empty(&target.image_link).map(MediaRef::image),
                ..popup
            },
        }
    }

    pub fn for_platform(platform: &AirbornePlatform, resolver: &Resolver) -> Self {
        let popup = Popup::default()
            .row("Flight", platform.flight_id)
            .opt_row("Operator", platform.operator_id)
            .opt_row("Team", platform.team_id)
            .opt_row("Platoon", platform.platoon_id)
            .row("X", platform.x)
            .row("Y", platform.y)
            .opt_row("Z", platform.z)
            .time_row("Started", platform.started_at)
            .opt_row("Comment", platform.comment.as_deref());

        Self {
            key: format!("{}:{}", AirbornePlatform::KIND, platform.flight_id),
            position: platform.position(),
            descriptor: resolver.platform_descriptor().clone(),
            popup: Popup {
                preview: non_empty(&platform.video_stream).map(MediaRef::live_video),
                ..popup
            },
        }
    }

    pub fn for_place(place: &PointOfInterest, resolver: &Resolver) -> Self {
        let popup = Popup::default()
            .row("ID", place.id)
            .row("X", place.x)
            .row("Y", place.y)
            .opt_row("Comment", place.comment.as_deref());

        Self {
            key: format!("{}:{}", PointOfInterest::KIND, place.id),
            position: place.position(),
            descriptor: resolver.place_descriptor().clone(),
            popup,
        }
    }
}
