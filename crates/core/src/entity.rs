//! Entity records synchronized from the backend.
//!
//! Each collection (targets, airborne platforms, points of interest) is
//! fetched as a full JSON array. Field names follow the backend wire format.

use std::collections::HashSet;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geometry::LatLng;
use crate::types::{lenient_timestamp, DbId, Timestamp};

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// The independently-polled entity collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Target,
    AirbornePlatform,
    PointOfInterest,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        Self::Target,
        Self::AirbornePlatform,
        Self::PointOfInterest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::AirbornePlatform => "airborne_platform",
            Self::PointOfInterest => "point_of_interest",
        }
    }

    /// Path of the collection endpoint relative to its host.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Self::Target => "/targets",
            Self::AirbornePlatform => "/flights/positions",
            Self::PointOfInterest => "/crucialplaces",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Entity trait
// ---------------------------------------------------------------------------

/// A record type that forms one polled collection.
pub trait Entity: DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    /// Which collection this record belongs to.
    const KIND: EntityKind;

    /// Wire fields a record must carry with a non-null value.
    const REQUIRED_FIELDS: &'static [&'static str];

    /// Identity within a snapshot.
    type Key: Eq + Hash + std::fmt::Display;

    fn key(&self) -> Self::Key;

    /// Map position used for rendering.
    fn position(&self) -> LatLng;
}

/// Check the invariants of a freshly decoded snapshot.
///
/// Every position must be finite and keys must be unique. The first
/// violation rejects the whole snapshot.
pub fn validate_snapshot<E: Entity>(entities: &[E]) -> Result<(), CoreError> {
    let mut seen = HashSet::with_capacity(entities.len());
    for (i, entity) in entities.iter().enumerate() {
        if !entity.position().is_finite() {
            return Err(CoreError::Validation(format!(
                "{} {} at index {i} has a non-finite position",
                E::KIND,
                entity.key()
            )));
        }
        let key = entity.key();
        if !seen.insert(key) {
            return Err(CoreError::Validation(format!(
                "duplicate {} identifier {} at index {i}",
                E::KIND,
                entity.key()
            )));
        }
    }
    Ok(())
}

/// Decode a JSON array payload into records and validate it.
///
/// A payload that is not an array of objects, or whose values have the
/// wrong type, is [`DecodeFailure::Malformed`]. A record lacking one of
/// [`Entity::REQUIRED_FIELDS`] (such as its position) and any other
/// invariant violation is [`DecodeFailure::Invalid`].
pub fn decode_snapshot<E: Entity>(body: &str) -> Result<Vec<E>, DecodeFailure> {
    let raw: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(body).map_err(DecodeFailure::Malformed)?;
    for (i, record) in raw.iter().enumerate() {
        check_required::<E>(i, record).map_err(DecodeFailure::Invalid)?;
    }

    let entities = raw
        .into_iter()
        .map(|record| serde_json::from_value(serde_json::Value::Object(record)))
        .collect::<Result<Vec<E>, _>>()
        .map_err(DecodeFailure::Malformed)?;
    validate_snapshot(&entities).map_err(DecodeFailure::Invalid)?;
    Ok(entities)
}

fn check_required<E: Entity>(
    index: usize,
    record: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), CoreError> {
    let missing = E::REQUIRED_FIELDS
        .iter()
        .find(|field| record.get(**field).map_or(true, serde_json::Value::is_null));
    match missing {
        Some(field) => Err(CoreError::Validation(format!(
            "{} record at index {index} is missing required field {field}",
            E::KIND
        ))),
        None => Ok(()),
    }
}

/// Why a payload could not become a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    #[error("payload does not match expected shape: {0}")]
    Malformed(serde_json::Error),

    #[error(transparent)]
    Invalid(CoreError),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A detected target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "targetid")]
    pub id: DbId,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(rename = "detectiontime", default, deserialize_with = "lenient_timestamp")]
    pub detected_at: Option<Timestamp>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(rename = "targettypeid", default)]
    pub category_id: Option<DbId>,
    #[serde(rename = "targettypename", default)]
    pub category_label: Option<String>,
    #[serde(rename = "flightid", default)]
    pub platform_id: Option<DbId>,
    #[serde(rename = "imagelink", default)]
    pub image_link: Option<String>,
}

impl Entity for Target {
    const KIND: EntityKind = EntityKind::Target;
    const REQUIRED_FIELDS: &'static [&'static str] = &["targetid", "x", "y"];
    type Key = DbId;

    fn key(&self) -> DbId {
        self.id
    }

    fn position(&self) -> LatLng {
        LatLng::new(self.x, self.y)
    }
}

/// An airborne platform (drone flight) position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbornePlatform {
    #[serde(rename = "flightID")]
    pub flight_id: DbId,
    #[serde(rename = "operatorID", default)]
    pub operator_id: Option<DbId>,
    #[serde(rename = "teamID", default)]
    pub team_id: Option<DbId>,
    #[serde(rename = "platoonID", default)]
    pub platoon_id: Option<DbId>,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(rename = "beginTime", default, deserialize_with = "lenient_timestamp")]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(rename = "videoStream", default)]
    pub video_stream: Option<String>,
}

impl Entity for AirbornePlatform {
    const KIND: EntityKind = EntityKind::AirbornePlatform;
    const REQUIRED_FIELDS: &'static [&'static str] = &["flightID", "x", "y"];
    type Key = DbId;

    fn key(&self) -> DbId {
        self.flight_id
    }

    fn position(&self) -> LatLng {
        LatLng::new(self.x, self.y)
    }
}

/// An operator-marked point of interest ("crucial place").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    #[serde(rename = "crucialplaceid")]
    pub id: DbId,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Entity for PointOfInterest {
    const KIND: EntityKind = EntityKind::PointOfInterest;
    const REQUIRED_FIELDS: &'static [&'static str] = &["crucialplaceid", "x", "y"];
    type Key = DbId;

    fn key(&self) -> DbId {
        self.id
    }

    fn position(&self) -> LatLng {
        LatLng::new(self.x, self.y)
    }
}
