//! Turns the store's current contents into rendering instructions.

use std::collections::HashSet;

use serde::Serialize;
use tacmap_core::annotation::{Annotation, AnnotationStatus};
use tacmap_core::entity::{AirbornePlatform, PointOfInterest, Target};
use tacmap_core::geometry::Geometry;
use tacmap_core::map::Marker;
use tacmap_core::resolver::Resolver;
use tacmap_core::types::DbId;

use crate::store::ReconciliationStore;

/// An operator annotation as drawn on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationShape {
    pub key: String,
    pub geometry: Geometry,
    pub comment: String,
    pub status: AnnotationStatus,
    pub server_id: Option<DbId>,
    pub last_error: Option<String>,
}

impl From<&Annotation> for AnnotationShape {
    fn from(a: &Annotation) -> Self {
        Self {
            key: format!("annotation:{}", a.provisional_id),
            geometry: a.geometry.clone(),
            comment: a.comment.clone(),
            status: a.status,
            server_id: a.server_id,
            last_error: a.last_error.clone(),
        }
    }
}

/// Everything the map library needs to draw one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarkerLayer {
    pub targets: Vec<Marker>,
    pub platforms: Vec<Marker>,
    pub places: Vec<Marker>,
    pub annotations: Vec<AnnotationShape>,
}

impl MarkerLayer {
    /// Build markers from the latest snapshots. Never blocks.
    ///
    /// A confirmed annotation whose server id already shows up in the
    /// places snapshot is drawn once, as the place.
    pub fn build(store: &ReconciliationStore, resolver: &Resolver) -> Self {
        let targets = store.read::<Target>();
        let platforms = store.read::<AirbornePlatform>();
        let places = store.read::<PointOfInterest>();

        let place_ids: HashSet<DbId> = places.iter().map(|p| p.id).collect();
        let annotations = store
            .annotations()
            .iter()
            .filter(|a| !a.server_id.is_some_and(|id| place_ids.contains(&id)))
            .map(AnnotationShape::from)
            .collect();

        Self {
            targets: targets.iter().map(|t| Marker::for_target(t, resolver)).collect(),
            platforms: platforms
                .iter()
                .map(|p| Marker::for_platform(p, resolver))
                .collect(),
            places: places.iter().map(|p| Marker::for_place(p, resolver)).collect(),
            annotations,
        }
    }

    /// Look up an entity marker by its key.
    pub fn find(&self, key: &str) -> Option<&Marker> {
        self.targets
            .iter()
            .chain(&self.platforms)
            .chain(&self.places)
            .find(|m| m.key == key)
    }

    pub fn marker_count(&self) -> usize {
        self.targets.len() + self.platforms.len() + self.places.len()
    }

    pub fn local_only_count(&self) -> usize {
        self.annotations
            .iter()
            .filter(|a| a.status == AnnotationStatus::LocalOnly)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Snapshot;
    use tacmap_core::geometry::LatLng;
    use tacmap_core::resolver::Symbol;

    fn place(id: DbId) -> PointOfInterest {
        PointOfInterest {
            id,
            x: 50.0,
            y: 22.0,
            comment: None,
        }
    }

    fn target(id: DbId, label: &str) -> Target {
        Target {
            id,
            x: 50.2,
            y: 22.5,
            z: None,
            detected_at: None,
            comment: None,
            category_id: None,
            category_label: Some(label.into()),
            platform_id: None,
            image_link: None,
        }
    }

    #[test]
    fn builds_markers_per_collection() {
        let store = ReconciliationStore::new();
        store.apply(Snapshot::new(1, vec![target(1, "bwp"), target(2, "unknown")]));
        store.apply(Snapshot::new(1, vec![place(7)]));

        let layer = MarkerLayer::build(&store, &Resolver::standard());
        assert_eq!(layer.targets.len(), 2);
        assert_eq!(layer.targets[0].descriptor.symbol, Symbol::InfantryVehicle);
        assert_eq!(layer.targets[1].descriptor.symbol, Symbol::Default);
        assert!(layer.platforms.is_empty());
        assert_eq!(layer.places[0].descriptor.symbol, Symbol::PlaceMarker);
        assert_eq!(layer.marker_count(), 3);
        assert_eq!(layer.find("point_of_interest:7").unwrap().key, "point_of_interest:7");
        assert!(layer.find("target:99").is_none());
    }

    #[test]
    fn confirmed_annotation_already_in_places_is_drawn_once() {
        let store = ReconciliationStore::new();
        let mut confirmed = Annotation::new_local(Geometry::point(LatLng::new(50.0, 22.0)), None);
        confirmed.confirm_with(&place(7), LatLng::new(50.0, 22.0));
        let local = Annotation::new_local(Geometry::point(LatLng::new(51.0, 23.0)), None);
        store.upsert_annotation(confirmed);
        store.upsert_annotation(local.clone());

        let layer = MarkerLayer::build(&store, &Resolver::standard());
        assert_eq!(layer.annotations.len(), 2);

        store.apply(Snapshot::new(1, vec![place(7)]));
        let layer = MarkerLayer::build(&store, &Resolver::standard());
        assert_eq!(layer.places.len(), 1);
        assert_eq!(layer.annotations.len(), 1);
        assert_eq!(
            layer.annotations[0].key,
            format!("annotation:{}", local.provisional_id)
        );
        assert_eq!(layer.local_only_count(), 1);
    }
}
