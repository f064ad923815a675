//! Reconciliation store: the latest-known state of every collection.
//!
//! One [`watch`] slot per entity kind holds the current [`Snapshot`]. A
//! poller proposes a replacement with [`ReconciliationStore::apply`]; the
//! slot takes it only if its cycle is not older than the one already shown.
//! The check and the replacement run inside a single `send_if_modified`
//! call, so they form one critical section no matter how tasks interleave.
//!
//! The store also owns the annotation list (local-only and confirmed).
//! Readers get cloned values and never block writers for longer than a
//! clone.

use std::sync::Arc;

use tacmap_core::annotation::Annotation;
use tacmap_core::entity::{AirbornePlatform, Entity, PointOfInterest, Target};
use tacmap_core::geometry::Geometry;
use tokio::sync::watch;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The complete set of entities of one kind as of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<E> {
    /// Poll cycle that produced this snapshot; `0` before the first apply.
    pub cycle: u64,
    pub entities: Arc<Vec<E>>,
}

impl<E> Snapshot<E> {
    pub fn new(cycle: u64, entities: Vec<E>) -> Self {
        Self {
            cycle,
            entities: Arc::new(entities),
        }
    }

    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.entities.iter()
    }
}

/// Result of proposing a snapshot to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The slot now shows the proposed snapshot.
    Applied,
    /// Accepted, but the entities equal what was already shown; only the
    /// cycle marker moved. Subscribers are not woken.
    Unchanged,
    /// Discarded: the slot already reflects a newer cycle.
    Stale { current: u64 },
}

// ---------------------------------------------------------------------------
// Tracked
// ---------------------------------------------------------------------------

/// Entity kinds the store keeps a slot for.
pub trait Tracked: Entity {
    fn slot(store: &ReconciliationStore) -> &watch::Sender<Snapshot<Self>>;
}

impl Tracked for Target {
    fn slot(store: &ReconciliationStore) -> &watch::Sender<Snapshot<Self>> {
        &store.targets
    }
}

impl Tracked for AirbornePlatform {
    fn slot(store: &ReconciliationStore) -> &watch::Sender<Snapshot<Self>> {
        &store.platforms
    }
}

impl Tracked for PointOfInterest {
    fn slot(store: &ReconciliationStore) -> &watch::Sender<Snapshot<Self>> {
        &store.places
    }
}

// ---------------------------------------------------------------------------
// ReconciliationStore
// ---------------------------------------------------------------------------

/// Exclusive owner of all snapshots and annotations.
///
/// Share it as `Arc<ReconciliationStore>`; all methods take `&self`.
pub struct ReconciliationStore {
    targets: watch::Sender<Snapshot<Target>>,
    platforms: watch::Sender<Snapshot<AirbornePlatform>>,
    places: watch::Sender<Snapshot<PointOfInterest>>,
    annotations: watch::Sender<Vec<Annotation>>,
    /// Bumped on every visible change to any slot.
    revision: watch::Sender<u64>,
}

impl Default for ReconciliationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self {
            targets: watch::channel(Snapshot::empty()).0,
            platforms: watch::channel(Snapshot::empty()).0,
            places: watch::channel(Snapshot::empty()).0,
            annotations: watch::channel(Vec::new()).0,
            revision: watch::channel(0).0,
        }
    }

    // ---- snapshots ----

    /// Replace the slot for `E` with `snapshot` unless the slot already
    /// reflects a newer cycle.
    ///
    /// Applying the same snapshot twice leaves the store unchanged after
    /// the first application.
    pub fn apply<E: Tracked>(&self, snapshot: Snapshot<E>) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Unchanged;

        E::slot(self).send_if_modified(|current| {
            if snapshot.cycle < current.cycle {
                outcome = ApplyOutcome::Stale {
                    current: current.cycle,
                };
                return false;
            }
            if current.entities == snapshot.entities {
                current.cycle = snapshot.cycle;
                outcome = ApplyOutcome::Unchanged;
                return false;
            }
            *current = snapshot;
            outcome = ApplyOutcome::Applied;
            true
        });

        if outcome == ApplyOutcome::Applied {
            self.bump_revision();
        }
        outcome
    }

    /// Current snapshot for `E`. Never blocks on pollers.
    pub fn read<E: Tracked>(&self) -> Snapshot<E> {
        E::slot(self).borrow().clone()
    }

    /// Cycle currently reflected by the slot for `E`.
    pub fn cycle<E: Tracked>(&self) -> u64 {
        E::slot(self).borrow().cycle
    }

    /// Watch one slot for replacements.
    pub fn subscribe<E: Tracked>(&self) -> watch::Receiver<Snapshot<E>> {
        E::slot(self).subscribe()
    }

    /// Watch for any visible change (snapshots or annotations).
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    // ---- annotations ----

    /// All annotations, in creation order.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.annotations.borrow().clone()
    }

    pub fn annotation(&self, provisional_id: Uuid) -> Option<Annotation> {
        self.annotations
            .borrow()
            .iter()
            .find(|a| a.provisional_id == provisional_id)
            .cloned()
    }

    /// Insert an annotation, replacing any record with the same
    /// provisional identifier.
    pub fn upsert_annotation(&self, annotation: Annotation) {
        self.annotations.send_modify(|list| {
            match list
                .iter_mut()
                .find(|a| a.provisional_id == annotation.provisional_id)
            {
                Some(existing) => *existing = annotation,
                None => list.push(annotation),
            }
        });
        self.bump_revision();
    }

    /// Apply `f` to the annotation with `provisional_id`.
    ///
    /// Returns `false` (and changes nothing) when no such annotation exists.
    pub fn update_annotation<F>(&self, provisional_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut Annotation),
    {
        let found = self.annotations.send_if_modified(|list| {
            match list.iter_mut().find(|a| a.provisional_id == provisional_id) {
                Some(annotation) => {
                    f(annotation);
                    true
                }
                None => false,
            }
        });
        if found {
            self.bump_revision();
        }
        found
    }

    /// Replace an annotation's geometry locally.
    pub fn edit_annotation(&self, provisional_id: Uuid, geometry: Geometry) -> bool {
        self.update_annotation(provisional_id, |a| a.geometry = geometry)
    }

    /// Remove an annotation locally.
    pub fn remove_annotation(&self, provisional_id: Uuid) -> Option<Annotation> {
        let mut removed = None;
        self.annotations.send_if_modified(|list| {
            match list.iter().position(|a| a.provisional_id == provisional_id) {
                Some(idx) => {
                    removed = Some(list.remove(idx));
                    true
                }
                None => false,
            }
        });
        if removed.is_some() {
            self.bump_revision();
        }
        removed
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}
