//! Annotation capture: draw events in, annotations and submissions out.
//!
//! [`AnnotationPipeline`] consumes [`DrawEvent`]s from an `mpsc` channel.
//! A completed shape becomes a local-only annotation in the store right
//! away. Points are then submitted to the backend in the background; the
//! response is folded back into the same record (matched by provisional
//! identifier), so a confirmation never produces a second annotation.
//!
//! Submission failures leave the annotation local-only with the error
//! recorded. Nothing is retried automatically; a [`DrawEvent::Retry`]
//! resubmits under the same provisional identifier. Edits and deletions
//! change the local record only.

use std::collections::HashSet;
use std::sync::Arc;

use tacmap_core::annotation::Annotation;
use tacmap_core::entity::PointOfInterest;
use tacmap_core::geometry::{Geometry, LatLng};
use tacmap_core::map::DrawToolConfig;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{AnnotationBackend, CreatePlaceRequest};
use crate::error::SyncError;
use crate::events::DrawEvent;
use crate::store::ReconciliationStore;

/// Buffer size of the draw event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Provisional id, the point as submitted, and the backend answer.
type SubmissionResult = (Uuid, LatLng, Result<PointOfInterest, SyncError>);

/// Create the channel that feeds a pipeline.
pub fn event_channel() -> (mpsc::Sender<DrawEvent>, mpsc::Receiver<DrawEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

pub struct AnnotationPipeline {
    store: Arc<ReconciliationStore>,
    backend: Arc<dyn AnnotationBackend>,
    tools: DrawToolConfig,
    submissions: JoinSet<SubmissionResult>,
    /// Provisional ids with a submission outstanding.
    in_flight: HashSet<Uuid>,
}

impl AnnotationPipeline {
    pub fn new(
        store: Arc<ReconciliationStore>,
        backend: Arc<dyn AnnotationBackend>,
        tools: DrawToolConfig,
    ) -> Self {
        Self {
            store,
            backend,
            tools,
            submissions: JoinSet::new(),
            in_flight: HashSet::new(),
        }
    }

    /// Number of submissions still awaiting a backend response.
    pub fn pending_submissions(&self) -> usize {
        self.in_flight.len()
    }

    /// Consume events until the channel closes or `cancel` fires.
    ///
    /// When the channel closes, outstanding submissions are allowed to
    /// finish (unless cancelled meanwhile). On cancellation they are
    /// aborted and their results never reach the store.
    pub async fn run(mut self, mut events: mpsc::Receiver<DrawEvent>, cancel: CancellationToken) {
        tracing::info!("Annotation pipeline started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.submissions.abort_all();
                    break;
                }

                Some(joined) = self.submissions.join_next() => {
                    self.on_joined(joined);
                }

                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        tracing::debug!(
                            pending = self.pending_submissions(),
                            "Draw event channel closed, settling submissions",
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => self.submissions.abort_all(),
                            _ = self.settle() => {}
                        }
                        break;
                    }
                },
            }
        }

        tracing::info!("Annotation pipeline stopped");
    }

    /// Process one draw event.
    pub fn handle(&mut self, event: DrawEvent) {
        match event {
            DrawEvent::Created {
                kind,
                coordinates,
                comment,
            } => self.on_created(Geometry { kind, coordinates }, comment),
            DrawEvent::Edited { id, coordinates } => self.on_edited(id, coordinates),
            DrawEvent::Deleted { id } => self.on_deleted(id),
            DrawEvent::Retry { id } => self.on_retry(id),
        }
    }

    /// Wait for every outstanding submission and fold its result.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.submissions.join_next().await {
            self.on_joined(joined);
        }
    }

    // ---- event handlers ----

    fn on_created(&mut self, geometry: Geometry, comment: Option<String>) {
        if !self.tools.allows(geometry.kind) {
            tracing::warn!(kind = %geometry.kind, "Draw tool disabled, ignoring shape");
            return;
        }
        if let Err(e) = geometry.validate() {
            tracing::warn!(kind = %geometry.kind, error = %e, "Rejecting drawn geometry");
            return;
        }

        let annotation = Annotation::new_local(geometry, comment);
        tracing::info!(
            annotation_id = %annotation.provisional_id,
            kind = %annotation.geometry.kind,
            "Annotation captured",
        );

        self.store.upsert_annotation(annotation.clone());

        if annotation.is_submittable() {
            self.submit(&annotation);
        } else {
            tracing::debug!(
                annotation_id = %annotation.provisional_id,
                "Shape kept as local annotation",
            );
        }
    }

    fn on_edited(&mut self, id: Uuid, coordinates: Vec<LatLng>) {
        let Some(existing) = self.store.annotation(id) else {
            tracing::warn!(annotation_id = %id, "Edit for unknown annotation ignored");
            return;
        };

        let geometry = Geometry {
            kind: existing.geometry.kind,
            coordinates,
        };
        if let Err(e) = geometry.validate() {
            tracing::warn!(annotation_id = %id, error = %e, "Rejecting edited geometry");
            return;
        }

        self.store.edit_annotation(id, geometry);
        tracing::info!(annotation_id = %id, "Annotation edited locally, not synchronized");
    }

    fn on_deleted(&mut self, id: Uuid) {
        match self.store.remove_annotation(id) {
            Some(_) => tracing::info!(annotation_id = %id, "Annotation deleted locally, not synchronized"),
            None => tracing::warn!(annotation_id = %id, "Delete for unknown annotation ignored"),
        }
    }

    fn on_retry(&mut self, id: Uuid) {
        match self.store.annotation(id) {
            None => tracing::warn!(annotation_id = %id, "Retry for unknown annotation ignored"),
            Some(a) if a.is_confirmed() => {
                tracing::debug!(annotation_id = %id, "Annotation already confirmed, nothing to retry");
            }
            Some(a) if !a.is_submittable() => {
                tracing::warn!(
                    annotation_id = %id,
                    kind = %a.geometry.kind,
                    "Only point annotations are submitted",
                );
            }
            Some(a) => {
                tracing::info!(annotation_id = %id, "Resubmitting annotation");
                self.submit(&a);
            }
        }
    }

    // ---- submissions ----

    fn submit(&mut self, annotation: &Annotation) {
        let Some(point) = annotation.geometry.as_point() else {
            return;
        };
        let id = annotation.provisional_id;
        if !self.in_flight.insert(id) {
            tracing::debug!(annotation_id = %id, "Submission already in flight");
            return;
        }

        let request = CreatePlaceRequest {
            object_id: id,
            x: point.lat,
            y: point.lng,
            comment: annotation.comment.clone(),
        };
        let backend = Arc::clone(&self.backend);
        self.submissions.spawn(async move {
            let result = backend.create_place(&request).await;
            (request.object_id, point, result)
        });
    }

    fn on_joined(&mut self, joined: Result<SubmissionResult, JoinError>) {
        match joined {
            Ok((id, submitted, result)) => self.on_submitted(id, submitted, result),
            Err(e) => {
                tracing::error!(error = %e, "Annotation submission task failed");
            }
        }
    }

    fn on_submitted(
        &mut self,
        id: Uuid,
        submitted: LatLng,
        result: Result<PointOfInterest, SyncError>,
    ) {
        self.in_flight.remove(&id);

        match result {
            Ok(place) => {
                let server_id = place.id;
                if self
                    .store
                    .update_annotation(id, |a| a.confirm_with(&place, submitted))
                {
                    tracing::info!(annotation_id = %id, server_id, "Annotation confirmed");
                } else {
                    tracing::warn!(
                        annotation_id = %id,
                        server_id,
                        "Confirmation for a deleted annotation dropped",
                    );
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .update_annotation(id, |a| a.last_error = Some(message));
                tracing::warn!(
                    annotation_id = %id,
                    error_kind = %e.kind(),
                    error = %e,
                    "Annotation submission failed, kept local-only",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tacmap_core::annotation::AnnotationStatus;
    use tacmap_core::geometry::GeometryKind;

    /// Backend that records requests and answers from a fixed script.
    struct FakeBackend {
        requests: Mutex<Vec<CreatePlaceRequest>>,
        fail: bool,
        next_id: i64,
    }

    impl FakeBackend {
        fn ok(next_id: i64) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                fail: false,
                next_id,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                fail: true,
                next_id: 0,
            })
        }

        fn requests(&self) -> Vec<CreatePlaceRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnnotationBackend for FakeBackend {
        async fn create_place(
            &self,
            request: &CreatePlaceRequest,
        ) -> Result<PointOfInterest, SyncError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(SyncError::HttpStatus {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            Ok(PointOfInterest {
                id: self.next_id,
                x: request.x,
                y: request.y,
                comment: Some(request.comment.clone()),
            })
        }
    }

    fn pipeline(backend: Arc<FakeBackend>) -> (AnnotationPipeline, Arc<ReconciliationStore>) {
        let store = Arc::new(ReconciliationStore::new());
        let p = AnnotationPipeline::new(Arc::clone(&store), backend, DrawToolConfig::default());
        (p, store)
    }

    fn point_event(comment: Option<&str>) -> DrawEvent {
        DrawEvent::created(
            Geometry::point(LatLng::new(50.21, 22.53)),
            comment.map(String::from),
        )
    }

    #[tokio::test]
    async fn point_round_trip_has_single_confirmed_annotation() {
        let backend = FakeBackend::ok(501);
        let (mut p, store) = pipeline(Arc::clone(&backend));

        p.handle(point_event(Some("bridge")));
        let local = store.annotations();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].status, AnnotationStatus::LocalOnly);

        p.settle().await;

        let list = store.annotations();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].provisional_id, local[0].provisional_id);
        assert_eq!(list[0].server_id, Some(501));
        assert_eq!(list[0].status, AnnotationStatus::Confirmed);

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].object_id, local[0].provisional_id);
        assert_eq!(requests[0].x, 50.21);
        assert_eq!(requests[0].y, 22.53);
        assert_eq!(requests[0].comment, "bridge");
    }

    #[tokio::test]
    async fn failed_submission_stays_local_only() {
        let backend = FakeBackend::failing();
        let (mut p, store) = pipeline(Arc::clone(&backend));

        p.handle(point_event(None));
        p.settle().await;

        let list = store.annotations();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, AnnotationStatus::LocalOnly);
        assert!(list[0].last_error.as_deref().unwrap().contains("502"));
        // No automatic retry.
        assert_eq!(backend.requests().len(), 1);
        assert_eq!(p.pending_submissions(), 0);
    }

    #[tokio::test]
    async fn retry_reuses_provisional_id() {
        let backend = FakeBackend::failing();
        let (mut p, store) = pipeline(Arc::clone(&backend));

        p.handle(point_event(None));
        p.settle().await;
        let id = store.annotations()[0].provisional_id;

        p.handle(DrawEvent::Retry { id });
        p.settle().await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.object_id == id));
        assert_eq!(store.annotations().len(), 1);
    }

    #[tokio::test]
    async fn shapes_are_local_only_and_not_submitted() {
        let backend = FakeBackend::ok(1);
        let (mut p, store) = pipeline(Arc::clone(&backend));

        p.handle(DrawEvent::Created {
            kind: GeometryKind::Polygon,
            coordinates: vec![
                LatLng::new(0.0, 0.0),
                LatLng::new(0.0, 1.0),
                LatLng::new(1.0, 1.0),
            ],
            comment: None,
        });
        p.settle().await;

        let list = store.annotations();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, AnnotationStatus::LocalOnly);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_or_disabled_shapes_are_dropped() {
        let backend = FakeBackend::ok(1);
        let store = Arc::new(ReconciliationStore::new());
        let tools = DrawToolConfig {
            rectangle: false,
            ..Default::default()
        };
        let mut p = AnnotationPipeline::new(Arc::clone(&store), backend.clone(), tools);

        p.handle(DrawEvent::Created {
            kind: GeometryKind::Rectangle,
            coordinates: vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)],
            comment: None,
        });
        p.handle(DrawEvent::Created {
            kind: GeometryKind::Point,
            coordinates: vec![LatLng::new(f64::NAN, 0.0)],
            comment: None,
        });
        p.settle().await;

        assert!(store.annotations().is_empty());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn confirmation_after_delete_is_dropped() {
        let backend = FakeBackend::ok(9);
        let (mut p, store) = pipeline(backend);

        p.handle(point_event(None));
        let id = store.annotations()[0].provisional_id;
        p.handle(DrawEvent::Deleted { id });
        p.settle().await;

        assert!(store.annotations().is_empty());
    }

    #[tokio::test]
    async fn edit_updates_geometry_locally() {
        let backend = FakeBackend::ok(3);
        let (mut p, store) = pipeline(Arc::clone(&backend));

        p.handle(DrawEvent::Created {
            kind: GeometryKind::Line,
            coordinates: vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)],
            comment: None,
        });
        let id = store.annotations()[0].provisional_id;

        p.handle(DrawEvent::Edited {
            id,
            coordinates: vec![LatLng::new(0.0, 0.0), LatLng::new(2.0, 2.0), LatLng::new(3.0, 3.0)],
        });
        let edited = store.annotation(id).unwrap();
        assert_eq!(edited.geometry.kind, GeometryKind::Line);
        assert_eq!(edited.geometry.coordinates.len(), 3);

        // Too few coordinates for a line: ignored.
        p.handle(DrawEvent::Edited {
            id,
            coordinates: vec![LatLng::new(0.0, 0.0)],
        });
        assert_eq!(store.annotation(id).unwrap().geometry.coordinates.len(), 3);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn point_moved_before_confirmation_keeps_local_position() {
        let backend = FakeBackend::ok(12);
        let (mut p, store) = pipeline(Arc::clone(&backend));

        p.handle(point_event(Some("ford")));
        let id = store.annotations()[0].provisional_id;
        p.handle(DrawEvent::Edited {
            id,
            coordinates: vec![LatLng::new(50.3, 22.6)],
        });
        p.settle().await;

        let a = store.annotation(id).unwrap();
        assert_eq!(a.status, AnnotationStatus::Confirmed);
        assert_eq!(a.server_id, Some(12));
        assert_eq!(a.geometry.as_point(), Some(LatLng::new(50.3, 22.6)));
        assert_eq!(backend.requests()[0].x, 50.21);
    }

    #[tokio::test]
    async fn run_consumes_channel_and_settles() {
        let backend = FakeBackend::ok(42);
        let (p, store) = pipeline(Arc::clone(&backend));
        let (tx, rx) = event_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(rx, cancel));

        tx.send(point_event(Some("ford"))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let list = store.annotations();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].server_id, Some(42));
        assert_eq!(list[0].comment, "ford");
    }
}
