//! Entity synchronization and annotation capture for the map overlay.
//!
//! Provides the HTTP backend client, per-collection pollers with backoff,
//! the reconciliation store, the annotation capture pipeline, the preview
//! overlay slot and the marker-layer builder consumed by rendering.

pub mod api;
pub mod backoff;
pub mod capture;
pub mod error;
pub mod events;
pub mod poller;
pub mod preview;
pub mod render;
pub mod scheduler;
pub mod store;

pub use api::{AnnotationBackend, ApiEndpoints, MapApi, SnapshotSource};
pub use capture::AnnotationPipeline;
pub use error::{ErrorKind, SyncError};
pub use poller::{Poller, PollerConfig, PollerStatus};
pub use scheduler::Scheduler;
pub use store::ReconciliationStore;
