//! Headless stand-in for the map renderer.
//!
//! Rebuilds the marker layer whenever the store changes and logs what
//! would be drawn.

use std::sync::Arc;

use serde::Serialize;
use tacmap_core::resolver::Resolver;
use tacmap_sync::render::MarkerLayer;
use tacmap_sync::store::ReconciliationStore;
use tokio_util::sync::CancellationToken;

/// Counts of what one frame would draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSummary {
    pub targets: usize,
    pub platforms: usize,
    pub places: usize,
    pub annotations: usize,
    pub local_only: usize,
}

impl From<&MarkerLayer> for FrameSummary {
    fn from(layer: &MarkerLayer) -> Self {
        Self {
            targets: layer.targets.len(),
            platforms: layer.platforms.len(),
            places: layer.places.len(),
            annotations: layer.annotations.len(),
            local_only: layer.local_only_count(),
        }
    }
}

pub async fn run(
    store: Arc<ReconciliationStore>,
    resolver: Arc<Resolver>,
    cancel: CancellationToken,
) {
    let mut changes = store.subscribe_changes();
    let mut last: Option<FrameSummary> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let revision = *changes.borrow_and_update();
                let layer = MarkerLayer::build(&store, &resolver);
                let summary = FrameSummary::from(&layer);

                if last != Some(summary) {
                    tracing::info!(
                        revision,
                        targets = summary.targets,
                        platforms = summary.platforms,
                        places = summary.places,
                        annotations = summary.annotations,
                        local_only = summary.local_only,
                        "Overlay updated",
                    );
                    last = Some(summary);
                } else {
                    tracing::debug!(revision, "Overlay redrawn");
                }
            }
        }
    }
}
