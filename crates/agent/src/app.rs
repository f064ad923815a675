//! Wiring: builds the client, store and tasks and hands back a handle.

use std::sync::Arc;

use tacmap_core::entity::{AirbornePlatform, EntityKind, PointOfInterest, Target};
use tacmap_core::map::{DrawToolConfig, MapView};
use tacmap_core::resolver::Resolver;
use tacmap_sync::api::{AnnotationBackend, MapApi, SnapshotSource};
use tacmap_sync::capture::{event_channel, AnnotationPipeline};
use tacmap_sync::error::SyncError;
use tacmap_sync::preview::PreviewOverlay;
use tacmap_sync::scheduler::{Scheduler, SchedulerError};
use tacmap_sync::store::ReconciliationStore;
use tokio::io::AsyncBufRead;

use crate::config::AgentConfig;
use crate::feed::DrawFeed;
use crate::summary;

/// A running agent.
pub struct Agent {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<ReconciliationStore>,
    pub preview: Arc<PreviewOverlay>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] SyncError),

    #[error(transparent)]
    Schedule(#[from] SchedulerError),
}

/// Start pollers, the annotation pipeline, the draw feed reading `input`
/// and the render-summary loop.
pub async fn start<R>(config: &AgentConfig, input: R) -> Result<Agent, StartError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let api = Arc::new(MapApi::new(config.endpoints(), config.request_timeout)?);
    let source: Arc<dyn SnapshotSource> = api.clone();
    let backend: Arc<dyn AnnotationBackend> = api;

    let store = Arc::new(ReconciliationStore::new());
    let scheduler = Scheduler::new(Arc::clone(&store));
    let resolver = Arc::new(Resolver::standard());
    let preview = Arc::new(PreviewOverlay::new());
    let tools = DrawToolConfig::default();
    let view = MapView::default();

    tracing::info!(
        tile_url = %config.base_layer.tile_url_template,
        center_lat = view.center.lat,
        center_lng = view.center.lng,
        zoom = view.zoom,
        "Map overlay configured",
    );

    scheduler
        .spawn_poller::<Target>(config.poller_config(EntityKind::Target), Arc::clone(&source))
        .await?;
    scheduler
        .spawn_poller::<AirbornePlatform>(
            config.poller_config(EntityKind::AirbornePlatform),
            Arc::clone(&source),
        )
        .await?;
    scheduler
        .spawn_poller::<PointOfInterest>(
            config.poller_config(EntityKind::PointOfInterest),
            source,
        )
        .await?;

    let (events_tx, events_rx) = event_channel();
    let pipeline = AnnotationPipeline::new(Arc::clone(&store), backend, tools);
    scheduler
        .spawn_task("annotations", move |cancel| pipeline.run(events_rx, cancel))
        .await?;

    let feed = DrawFeed::new(
        events_tx,
        Arc::clone(&preview),
        Arc::clone(&store),
        Arc::clone(&resolver),
    );
    scheduler
        .spawn_task("draw-feed", move |cancel| feed.run(input, cancel))
        .await?;

    let summary_store = Arc::clone(&store);
    scheduler
        .spawn_task("render-summary", move |cancel| {
            summary::run(summary_store, resolver, cancel)
        })
        .await?;

    Ok(Agent {
        scheduler,
        store,
        preview,
    })
}

impl Agent {
    /// Stop every task and log final poller health.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;

        for status in self.scheduler.statuses().await {
            tracing::info!(
                kind = %status.kind,
                successes = status.successes,
                failures = status.failures,
                last_applied_cycle = status.last_applied_cycle,
                "Poller summary",
            );
        }
    }
}
